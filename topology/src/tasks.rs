// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task graph derivation
//!
//! Turns a validated topology into per-host ordered task lists.  This is
//! pure planning: the output is a set of [`TaskSpec`]s, not live tasks --
//! the orchestrator materializes them through the execution subsystem's
//! task factory and owns all dispatch.
//!
//! Ordering: for a given host and component, INSTALL always precedes START.
//! Within one host, specs follow group component order; across hosts the
//! map order is deterministic (BTreeMap) but dispatch order is not
//! guaranteed by this layer.

use crate::topology::ClusterTopology;
use shipwright_types::request::ProvisionAction;
use shipwright_types::stack::StackCatalog;
use shipwright_types::task::TaskCommand;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// One not-yet-materialized task
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct TaskSpec {
    pub host: String,
    pub component: String,
    pub command: TaskCommand,
}

/// `(host, component, command)` triples already completed by earlier
/// passes; the builder never re-emits them
pub type CompletedWork = BTreeSet<(String, String, TaskCommand)>;

/// Commands `action` generates for `component`, in execution order
fn commands_for_component(
    stack: &dyn StackCatalog,
    component: &str,
    action: ProvisionAction,
) -> Vec<TaskCommand> {
    let mut commands = Vec::with_capacity(2);
    if action.includes_install() {
        commands.push(TaskCommand::Install);
    }
    // Clients are installed but never started.
    if action.includes_start() && !stack.is_client_component(component) {
        commands.push(TaskCommand::Start);
    }
    commands
}

/// Whether `action` generates any task at all for `component`
///
/// Used by topology validation: a component no phase touches is exempt
/// from cardinality checks for that request.
pub fn generates_tasks(
    stack: &dyn StackCatalog,
    component: &str,
    action: ProvisionAction,
) -> bool {
    !commands_for_component(stack, component, action).is_empty()
}

/// Derives the ordered task list for one resolved host of one group.
pub fn build_tasks_for_host(
    topology: &ClusterTopology,
    stack: &dyn StackCatalog,
    group_name: &str,
    host: &str,
    completed: &CompletedWork,
) -> Vec<TaskSpec> {
    let Some(group) = topology.blueprint().host_group(group_name) else {
        return Vec::new();
    };
    let action = topology.provision_action();

    let mut specs = Vec::new();
    for component in group.component_names() {
        for command in commands_for_component(stack, component, action) {
            let key =
                (host.to_string(), component.to_string(), command);
            if completed.contains(&key) {
                continue;
            }
            specs.push(TaskSpec {
                host: host.to_string(),
                component: component.to_string(),
                command,
            });
        }
    }
    specs
}

/// Derives task lists for every resolved host in the topology.
///
/// Predicate-selected groups contribute nothing until hosts are bound;
/// their specs are derived at bind time with [`build_tasks_for_host`].
pub fn build_host_tasks(
    topology: &ClusterTopology,
    stack: &dyn StackCatalog,
    completed: &CompletedWork,
) -> BTreeMap<String, Vec<TaskSpec>> {
    let mut by_host = BTreeMap::new();
    for (group_name, info) in topology.host_group_info() {
        for host in &info.hosts {
            let specs = build_tasks_for_host(
                topology, stack, group_name, host, completed,
            );
            by_host
                .entry(host.clone())
                .or_insert_with(Vec::new)
                .extend(specs);
        }
    }
    by_host
}

#[cfg(test)]
mod test {
    use super::*;
    use shipwright_test_utils::dev::test_setup_log;
    use shipwright_types::blueprint::Blueprint;
    use shipwright_types::blueprint::HostGroup;
    use shipwright_types::blueprint::StackId;
    use shipwright_types::config::Configuration;
    use shipwright_types::error::InvalidTopologyError;
    use shipwright_types::ids::ClusterId;
    use shipwright_types::request::ConfigRecommendationStrategy;
    use shipwright_types::request::HostGroupInfo;
    use shipwright_types::request::ProvisionClusterRequest;
    use shipwright_types::stack::StackDefinition;
    use std::sync::Arc;

    fn test_stack() -> StackDefinition {
        let mut stack = StackDefinition::new("test-stack", "1.0");
        stack.define_service("service1", ["service1-site"]);
        stack.define_component("server1", "service1", "1+").unwrap();
        stack.define_component("server2", "service1", "0+").unwrap();
        stack.define_client_component("client1", "service1", "0+").unwrap();
        stack
    }

    fn test_topology(
        test_name: &str,
        action: ProvisionAction,
    ) -> Result<ClusterTopology, InvalidTopologyError> {
        let logctx = test_setup_log(test_name);
        let blueprint = Arc::new(
            Blueprint::new("test-bp", StackId::new("test-stack", "1.0"))
                .with_host_group(HostGroup::new("group1").with_components([
                    "server1", "server2", "client1",
                ])),
        );
        let request = ProvisionClusterRequest {
            cluster_id: ClusterId::new_v4(),
            cluster_name: "test-cluster".to_string(),
            blueprint_name: "test-bp".to_string(),
            description: None,
            host_group_info: [(
                "group1".to_string(),
                HostGroupInfo::new("group1").with_hosts(["h1", "h2"]),
            )]
            .into_iter()
            .collect(),
            configuration: Configuration::new(),
            provision_action: action,
            config_recommendation_strategy:
                ConfigRecommendationStrategy::NeverApply,
            security: None,
        };
        let topology = ClusterTopology::new(
            &logctx.log,
            blueprint,
            &test_stack(),
            &request,
            &[],
        );
        logctx.cleanup_successful();
        topology
    }

    fn commands_of(specs: &[TaskSpec]) -> Vec<(&str, TaskCommand)> {
        specs.iter().map(|s| (s.component.as_str(), s.command)).collect()
    }

    #[test]
    fn test_install_and_start_matrix() {
        let stack = test_stack();
        let topology =
            test_topology("test_install_and_start_matrix", ProvisionAction::InstallAndStart)
                .unwrap();
        let by_host =
            build_host_tasks(&topology, &stack, &CompletedWork::new());

        assert_eq!(by_host.len(), 2);
        for host in ["h1", "h2"] {
            let specs = &by_host[host];
            // Non-clients get INSTALL then START; the client gets INSTALL
            // only.
            assert_eq!(
                commands_of(specs),
                vec![
                    ("server1", TaskCommand::Install),
                    ("server1", TaskCommand::Start),
                    ("server2", TaskCommand::Install),
                    ("server2", TaskCommand::Start),
                    ("client1", TaskCommand::Install),
                ]
            );
        }
    }

    #[test]
    fn test_install_only_emits_no_start() {
        let stack = test_stack();
        let topology =
            test_topology("test_install_only", ProvisionAction::InstallOnly)
                .unwrap();
        let by_host =
            build_host_tasks(&topology, &stack, &CompletedWork::new());
        for specs in by_host.values() {
            assert!(specs
                .iter()
                .all(|spec| spec.command == TaskCommand::Install));
            assert_eq!(specs.len(), 3);
        }
    }

    #[test]
    fn test_start_only_emits_no_install_and_skips_clients() {
        let stack = test_stack();
        let topology =
            test_topology("test_start_only", ProvisionAction::StartOnly)
                .unwrap();
        let by_host =
            build_host_tasks(&topology, &stack, &CompletedWork::new());
        for specs in by_host.values() {
            assert_eq!(
                commands_of(specs),
                vec![
                    ("server1", TaskCommand::Start),
                    ("server2", TaskCommand::Start),
                ]
            );
        }
    }

    #[test]
    fn test_completed_work_not_reemitted() {
        let stack = test_stack();
        let topology = test_topology(
            "test_completed_work_not_reemitted",
            ProvisionAction::InstallAndStart,
        )
        .unwrap();

        let completed: CompletedWork = [
            ("h1".to_string(), "server1".to_string(), TaskCommand::Install),
            ("h1".to_string(), "server1".to_string(), TaskCommand::Start),
        ]
        .into_iter()
        .collect();

        let by_host = build_host_tasks(&topology, &stack, &completed);
        // h1 lost exactly the two completed specs; h2 is untouched.
        assert_eq!(by_host["h1"].len(), 3);
        assert!(!by_host["h1"]
            .iter()
            .any(|spec| spec.component == "server1"));
        assert_eq!(by_host["h2"].len(), 5);
    }

    #[test]
    fn test_install_precedes_start_per_component() {
        let stack = test_stack();
        let topology = test_topology(
            "test_install_precedes_start",
            ProvisionAction::InstallAndStart,
        )
        .unwrap();
        let by_host =
            build_host_tasks(&topology, &stack, &CompletedWork::new());
        for specs in by_host.values() {
            for (i, spec) in specs.iter().enumerate() {
                if spec.command == TaskCommand::Start {
                    let install_at = specs
                        .iter()
                        .position(|other| {
                            other.component == spec.component
                                && other.command == TaskCommand::Install
                        })
                        .expect("START without INSTALL");
                    assert!(install_at < i);
                }
            }
        }
    }
}
