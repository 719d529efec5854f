// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory state of one accepted request
//!
//! A [`LogicalRequest`] owns the per-host decomposition of a provisioning
//! or scaling request and derives aggregate status from its tasks.  It is
//! bookkeeping only: all mutation happens under the manager's lock, task
//! statuses are written exclusively from execution-subsystem events, and a
//! terminal request is never deleted, only kept for the completion query.

use crate::persist::HostRequestEntity;
use crate::persist::LogicalRequestEntity;
use crate::persist::TaskEntity;
use shipwright_topology::ClusterTopology;
use shipwright_types::ids::ClusterId;
use shipwright_types::ids::RequestId;
use shipwright_types::ids::TaskId;
use shipwright_types::task::RequestStatus;
use shipwright_types::task::RequestStatusResponse;
use shipwright_types::task::ShortTaskStatus;
use shipwright_types::task::Task;
use shipwright_types::task::TaskStatus;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Whether a request provisions a new cluster or scales an existing one
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Provision,
    Scale,
}

/// One host's worth of work within a logical request
#[derive(Clone, Debug)]
pub struct HostRequest {
    pub stage_id: u64,
    pub host_group: String,
    /// `None` until the host layer binds a concrete host to this slot
    /// (predicate-based selection)
    pub host: Option<String>,
    pub tasks: Vec<Task>,
}

impl HostRequest {
    pub fn is_pending_host_assignment(&self) -> bool {
        self.host.is_none()
    }
}

/// The orchestration unit for one topology request
#[derive(Clone, Debug)]
pub struct LogicalRequest {
    request_id: RequestId,
    cluster_id: ClusterId,
    kind: RequestKind,
    description: String,
    topology_request_id: u64,
    topology: Arc<ClusterTopology>,
    host_requests: Vec<HostRequest>,
    /// Orchestrator-driven phase, meaningful until tasks take over
    phase: RequestStatus,
    /// Configuration-phase failure; terminal regardless of task state
    failure: Option<String>,
}

impl LogicalRequest {
    pub fn new(
        request_id: RequestId,
        kind: RequestKind,
        description: String,
        topology_request_id: u64,
        topology: Arc<ClusterTopology>,
        host_requests: Vec<HostRequest>,
    ) -> LogicalRequest {
        LogicalRequest {
            request_id,
            cluster_id: topology.cluster_id(),
            kind,
            description,
            topology_request_id,
            topology,
            host_requests,
            phase: RequestStatus::Created,
            failure: None,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn topology_request_id(&self) -> u64 {
        self.topology_request_id
    }

    pub fn topology(&self) -> &Arc<ClusterTopology> {
        &self.topology
    }

    pub fn host_requests(&self) -> &[HostRequest] {
        &self.host_requests
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.host_requests.iter().flat_map(|hr| hr.tasks.iter())
    }

    pub fn phase(&self) -> RequestStatus {
        self.phase
    }

    pub fn set_phase(&mut self, phase: RequestStatus) {
        self.phase = phase;
    }

    pub fn record_failure(&mut self, message: String) {
        self.failure = Some(message);
    }

    /// Applies a status update from the execution subsystem.  Returns false
    /// if no task with that id belongs to this request.
    pub fn update_task_status(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> bool {
        for host_request in &mut self.host_requests {
            for task in &mut host_request.tasks {
                if task.id == task_id {
                    task.status = status;
                    return true;
                }
            }
        }
        false
    }

    /// Moves a task from `Pending` to `Queued` at submission time.
    ///
    /// Deliberately a no-op if the task has already progressed: a fast
    /// executor may deliver `InProgress` (or even a terminal status) before
    /// the submitter gets back around to record the handoff, and dispatch
    /// must not rewind it.
    pub fn mark_task_queued(&mut self, task_id: TaskId) -> bool {
        for host_request in &mut self.host_requests {
            for task in &mut host_request.tasks {
                if task.id == task_id {
                    if task.status == TaskStatus::Pending {
                        task.status = TaskStatus::Queued;
                        return true;
                    }
                    return false;
                }
            }
        }
        false
    }

    /// Aggregate status derived purely from tasks: failed if any
    /// non-skip-failure task failed, completed if every task is terminal
    /// (and none failed that way), in progress otherwise.  A request with
    /// no tasks at all is complete -- unless host slots are still waiting
    /// for concrete hosts, which is outstanding work.
    pub fn aggregate_task_status(&self) -> RequestStatus {
        if self
            .host_requests
            .iter()
            .any(HostRequest::is_pending_host_assignment)
        {
            return RequestStatus::InProgress;
        }

        let mut all_terminal = true;
        let mut any_task = false;
        for task in self.tasks() {
            any_task = true;
            if task.status.is_failed() && !task.skip_failure {
                return RequestStatus::Failed;
            }
            if !task.status.is_terminal() {
                all_terminal = false;
            }
        }
        if !any_task || all_terminal {
            RequestStatus::Completed
        } else {
            RequestStatus::InProgress
        }
    }

    /// Externally visible status: a recorded configuration failure always
    /// wins; before dispatch the orchestrator phase shows through; after
    /// dispatch, status is the task aggregate.
    pub fn status(&self) -> RequestStatus {
        if self.failure.is_some() {
            return RequestStatus::Failed;
        }
        match self.phase {
            RequestStatus::Created | RequestStatus::ConfigPending => self.phase,
            _ => self.aggregate_task_status(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Snapshot for progress polling
    pub fn request_status(&self) -> RequestStatusResponse {
        RequestStatusResponse {
            request_id: self.request_id,
            status: self.status(),
            tasks: self
                .tasks()
                .map(|task| ShortTaskStatus {
                    task_id: task.id,
                    host: task.host.clone(),
                    component: task.component.clone(),
                    command: task.command,
                    status: task.status,
                })
                .collect(),
        }
    }

    /// FQDNs this request has concretely claimed
    pub fn resolved_hosts(&self) -> BTreeSet<String> {
        self.host_requests
            .iter()
            .filter_map(|hr| hr.host.clone())
            .collect()
    }

    /// Binds `host` (and its freshly created tasks) to the first pending
    /// slot of `host_group`.  Returns false if the request has no pending
    /// slot for that group.
    pub fn bind_host(
        &mut self,
        host_group: &str,
        host: &str,
        tasks: Vec<Task>,
    ) -> bool {
        for host_request in &mut self.host_requests {
            if host_request.host_group == host_group
                && host_request.is_pending_host_assignment()
            {
                host_request.host = Some(host.to_string());
                host_request.tasks = tasks;
                return true;
            }
        }
        false
    }

    pub fn has_pending_host_request(&self, host_group: &str) -> bool {
        self.host_requests.iter().any(|hr| {
            hr.host_group == host_group && hr.is_pending_host_assignment()
        })
    }

    pub fn to_entity(&self) -> LogicalRequestEntity {
        LogicalRequestEntity {
            request_id: self.request_id,
            cluster_id: self.cluster_id,
            description: self.description.clone(),
            failure: self.failure.clone(),
            host_requests: self
                .host_requests
                .iter()
                .map(|hr| HostRequestEntity {
                    stage_id: hr.stage_id,
                    host_group: hr.host_group.clone(),
                    host: hr.host.clone(),
                    tasks: hr
                        .tasks
                        .iter()
                        .map(|task| TaskEntity {
                            id: task.id,
                            component: task.component.clone(),
                            command: task.command,
                            status: task.status,
                            skip_failure: task.skip_failure,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Rebuilds a request from its persisted form with last-known task
    /// statuses.  Replayed requests are considered past their dispatch
    /// phase: status derives from the restored tasks (or the recorded
    /// failure), never from re-running any phase.
    pub fn from_entity(
        entity: &LogicalRequestEntity,
        kind: RequestKind,
        topology_request_id: u64,
        topology: Arc<ClusterTopology>,
    ) -> LogicalRequest {
        let host_requests = entity
            .host_requests
            .iter()
            .map(|hr| HostRequest {
                stage_id: hr.stage_id,
                host_group: hr.host_group.clone(),
                host: hr.host.clone(),
                tasks: hr
                    .tasks
                    .iter()
                    .map(|task| Task {
                        id: task.id,
                        host: hr.host.clone().unwrap_or_default(),
                        component: task.component.clone(),
                        command: task.command,
                        status: task.status,
                        skip_failure: task.skip_failure,
                    })
                    .collect(),
            })
            .collect();
        LogicalRequest {
            request_id: entity.request_id,
            cluster_id: entity.cluster_id,
            kind,
            description: entity.description.clone(),
            topology_request_id,
            topology,
            host_requests,
            phase: RequestStatus::Dispatched,
            failure: entity.failure.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use shipwright_test_utils::dev::test_setup_log;
    use shipwright_types::blueprint::Blueprint;
    use shipwright_types::blueprint::HostGroup;
    use shipwright_types::blueprint::StackId;
    use shipwright_types::config::Configuration;
    use shipwright_types::request::ConfigRecommendationStrategy;
    use shipwright_types::request::HostGroupInfo;
    use shipwright_types::request::ProvisionAction;
    use shipwright_types::request::ProvisionClusterRequest;
    use shipwright_types::stack::StackDefinition;
    use shipwright_types::task::TaskCommand;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    // Each call gets its own log file; several tests build topologies
    // concurrently.
    fn test_topology() -> Arc<ClusterTopology> {
        static TOPOLOGY_COUNT: AtomicUsize = AtomicUsize::new(0);
        let n = TOPOLOGY_COUNT.fetch_add(1, Ordering::SeqCst);
        let logctx = test_setup_log(&format!("logical_request_topology_{n}"));
        let mut stack = StackDefinition::new("test-stack", "1.0");
        stack.define_service("service1", ["service1-site"]);
        stack.define_component("component1", "service1", "1+").unwrap();
        let blueprint = Arc::new(
            Blueprint::new("test-bp", StackId::new("test-stack", "1.0"))
                .with_host_group(
                    HostGroup::new("group1").with_components(["component1"]),
                ),
        );
        let request = ProvisionClusterRequest {
            cluster_id: ClusterId::new_v4(),
            cluster_name: "test-cluster".to_string(),
            blueprint_name: "test-bp".to_string(),
            description: None,
            host_group_info: [(
                "group1".to_string(),
                HostGroupInfo::new("group1").with_hosts(["h1"]),
            )]
            .into_iter()
            .collect(),
            configuration: Configuration::new(),
            provision_action: ProvisionAction::InstallAndStart,
            config_recommendation_strategy:
                ConfigRecommendationStrategy::NeverApply,
            security: None,
        };
        let topology = Arc::new(
            ClusterTopology::new(&logctx.log, blueprint, &stack, &request, &[])
                .unwrap(),
        );
        logctx.cleanup_successful();
        topology
    }

    fn task(id: u64, status: TaskStatus) -> Task {
        Task {
            id: TaskId(id),
            host: "h1".to_string(),
            component: "component1".to_string(),
            command: TaskCommand::Install,
            status,
            skip_failure: false,
        }
    }

    fn request_with_tasks(tasks: Vec<Task>) -> LogicalRequest {
        let mut request = LogicalRequest::new(
            RequestId(1),
            RequestKind::Provision,
            "Provision cluster test-cluster".to_string(),
            1,
            test_topology(),
            vec![HostRequest {
                stage_id: 0,
                host_group: "group1".to_string(),
                host: Some("h1".to_string()),
                tasks,
            }],
        );
        request.set_phase(RequestStatus::Dispatched);
        request
    }

    #[test]
    fn test_aggregate_status() {
        // All three tasks completed: COMPLETED.
        let request = request_with_tasks(vec![
            task(1, TaskStatus::Completed),
            task(2, TaskStatus::Completed),
            task(3, TaskStatus::Completed),
        ]);
        assert_eq!(request.status(), RequestStatus::Completed);
        assert!(request.is_finished());

        // One failed among completed: FAILED.
        let request = request_with_tasks(vec![
            task(1, TaskStatus::Failed),
            task(2, TaskStatus::Completed),
            task(3, TaskStatus::Completed),
        ]);
        assert_eq!(request.status(), RequestStatus::Failed);
        assert!(request.is_finished());

        // One still in progress: IN_PROGRESS.
        let request = request_with_tasks(vec![
            task(1, TaskStatus::InProgress),
            task(2, TaskStatus::Completed),
            task(3, TaskStatus::Completed),
        ]);
        assert_eq!(request.status(), RequestStatus::InProgress);
        assert!(!request.is_finished());

        // TIMEDOUT and ABORTED are failures too.
        for status in [TaskStatus::TimedOut, TaskStatus::Aborted] {
            let request = request_with_tasks(vec![
                task(1, status),
                task(2, TaskStatus::Completed),
            ]);
            assert_eq!(request.status(), RequestStatus::Failed);
        }
    }

    #[test]
    fn test_zero_tasks_is_complete() {
        let request = request_with_tasks(Vec::new());
        assert_eq!(request.status(), RequestStatus::Completed);
    }

    #[test]
    fn test_skip_failure_tasks_do_not_fail_the_request() {
        let mut failed_but_skippable = task(1, TaskStatus::Failed);
        failed_but_skippable.skip_failure = true;
        let request = request_with_tasks(vec![
            failed_but_skippable,
            task(2, TaskStatus::Completed),
        ]);
        assert_eq!(request.status(), RequestStatus::Completed);
    }

    #[test]
    fn test_pending_host_assignment_blocks_completion() {
        let mut request = LogicalRequest::new(
            RequestId(1),
            RequestKind::Provision,
            "Provision cluster test-cluster".to_string(),
            1,
            test_topology(),
            vec![HostRequest {
                stage_id: 0,
                host_group: "group1".to_string(),
                host: None,
                tasks: Vec::new(),
            }],
        );
        request.set_phase(RequestStatus::Dispatched);
        assert_eq!(request.status(), RequestStatus::InProgress);

        // Binding the host (with an already-completed task, for brevity)
        // lets the request complete.
        assert!(request.bind_host(
            "group1",
            "h9",
            vec![task(1, TaskStatus::Completed)]
        ));
        assert!(!request.has_pending_host_request("group1"));
        assert_eq!(request.status(), RequestStatus::Completed);
        assert!(request.resolved_hosts().contains("h9"));
    }

    #[test]
    fn test_mark_task_queued_never_rewinds() {
        let mut request = request_with_tasks(vec![task(1, TaskStatus::Pending)]);
        assert!(request.mark_task_queued(TaskId(1)));
        assert_eq!(
            request.tasks().next().unwrap().status,
            TaskStatus::Queued
        );

        // A completion that raced ahead of the queued marker stays put.
        assert!(request.update_task_status(TaskId(1), TaskStatus::Completed));
        assert!(!request.mark_task_queued(TaskId(1)));
        assert_eq!(
            request.tasks().next().unwrap().status,
            TaskStatus::Completed
        );

        // Unknown task ids are reported, not ignored.
        assert!(!request.update_task_status(TaskId(42), TaskStatus::Completed));
    }

    #[test]
    fn test_entity_round_trip() {
        let mut request = request_with_tasks(vec![
            task(1, TaskStatus::Completed),
            task(2, TaskStatus::InProgress),
        ]);
        request.record_failure("config exploded".to_string());

        let entity = request.to_entity();
        let restored = LogicalRequest::from_entity(
            &entity,
            RequestKind::Provision,
            request.topology_request_id(),
            Arc::clone(request.topology()),
        );
        assert_eq!(restored.request_id(), request.request_id());
        assert_eq!(restored.cluster_id(), request.cluster_id());
        assert_eq!(
            restored.tasks().map(|t| (t.id, t.status)).collect::<Vec<_>>(),
            request.tasks().map(|t| (t.id, t.status)).collect::<Vec<_>>(),
        );
        // The recorded failure survives and keeps the request terminal.
        assert_eq!(restored.status(), RequestStatus::Failed);
    }
}
