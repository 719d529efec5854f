// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the topology manager against in-process fakes for
//! the cluster-management context and the command-execution subsystem.

use async_trait::async_trait;
use shipwright_orchestrator::context::ClusterContext;
use shipwright_orchestrator::context::CommandExecutor;
use shipwright_orchestrator::context::ConfigurationRequest;
use shipwright_orchestrator::context::SubmitError;
use shipwright_orchestrator::manager::ManagerConfig;
use shipwright_orchestrator::manager::TopologyManager;
use shipwright_orchestrator::persist::HostRequestEntity;
use shipwright_orchestrator::persist::InMemoryPersistedState;
use shipwright_orchestrator::persist::LogicalRequestEntity;
use shipwright_orchestrator::persist::PersistedState;
use shipwright_orchestrator::persist::TaskEntity;
use shipwright_test_utils::dev::test_setup_log;
use shipwright_test_utils::dev::LogContext;
use shipwright_types::blueprint::Blueprint;
use shipwright_types::blueprint::BlueprintRegistry;
use shipwright_types::blueprint::HostGroup;
use shipwright_types::blueprint::StackId;
use shipwright_types::config::Configuration;
use shipwright_types::error::ConfigurationTopologyError;
use shipwright_types::error::InvalidTopologyError;
use shipwright_types::error::ProvisionError;
use shipwright_types::ids::ClusterId;
use shipwright_types::ids::RequestId;
use shipwright_types::ids::TaskId;
use shipwright_types::request::ConfigRecommendationStrategy;
use shipwright_types::request::HostGroupInfo;
use shipwright_types::request::ProvisionAction;
use shipwright_types::request::ProvisionClusterRequest;
use shipwright_types::request::ScaleClusterRequest;
use shipwright_types::request::TopologyRequest;
use shipwright_types::stack::StackDefinition;
use shipwright_types::task::RequestStatus;
use shipwright_types::task::Task;
use shipwright_types::task::TaskCommand;
use shipwright_types::task::TaskStatus;
use shipwright_types::task::TaskStatusUpdate;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Order-sensitive record of boundary calls, shared by both fakes
type OpsLog = Arc<Mutex<Vec<String>>>;

struct FakeContext {
    next_task_id: AtomicU64,
    kerberos_enabled: bool,
    kerberos_config: Configuration,
    fail_configuration: bool,
    hang_resolution: bool,
    applied: Mutex<Vec<ConfigurationRequest>>,
    ops: OpsLog,
}

impl FakeContext {
    fn new(ops: OpsLog) -> FakeContext {
        FakeContext {
            next_task_id: AtomicU64::new(0),
            kerberos_enabled: false,
            kerberos_config: Configuration::new(),
            fail_configuration: false,
            hang_resolution: false,
            applied: Mutex::new(Vec::new()),
            ops,
        }
    }

    fn applied_config_types(&self) -> BTreeSet<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.config_type.clone())
            .collect()
    }
}

#[async_trait]
impl ClusterContext for FakeContext {
    fn create_configuration_requests(
        &self,
        cluster_name: &str,
        host_group: Option<&str>,
        configuration: &Configuration,
    ) -> Vec<ConfigurationRequest> {
        configuration
            .config_types()
            .into_iter()
            .map(|config_type| ConfigurationRequest {
                cluster_name: cluster_name.to_string(),
                host_group: host_group.map(str::to_string),
                properties: configuration
                    .properties
                    .get(&config_type)
                    .cloned()
                    .unwrap_or_default(),
                attributes: configuration
                    .attributes
                    .get(&config_type)
                    .cloned()
                    .unwrap_or_default(),
                config_type,
            })
            .collect()
    }

    async fn set_configuration_on_cluster(
        &self,
        requests: Vec<ConfigurationRequest>,
    ) -> Result<(), ConfigurationTopologyError> {
        if self.fail_configuration {
            return Err(ConfigurationTopologyError::Apply {
                cluster_name: "test-cluster".to_string(),
                message: "injected configuration failure".to_string(),
            });
        }
        self.ops.lock().unwrap().push("set_configuration".to_string());
        self.applied.lock().unwrap().extend(requests);
        Ok(())
    }

    async fn wait_for_configuration_resolution(
        &self,
        _cluster_name: &str,
        _updated_config_types: &BTreeSet<String>,
    ) -> Result<(), ConfigurationTopologyError> {
        if self.hang_resolution {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    fn is_cluster_kerberos_enabled(&self, _cluster_id: ClusterId) -> bool {
        self.kerberos_enabled
    }

    fn kerberos_config(&self, _cluster_id: ClusterId) -> Configuration {
        self.kerberos_config.clone()
    }

    fn create_task(
        &self,
        _request_id: RequestId,
        _stage_id: u64,
        host: &str,
        component: &str,
        command: TaskCommand,
        skip_failure: bool,
    ) -> Task {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        Task {
            id: TaskId(id),
            host: host.to_string(),
            component: component.to_string(),
            command,
            status: TaskStatus::Pending,
            skip_failure,
        }
    }
}

struct FakeExecutor {
    submitted: Mutex<Vec<(RequestId, TaskId)>>,
    events: Mutex<Option<mpsc::UnboundedSender<TaskStatusUpdate>>>,
    /// When set, every submitted task immediately reports a terminal
    /// status: Failed for `fail_component` tasks, Completed otherwise.
    auto_complete: bool,
    fail_component: Option<String>,
    ops: OpsLog,
}

impl FakeExecutor {
    fn new(ops: OpsLog, auto_complete: bool) -> FakeExecutor {
        FakeExecutor {
            submitted: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            auto_complete,
            fail_component: None,
            ops,
        }
    }

    fn connect(&self, sender: mpsc::UnboundedSender<TaskStatusUpdate>) {
        *self.events.lock().unwrap() = Some(sender);
    }

    fn submitted_task_ids(&self) -> Vec<TaskId> {
        self.submitted.lock().unwrap().iter().map(|(_, id)| *id).collect()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn submit(
        &self,
        request_id: RequestId,
        task: &Task,
    ) -> Result<(), SubmitError> {
        self.ops.lock().unwrap().push(format!("submit:{}", task.id));
        self.submitted.lock().unwrap().push((request_id, task.id));
        if self.auto_complete {
            let status = match &self.fail_component {
                Some(component) if *component == task.component => {
                    TaskStatus::Failed
                }
                _ => TaskStatus::Completed,
            };
            let events = self.events.lock().unwrap();
            let sender = events.as_ref().expect("events channel connected");
            sender
                .send(TaskStatusUpdate { request_id, task_id: task.id, status })
                .expect("manager aggregation worker alive");
        }
        Ok(())
    }
}

struct TestHarness {
    logctx: LogContext,
    manager: TopologyManager,
    context: Arc<FakeContext>,
    executor: Arc<FakeExecutor>,
    persisted: Arc<InMemoryPersistedState>,
    stack: Arc<StackDefinition>,
    blueprints: Arc<BlueprintRegistry>,
    ops: OpsLog,
}

fn test_stack() -> StackDefinition {
    let mut stack = StackDefinition::new("test-stack", "1.0");
    stack.define_service("service1", ["service1-site"]);
    stack.define_service("service2", ["service2-site"]);
    stack.define_component("component1", "service1", "1").unwrap();
    stack.define_component("component2", "service2", "1+").unwrap();
    stack.define_client_component("client1", "service1", "0+").unwrap();
    stack.set_default_property("service1-site", "s1.prop", "default");
    stack
}

fn test_blueprint() -> Blueprint {
    Blueprint::new("test-bp", StackId::new("test-stack", "1.0"))
        .with_host_group(
            HostGroup::new("masters").with_components(["component1", "client1"]),
        )
        .with_host_group(
            HostGroup::new("workers").with_components(["component2"]),
        )
}

impl TestHarness {
    fn new(test_name: &str) -> TestHarness {
        Self::with_tweaks(test_name, ManagerConfig::default(), true, |_, _| ())
    }

    fn with_tweaks(
        test_name: &str,
        config: ManagerConfig,
        auto_complete: bool,
        tweak: impl FnOnce(&mut FakeContext, &mut FakeExecutor),
    ) -> TestHarness {
        let logctx = test_setup_log(test_name);
        let ops: OpsLog = Arc::new(Mutex::new(Vec::new()));
        let mut context = FakeContext::new(Arc::clone(&ops));
        let mut executor = FakeExecutor::new(Arc::clone(&ops), auto_complete);
        tweak(&mut context, &mut executor);
        let context = Arc::new(context);
        let executor = Arc::new(executor);

        let stack = Arc::new(test_stack());
        let mut registry = BlueprintRegistry::new();
        registry.register(test_blueprint());
        let blueprints = Arc::new(registry);
        let persisted = Arc::new(InMemoryPersistedState::new());

        let manager = TopologyManager::new(
            &logctx.log,
            config,
            Arc::clone(&stack) as Arc<dyn shipwright_types::stack::StackCatalog>,
            Arc::clone(&blueprints)
                as Arc<dyn shipwright_types::blueprint::BlueprintCatalog>,
            Arc::clone(&context) as Arc<dyn ClusterContext>,
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            Arc::clone(&persisted) as Arc<dyn PersistedState>,
        );
        executor.connect(manager.task_event_sender());

        TestHarness {
            logctx,
            manager,
            context,
            executor,
            persisted,
            stack,
            blueprints,
            ops,
        }
    }

    /// Builds a second manager over the same persisted store, as after a
    /// process restart.  The new manager gets its own (empty) executor.
    fn restart(&self, auto_complete: bool) -> (TopologyManager, Arc<FakeExecutor>) {
        let ops: OpsLog = Arc::new(Mutex::new(Vec::new()));
        let context = Arc::new(FakeContext::new(Arc::clone(&ops)));
        let executor = Arc::new(FakeExecutor::new(ops, auto_complete));
        let manager = TopologyManager::new(
            &self.logctx.log,
            ManagerConfig::default(),
            Arc::clone(&self.stack)
                as Arc<dyn shipwright_types::stack::StackCatalog>,
            Arc::clone(&self.blueprints)
                as Arc<dyn shipwright_types::blueprint::BlueprintCatalog>,
            context as Arc<dyn ClusterContext>,
            Arc::clone(&executor) as Arc<dyn CommandExecutor>,
            Arc::clone(&self.persisted) as Arc<dyn PersistedState>,
        );
        executor.connect(manager.task_event_sender());
        (manager, executor)
    }
}

fn provision_request(
    cluster_id: ClusterId,
    groups: &[(&str, &[&str])],
) -> ProvisionClusterRequest {
    ProvisionClusterRequest {
        cluster_id,
        cluster_name: "test-cluster".to_string(),
        blueprint_name: "test-bp".to_string(),
        description: None,
        host_group_info: groups
            .iter()
            .map(|(name, hosts)| {
                (
                    name.to_string(),
                    HostGroupInfo::new(name).with_hosts(hosts.iter().copied()),
                )
            })
            .collect(),
        configuration: Configuration::new(),
        provision_action: ProvisionAction::InstallAndStart,
        config_recommendation_strategy:
            ConfigRecommendationStrategy::NeverApply,
        security: None,
    }
}

async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_provision_cluster_completes() {
    let harness = TestHarness::new("test_provision_cluster_completes");
    let cluster_id = ClusterId::new_v4();
    let request = provision_request(
        cluster_id,
        &[("masters", &["h1"]), ("workers", &["h2"])],
    );

    let response =
        harness.manager.provision_cluster(request, &[]).await.expect("accepted");
    // component1: install + start, client1: install only, component2:
    // install + start.
    assert_eq!(response.tasks.len(), 5);
    assert!(!response.status.is_terminal());

    let manager = &harness.manager;
    wait_until("provision to finish", || async move {
        manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    })
    .await;

    let status = harness
        .manager
        .request_status(response.request_id)
        .await
        .expect("initialized")
        .expect("request tracked");
    assert_eq!(status.status, RequestStatus::Completed);
    assert!(status.tasks.iter().all(|t| t.status == TaskStatus::Completed));

    // Configuration went out before any task was handed to the executor.
    let ops = harness.ops.lock().unwrap();
    assert_eq!(ops[0], "set_configuration");
    assert_eq!(ops.iter().filter(|op| op.starts_with("submit:")).count(), 5);
    drop(ops);

    // The resolved stack default was part of the applied configuration.
    assert!(harness.context.applied_config_types().contains("service1-site"));
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_provision_failure_still_counts_as_finished() {
    let harness = TestHarness::with_tweaks(
        "test_provision_failure_still_counts_as_finished",
        ManagerConfig::default(),
        true,
        |_, executor| executor.fail_component = Some("component2".to_string()),
    );
    let cluster_id = ClusterId::new_v4();
    let request = provision_request(
        cluster_id,
        &[("masters", &["h1"]), ("workers", &["h2"])],
    );
    let response =
        harness.manager.provision_cluster(request, &[]).await.expect("accepted");

    let manager = &harness.manager;
    wait_until("failed provision to finish", || async move {
        manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    })
    .await;
    let status = harness
        .manager
        .request_status(response.request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.status, RequestStatus::Failed);
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_provision_in_progress_until_all_tasks_terminal() {
    // No auto-completion: tasks sit Queued until we deliver events.
    let harness = TestHarness::with_tweaks(
        "test_provision_in_progress_until_all_tasks_terminal",
        ManagerConfig::default(),
        false,
        |_, _| (),
    );
    let cluster_id = ClusterId::new_v4();
    let request = provision_request(cluster_id, &[("masters", &["h1"])]);
    let response =
        harness.manager.provision_cluster(request, &[]).await.expect("accepted");

    // component1 install + start, client1 install.
    let executor = &harness.executor;
    wait_until("tasks to be submitted", || async move {
        executor.submitted_task_ids().len() == 3
    })
    .await;
    assert!(
        !harness
            .manager
            .is_cluster_provision_with_blueprint_finished(cluster_id)
            .await
    );

    // Complete one of three tasks: still in progress.
    let sender = harness.manager.task_event_sender();
    let task_ids = harness.executor.submitted_task_ids();
    sender
        .send(TaskStatusUpdate {
            request_id: response.request_id,
            task_id: task_ids[0],
            status: TaskStatus::Completed,
        })
        .unwrap();
    let manager = &harness.manager;
    wait_until("first completion to apply", || async move {
        let status = manager
            .request_status(response.request_id)
            .await
            .unwrap()
            .unwrap();
        status.tasks.iter().any(|t| t.status == TaskStatus::Completed)
    })
    .await;
    assert!(
        !manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    );

    // Complete the rest: finished.
    for task_id in &task_ids[1..] {
        sender
            .send(TaskStatusUpdate {
                request_id: response.request_id,
                task_id: *task_id,
                status: TaskStatus::Completed,
            })
            .unwrap();
    }
    wait_until("provision to finish", || async move {
        manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    })
    .await;
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_untracked_cluster_answers_false() {
    let harness = TestHarness::new("test_untracked_cluster_answers_false");
    let cluster_id = ClusterId::new_v4();
    assert!(
        !harness
            .manager
            .is_cluster_provision_with_blueprint_finished(cluster_id)
            .await
    );
    assert!(
        !harness
            .manager
            .is_cluster_provision_with_blueprint_tracked(cluster_id)
            .await
    );
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_scale_rejects_host_already_in_cluster() {
    let harness = TestHarness::new("test_scale_rejects_host_already_in_cluster");
    let cluster_id = ClusterId::new_v4();
    let request = provision_request(
        cluster_id,
        &[("masters", &["h1"]), ("workers", &["h2"])],
    );
    harness.manager.provision_cluster(request, &[]).await.expect("accepted");

    let scale = ScaleClusterRequest {
        cluster_id,
        cluster_name: "test-cluster".to_string(),
        blueprint_name: "test-bp".to_string(),
        host_group_info: [(
            "workers".to_string(),
            HostGroupInfo::new("workers").with_hosts(["h1"]),
        )]
        .into_iter()
        .collect(),
    };
    let submitted_before = harness.executor.submitted_task_ids().len();
    let error = harness
        .manager
        .scale_hosts(scale, &[])
        .await
        .expect_err("duplicate host must be rejected");
    assert!(matches!(
        error,
        ProvisionError::InvalidTopology(InvalidTopologyError::DuplicateHost {
            ref host,
            ..
        }) if host == "h1"
    ));
    // Rejected before any task generation.
    assert_eq!(harness.executor.submitted_task_ids().len(), submitted_before);

    // A fresh host scales fine and runs to completion.
    let scale = ScaleClusterRequest {
        cluster_id,
        cluster_name: "test-cluster".to_string(),
        blueprint_name: "test-bp".to_string(),
        host_group_info: [(
            "workers".to_string(),
            HostGroupInfo::new("workers").with_hosts(["h3"]),
        )]
        .into_iter()
        .collect(),
    };
    let response =
        harness.manager.scale_hosts(scale, &[]).await.expect("accepted");
    let manager = &harness.manager;
    wait_until("scale request to finish", || async move {
        let status =
            manager.request_status(response.request_id).await.unwrap().unwrap();
        status.status.is_terminal()
    })
    .await;
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_replay_restores_state_without_redispatch() {
    let harness =
        TestHarness::new("test_replay_restores_state_without_redispatch");
    let cluster_id = ClusterId::new_v4();
    let request = provision_request(
        cluster_id,
        &[("masters", &["h1"]), ("workers", &["h2"])],
    );
    let response =
        harness.manager.provision_cluster(request, &[]).await.expect("accepted");
    let manager = &harness.manager;
    wait_until("provision to finish", || async move {
        manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    })
    .await;

    // "Restart": a second manager over the same persisted store.
    let (restarted, executor2) = harness.restart(true);
    assert!(
        restarted.is_cluster_provision_with_blueprint_finished(cluster_id).await
    );
    let status = restarted
        .request_status(response.request_id)
        .await
        .unwrap()
        .expect("request restored from persisted state");
    assert_eq!(status.status, RequestStatus::Completed);
    assert_eq!(status.tasks.len(), 5);
    // Nothing was re-dispatched for a completed request.
    assert!(executor2.submitted_task_ids().is_empty());

    // Replay is idempotent: asking again changes nothing.
    assert!(
        restarted.is_cluster_provision_with_blueprint_finished(cluster_id).await
    );
    assert!(executor2.submitted_task_ids().is_empty());
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_replay_resubmits_only_undispatched_tasks() {
    let harness =
        TestHarness::new("test_replay_resubmits_only_undispatched_tasks");
    let cluster_id = ClusterId::new_v4();

    // Persist an open request by hand: one task never dispatched, one
    // already queued, one completed.
    let payload = TopologyRequest::Provision(provision_request(
        cluster_id,
        &[("masters", &["h1"])],
    ));
    let topology_entity =
        harness.persisted.persist_topology_request(&payload).unwrap();
    let request_id = harness.persisted.next_request_id();
    let task = |id: u64, command: TaskCommand, status: TaskStatus| TaskEntity {
        id: TaskId(id),
        component: "component1".to_string(),
        command,
        status,
        skip_failure: false,
    };
    let entity = LogicalRequestEntity {
        request_id,
        cluster_id,
        description: "Provision cluster test-cluster".to_string(),
        failure: None,
        host_requests: vec![HostRequestEntity {
            stage_id: 0,
            host_group: "masters".to_string(),
            host: Some("h1".to_string()),
            tasks: vec![
                task(1, TaskCommand::Install, TaskStatus::Completed),
                task(2, TaskCommand::Start, TaskStatus::Queued),
                task(3, TaskCommand::Install, TaskStatus::Pending),
            ],
        }],
    };
    harness
        .persisted
        .persist_logical_request(topology_entity.id, &entity)
        .unwrap();

    let (restarted, executor2) = harness.restart(false);
    // Any query triggers initialization and with it the replay pass.
    let status = restarted
        .request_status(request_id)
        .await
        .unwrap()
        .expect("open request restored");
    assert_eq!(status.status, RequestStatus::InProgress);

    // Exactly the never-dispatched task went out, exactly once.
    let executor2 = &executor2;
    wait_until("replayed task to be resubmitted", || async move {
        !executor2.submitted_task_ids().is_empty()
    })
    .await;
    assert_eq!(executor2.submitted_task_ids(), vec![TaskId(3)]);
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_configuration_failure_fails_request_only() {
    let harness = TestHarness::with_tweaks(
        "test_configuration_failure_fails_request_only",
        ManagerConfig::default(),
        true,
        |context, _| context.fail_configuration = true,
    );
    let cluster_id = ClusterId::new_v4();
    let request = provision_request(
        cluster_id,
        &[("masters", &["h1"]), ("workers", &["h2"])],
    );
    let response =
        harness.manager.provision_cluster(request, &[]).await.expect("accepted");

    let manager = &harness.manager;
    wait_until("config failure to fail the request", || async move {
        let status =
            manager.request_status(response.request_id).await.unwrap().unwrap();
        status.status == RequestStatus::Failed
    })
    .await;
    // No task reached the executor, and the persisted record survived with
    // the failure attached.
    assert!(harness.executor.submitted_task_ids().is_empty());
    let records = harness.persisted.load_all().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].logical[0].failure.is_some());

    // The failed provision still answers the completion query.
    assert!(
        manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    );
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_configuration_resolution_timeout() {
    let harness = TestHarness::with_tweaks(
        "test_configuration_resolution_timeout",
        ManagerConfig {
            config_resolution_timeout: Some(Duration::from_millis(50)),
            ..ManagerConfig::default()
        },
        true,
        |context, _| context.hang_resolution = true,
    );
    let cluster_id = ClusterId::new_v4();
    let request = provision_request(
        cluster_id,
        &[("masters", &["h1"]), ("workers", &["h2"])],
    );
    let response =
        harness.manager.provision_cluster(request, &[]).await.expect("accepted");

    let manager = &harness.manager;
    wait_until("resolution timeout to fail the request", || async move {
        let status =
            manager.request_status(response.request_id).await.unwrap().unwrap();
        status.status == RequestStatus::Failed
    })
    .await;
    assert!(harness.executor.submitted_task_ids().is_empty());
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_kerberos_configuration_applied() {
    let harness = TestHarness::with_tweaks(
        "test_kerberos_configuration_applied",
        ManagerConfig::default(),
        true,
        |context, _| {
            context.kerberos_enabled = true;
            context.kerberos_config.set_property(
                "kerberos-env",
                "realm",
                "EXAMPLE.COM",
            );
        },
    );
    let cluster_id = ClusterId::new_v4();
    let request = provision_request(
        cluster_id,
        &[("masters", &["h1"]), ("workers", &["h2"])],
    );
    harness.manager.provision_cluster(request, &[]).await.expect("accepted");

    let manager = &harness.manager;
    wait_until("provision to finish", || async move {
        manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    })
    .await;
    assert!(harness.context.applied_config_types().contains("kerberos-env"));
    harness.logctx.cleanup_successful();
}

#[tokio::test]
async fn test_host_registered_binds_pending_slot() {
    let harness = TestHarness::new("test_host_registered_binds_pending_slot");
    let cluster_id = ClusterId::new_v4();
    let mut request = provision_request(cluster_id, &[("masters", &["h1"])]);
    request.host_group_info.insert(
        "workers".to_string(),
        HostGroupInfo::new("workers")
            .with_host_count(1)
            .with_predicate("Hosts/cpu_count>8"),
    );
    let response =
        harness.manager.provision_cluster(request, &[]).await.expect("accepted");

    // The explicit host's tasks run, but the pending slot keeps the
    // request open.
    let manager = &harness.manager;
    wait_until("explicit host tasks to complete", || async move {
        let status =
            manager.request_status(response.request_id).await.unwrap().unwrap();
        status.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    })
    .await;
    assert!(
        !manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    );

    // No request is waiting for masters hosts.
    assert!(!manager
        .host_registered(cluster_id, "masters", "h8")
        .await
        .expect("no pending slot is not an error"));

    // A host the cluster already owns is rejected.
    let error = manager
        .host_registered(cluster_id, "workers", "h1")
        .await
        .expect_err("duplicate host");
    assert!(matches!(
        error,
        ProvisionError::InvalidTopology(
            InvalidTopologyError::DuplicateHost { .. }
        )
    ));

    // Binding a fresh host fills the slot and drives the request home.
    assert!(manager
        .host_registered(cluster_id, "workers", "h9")
        .await
        .expect("bind succeeds"));
    wait_until("provision to finish after bind", || async move {
        manager.is_cluster_provision_with_blueprint_finished(cluster_id).await
    })
    .await;
    let status =
        manager.request_status(response.request_id).await.unwrap().unwrap();
    assert!(status.tasks.iter().any(|t| t.host == "h9"));
    harness.logctx.cleanup_successful();
}
