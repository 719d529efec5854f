// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The topology manager
//!
//! Request lifecycle, end to end:
//!
//! 1. `provision_cluster` / `scale_hosts` validate the request shape,
//!    build a [`ClusterTopology`], persist the request *before any side
//!    effect*, derive and persist per-host tasks, and return immediately.
//! 2. A unit of work on the bounded dispatch pool then runs the request's
//!    phases sequentially: the configuration phase
//!    ([`crate::config_request`]), then task submission to the execution
//!    subsystem.  Configuration failures fail the owning request and
//!    nothing else.
//! 3. Task status updates arrive on an event channel and are folded into
//!    aggregate request status by a single aggregation worker.
//!
//! On first use the manager replays persisted, non-terminal requests
//! (see [`crate::replay`]) before serving any query or accepting work.
//!
//! All shared mutable state lives behind one async mutex
//! ([`ManagerState`]); holding it across request acceptance is what
//! serializes concurrent topology-mutating calls against one cluster.

use crate::config_request::ClusterConfigurationRequest;
use crate::context::ClusterContext;
use crate::context::CommandExecutor;
use crate::dispatch::DispatchPool;
use crate::dispatch::DEFAULT_MAX_PARALLELISM;
use crate::logical_request::HostRequest;
use crate::logical_request::LogicalRequest;
use crate::logical_request::RequestKind;
use crate::persist::PersistedState;
use crate::persist::PersistenceError;
use crate::replay;
use crate::replay::PlannedRequest;
use shipwright_topology::tasks;
use shipwright_topology::tasks::CompletedWork;
use shipwright_topology::ClusterTopology;
use shipwright_topology::TopologyValidator;
use shipwright_types::blueprint::BlueprintCatalog;
use shipwright_types::error::InvalidTopologyError;
use shipwright_types::error::NoSuchStackError;
use shipwright_types::error::ProvisionError;
use shipwright_types::ids::ClusterId;
use shipwright_types::ids::RequestId;
use shipwright_types::request::HostSelection;
use shipwright_types::request::ProvisionClusterRequest;
use shipwright_types::request::ScaleClusterRequest;
use shipwright_types::request::TopologyRequest;
use shipwright_types::stack::StackCatalog;
use shipwright_types::task::RequestStatus;
use shipwright_types::task::RequestStatusResponse;
use shipwright_types::task::Task;
use shipwright_types::task::TaskStatus;
use shipwright_types::task::TaskStatusUpdate;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

/// Tunables for the topology manager
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Maximum concurrently executing asynchronous units of work
    pub max_parallelism: usize,
    /// Bound on the configuration-resolution wait.  `None` waits
    /// indefinitely; deployments that want hung recommendation steps to
    /// fail the owning request opt in here.
    pub config_resolution_timeout: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> ManagerConfig {
        ManagerConfig {
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            config_resolution_timeout: None,
        }
    }
}

#[derive(Default)]
struct ManagerState {
    /// Every tracked logical request, live and terminal.  Terminal
    /// requests are never removed; the blueprint-completion query needs
    /// them.
    requests: BTreeMap<RequestId, LogicalRequest>,
    /// The distinguished blueprint-provision (first) request per cluster
    provision_requests: BTreeMap<ClusterId, RequestId>,
    /// FQDNs known to belong to each cluster, including hosts reserved by
    /// in-flight requests; the duplicate-host check for scale-ups reads
    /// this
    cluster_hosts: BTreeMap<ClusterId, BTreeSet<String>>,
}

struct Inner {
    log: Logger,
    config: ManagerConfig,
    stack: Arc<dyn StackCatalog>,
    blueprints: Arc<dyn BlueprintCatalog>,
    context: Arc<dyn ClusterContext>,
    executor: Arc<dyn CommandExecutor>,
    persisted: Arc<dyn PersistedState>,
    pool: DispatchPool,
    state: Mutex<ManagerState>,
    init: OnceCell<()>,
}

/// Orchestrates cluster provisioning and scaling requests
///
/// Cheap to clone the `Arc`s it holds; all collaborators are supplied at
/// construction and there is no global lookup anywhere.
pub struct TopologyManager {
    inner: Arc<Inner>,
    event_tx: mpsc::UnboundedSender<TaskStatusUpdate>,
    _aggregator: JoinHandle<()>,
}

impl TopologyManager {
    pub fn new(
        log: &Logger,
        config: ManagerConfig,
        stack: Arc<dyn StackCatalog>,
        blueprints: Arc<dyn BlueprintCatalog>,
        context: Arc<dyn ClusterContext>,
        executor: Arc<dyn CommandExecutor>,
        persisted: Arc<dyn PersistedState>,
    ) -> TopologyManager {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let pool = DispatchPool::new(config.max_parallelism);
        let inner = Arc::new(Inner {
            log: log.new(o!("component" => "TopologyManager")),
            config,
            stack,
            blueprints,
            context,
            executor,
            persisted,
            pool,
            state: Mutex::new(ManagerState::default()),
            init: OnceCell::new(),
        });

        // The single aggregation worker: every task status update funnels
        // through here, which is what keeps request-state mutation off of
        // arbitrary executor threads.
        let aggregator = tokio::spawn({
            let inner = Arc::clone(&inner);
            async move {
                while let Some(update) = event_rx.recv().await {
                    inner.apply_task_status(update).await;
                }
            }
        });

        TopologyManager { inner, event_tx, _aggregator: aggregator }
    }

    /// Channel on which the execution subsystem delivers task status
    /// updates
    pub fn task_event_sender(&self) -> mpsc::UnboundedSender<TaskStatusUpdate> {
        self.event_tx.clone()
    }

    /// Accepts a cluster provisioning request.
    ///
    /// Returns as soon as the request is validated, persisted, and its
    /// asynchronous phases are submitted; the response is an initial
    /// progress snapshot, not a completion.
    pub async fn provision_cluster(
        &self,
        request: ProvisionClusterRequest,
        validators: &[Box<dyn TopologyValidator>],
    ) -> Result<RequestStatusResponse, ProvisionError> {
        let inner = &self.inner;
        inner.ensure_initialized().await?;
        request.validate()?;
        let blueprint = inner.blueprints.lookup(&request.blueprint_name)?;
        if blueprint.stack_id != *inner.stack.stack_id() {
            return Err(NoSuchStackError {
                name: blueprint.stack_id.name.clone(),
                version: blueprint.stack_id.version.clone(),
            }
            .into());
        }
        blueprint.validate(&*inner.stack)?;

        // Acceptance runs entirely under the state lock; concurrent
        // topology-mutating calls against the same cluster serialize here.
        let mut state = inner.state.lock().await;
        let topology = Arc::new(ClusterTopology::new(
            &inner.log,
            Arc::clone(&blueprint),
            &*inner.stack,
            &request,
            validators,
        )?);
        let payload = TopologyRequest::Provision(request);
        let (request_id, response) = inner.accept_request(
            &mut state,
            RequestKind::Provision,
            payload,
            Arc::clone(&topology),
        )?;
        drop(state);

        inner.spawn_request_phases(request_id, topology);
        Ok(response)
    }

    /// Accepts a request to add hosts to an existing cluster.
    ///
    /// A host already belonging to the cluster (including hosts reserved
    /// by in-flight requests) is rejected with
    /// [`InvalidTopologyError::DuplicateHost`] before anything is
    /// persisted.
    pub async fn scale_hosts(
        &self,
        request: ScaleClusterRequest,
        validators: &[Box<dyn TopologyValidator>],
    ) -> Result<RequestStatusResponse, ProvisionError> {
        let inner = &self.inner;
        inner.ensure_initialized().await?;
        request.validate()?;
        let blueprint = inner.blueprints.lookup(&request.blueprint_name)?;
        if blueprint.stack_id != *inner.stack.stack_id() {
            return Err(NoSuchStackError {
                name: blueprint.stack_id.name.clone(),
                version: blueprint.stack_id.version.clone(),
            }
            .into());
        }
        blueprint.validate(&*inner.stack)?;

        let mut state = inner.state.lock().await;
        let existing_hosts = state
            .cluster_hosts
            .get(&request.cluster_id)
            .cloned()
            .unwrap_or_default();
        let topology = Arc::new(ClusterTopology::for_scale(
            &inner.log,
            Arc::clone(&blueprint),
            &*inner.stack,
            &request,
            &existing_hosts,
            validators,
        )?);
        let payload = TopologyRequest::Scale(request);
        let (request_id, response) = inner.accept_request(
            &mut state,
            RequestKind::Scale,
            payload,
            Arc::clone(&topology),
        )?;
        drop(state);

        inner.spawn_request_phases(request_id, topology);
        Ok(response)
    }

    /// Progress snapshot for one request; `None` for an id the manager has
    /// never tracked
    pub async fn request_status(
        &self,
        request_id: RequestId,
    ) -> Result<Option<RequestStatusResponse>, ProvisionError> {
        self.inner.ensure_initialized().await?;
        let state = self.inner.state.lock().await;
        Ok(state
            .requests
            .get(&request_id)
            .map(LogicalRequest::request_status))
    }

    /// Whether the cluster's blueprint-provision request has reached a
    /// terminal status.
    ///
    /// True only for the distinguished first (provision) request -- a
    /// terminal failure counts as finished.  A cluster with no tracked
    /// provision request answers false, not an error.
    pub async fn is_cluster_provision_with_blueprint_finished(
        &self,
        cluster_id: ClusterId,
    ) -> bool {
        if let Err(error) = self.inner.ensure_initialized().await {
            warn!(
                self.inner.log,
                "completion query before successful initialization";
                "error" => %InlineErrorChain::new(&error),
            );
            return false;
        }
        let state = self.inner.state.lock().await;
        match state.provision_requests.get(&cluster_id) {
            Some(request_id) => state
                .requests
                .get(request_id)
                .map_or(false, LogicalRequest::is_finished),
            None => false,
        }
    }

    /// Whether the manager is tracking a blueprint-provision request for
    /// this cluster at all
    pub async fn is_cluster_provision_with_blueprint_tracked(
        &self,
        cluster_id: ClusterId,
    ) -> bool {
        if self.inner.ensure_initialized().await.is_err() {
            return false;
        }
        let state = self.inner.state.lock().await;
        state.provision_requests.contains_key(&cluster_id)
    }

    /// Offers a newly registered host to the oldest open request with a
    /// predicate-pending slot in `host_group`.
    ///
    /// Returns true if the host was bound (its tasks are created, and
    /// dispatched once the owning request is past its configuration
    /// phase); false if no request is waiting for a host in that group.
    pub async fn host_registered(
        &self,
        cluster_id: ClusterId,
        host_group: &str,
        host: &str,
    ) -> Result<bool, ProvisionError> {
        let inner = &self.inner;
        inner.ensure_initialized().await?;

        let mut guard = inner.state.lock().await;
        let state = &mut *guard;
        if state
            .cluster_hosts
            .get(&cluster_id)
            .map_or(false, |hosts| hosts.contains(host))
        {
            let cluster_name = state
                .requests
                .values()
                .find(|r| r.cluster_id() == cluster_id)
                .map(|r| r.topology().cluster_name().to_string())
                .unwrap_or_default();
            return Err(InvalidTopologyError::DuplicateHost {
                cluster_name,
                host: host.to_string(),
            }
            .into());
        }

        let Some(request_id) = state
            .requests
            .iter()
            .find(|(_, request)| {
                request.cluster_id() == cluster_id
                    && !request.is_finished()
                    && request.has_pending_host_request(host_group)
            })
            .map(|(id, _)| *id)
        else {
            return Ok(false);
        };
        let request =
            state.requests.get_mut(&request_id).expect("request id just found");

        let topology = Arc::clone(request.topology());
        let stage_id = request
            .host_requests()
            .iter()
            .find(|hr| {
                hr.host_group == host_group && hr.is_pending_host_assignment()
            })
            .map(|hr| hr.stage_id)
            .expect("pending host request just found");

        let specs = tasks::build_tasks_for_host(
            &topology,
            &*inner.stack,
            host_group,
            host,
            &CompletedWork::new(),
        );
        let new_tasks: Vec<Task> = specs
            .into_iter()
            .map(|spec| {
                inner.context.create_task(
                    request_id,
                    stage_id,
                    &spec.host,
                    &spec.component,
                    spec.command,
                    false,
                )
            })
            .collect();

        // Tasks bound before the configuration phase completes stay
        // Pending; the dispatch step picks them up.  Past that point we
        // must deliver them ourselves.
        let deliver_now = !matches!(
            request.phase(),
            RequestStatus::Created | RequestStatus::ConfigPending
        );
        let to_submit: Vec<Task> =
            if deliver_now { new_tasks.clone() } else { Vec::new() };

        let bound = request.bind_host(host_group, host, new_tasks);
        assert!(bound, "pending host request vanished while lock was held");
        let topology_request_id = request.topology_request_id();
        let entity = request.to_entity();

        state
            .cluster_hosts
            .entry(cluster_id)
            .or_default()
            .insert(host.to_string());
        inner.persisted.persist_logical_request(topology_request_id, &entity)?;
        info!(
            inner.log, "bound registered host to pending host request";
            "request_id" => %request_id,
            "host_group" => host_group,
            "host" => host,
        );
        drop(guard);

        for task in to_submit {
            inner.submit_task(request_id, &task).await;
        }
        Ok(true)
    }
}

impl Inner {
    async fn ensure_initialized(self: &Arc<Self>) -> Result<(), ProvisionError> {
        let inner = Arc::clone(self);
        self.init
            .get_or_try_init(|| async move { inner.replay().await })
            .await?;
        Ok(())
    }

    /// Rebuilds in-memory orchestration state from persisted records.
    /// Runs at most once per process; bookkeeping only, except that tasks
    /// persisted as never-dispatched are (re)submitted.
    async fn replay(&self) -> Result<(), PersistenceError> {
        let records = self.persisted.load_all()?;
        let plan = replay::Plan::new(&self.log, &records);
        info!(
            self.log, "replaying persisted topology state";
            "open" => plan.nopen(),
            "terminal" => plan.nterminal(),
        );

        let mut to_submit: Vec<(RequestId, Task)> = Vec::new();
        {
            let mut state = self.state.lock().await;
            for planned in plan.terminal_requests() {
                self.register_replayed(&mut state, planned, false, &mut to_submit);
            }
            for planned in plan.open_requests() {
                self.register_replayed(&mut state, planned, true, &mut to_submit);
            }

            let clusters: BTreeSet<ClusterId> =
                state.requests.values().map(LogicalRequest::cluster_id).collect();
            for cluster_id in clusters {
                if let Some(provision_id) =
                    self.persisted.provision_request_id(cluster_id)?
                {
                    state.provision_requests.insert(cluster_id, provision_id);
                }
            }
        }

        for (request_id, task) in to_submit {
            self.submit_task(request_id, &task).await;
        }
        Ok(())
    }

    fn register_replayed(
        &self,
        state: &mut ManagerState,
        planned: &PlannedRequest,
        open: bool,
        to_submit: &mut Vec<(RequestId, Task)>,
    ) {
        let blueprint_name = planned.payload.blueprint_name();
        let Some(blueprint) = self.blueprints.blueprint(blueprint_name) else {
            warn!(
                self.log,
                "skipping persisted request whose blueprint is not registered";
                "request_id" => %planned.entity.request_id,
                "blueprint" => blueprint_name,
            );
            return;
        };
        let topology =
            Arc::new(ClusterTopology::rehydrate(blueprint, &planned.payload));
        let kind = if planned.payload.is_provision() {
            RequestKind::Provision
        } else {
            RequestKind::Scale
        };
        let request = LogicalRequest::from_entity(
            &planned.entity,
            kind,
            planned.topology_request_id,
            topology,
        );

        if open {
            let undispatched = replay::undispatched_task_ids(&planned.entity);
            for task in
                request.tasks().filter(|task| undispatched.contains(&task.id))
            {
                to_submit.push((request.request_id(), task.clone()));
            }
        }

        state
            .cluster_hosts
            .entry(request.cluster_id())
            .or_default()
            .extend(request.resolved_hosts());
        let request_id = request.request_id();
        if state.requests.insert(request_id, request).is_some() {
            warn!(
                self.log, "duplicate persisted request during replay";
                "request_id" => %request_id,
            );
        }
    }

    /// Persists and registers an accepted request.  Caller holds the state
    /// lock; nothing here blocks.
    fn accept_request(
        &self,
        state: &mut ManagerState,
        kind: RequestKind,
        payload: TopologyRequest,
        topology: Arc<ClusterTopology>,
    ) -> Result<(RequestId, RequestStatusResponse), ProvisionError> {
        // The durable record comes first: a crash after this point is
        // recoverable by replay, a crash before it never happened.
        let topology_entity =
            self.persisted.persist_topology_request(&payload)?;
        let request_id = self.persisted.next_request_id();

        let no_completed_work = CompletedWork::new();
        let mut host_requests = Vec::new();
        let mut stage_id = 0;
        for (group_name, info) in topology.host_group_info() {
            for host in &info.hosts {
                let specs = tasks::build_tasks_for_host(
                    &topology,
                    &*self.stack,
                    group_name,
                    host,
                    &no_completed_work,
                );
                let host_tasks: Vec<Task> = specs
                    .into_iter()
                    .map(|spec| {
                        self.context.create_task(
                            request_id,
                            stage_id,
                            &spec.host,
                            &spec.component,
                            spec.command,
                            false,
                        )
                    })
                    .collect();
                host_requests.push(HostRequest {
                    stage_id,
                    host_group: group_name.clone(),
                    host: Some(host.clone()),
                    tasks: host_tasks,
                });
                stage_id += 1;
            }

            // One empty slot per requested-but-unresolved host; the host
            // layer fills these through `host_registered`.
            if let Ok(HostSelection::HostCount { requested, .. }) =
                info.host_selection()
            {
                for _ in 0..requested {
                    host_requests.push(HostRequest {
                        stage_id,
                        host_group: group_name.clone(),
                        host: None,
                        tasks: Vec::new(),
                    });
                    stage_id += 1;
                }
            }
        }

        let description = match &payload {
            TopologyRequest::Provision(r) => {
                r.description.clone().unwrap_or_else(|| {
                    format!("Provision cluster {}", r.cluster_name)
                })
            }
            TopologyRequest::Scale(r) => {
                format!("Scale cluster {}", r.cluster_name)
            }
        };
        let request = LogicalRequest::new(
            request_id,
            kind,
            description,
            topology_entity.id,
            Arc::clone(&topology),
            host_requests,
        );
        self.persisted
            .persist_logical_request(topology_entity.id, &request.to_entity())?;

        let cluster_id = topology.cluster_id();
        state
            .cluster_hosts
            .entry(cluster_id)
            .or_default()
            .extend(topology.all_hosts());
        if matches!(kind, RequestKind::Provision) {
            state.provision_requests.entry(cluster_id).or_insert(request_id);
        }

        info!(
            self.log, "accepted topology request";
            "request_id" => %request_id,
            "cluster_id" => %cluster_id,
            "kind" => ?kind,
            "tasks" => request.tasks().count(),
        );
        let response = request.request_status();
        state.requests.insert(request_id, request);
        Ok((request_id, response))
    }

    fn spawn_request_phases(
        self: &Arc<Self>,
        request_id: RequestId,
        topology: Arc<ClusterTopology>,
    ) {
        let inner = Arc::clone(self);
        let _handle = self.pool.spawn(async move {
            inner.run_request_phases(request_id, topology).await;
        });
    }

    /// Phases are strictly sequential for one request: configuration must
    /// be durably applied before any host task is dispatched.
    async fn run_request_phases(
        self: Arc<Self>,
        request_id: RequestId,
        topology: Arc<ClusterTopology>,
    ) {
        let log = self.log.new(o!("request_id" => request_id.to_string()));
        {
            let mut state = self.state.lock().await;
            if let Some(request) = state.requests.get_mut(&request_id) {
                request.set_phase(RequestStatus::ConfigPending);
            }
        }

        let config_request = ClusterConfigurationRequest::new(
            log.clone(),
            Arc::clone(&topology),
            Arc::clone(&self.stack),
        );
        if let Err(config_error) = config_request
            .process(&*self.context, self.config.config_resolution_timeout)
            .await
        {
            warn!(
                log, "configuration phase failed; failing request";
                "error" => %InlineErrorChain::new(&config_error),
            );
            let mut state = self.state.lock().await;
            if let Some(request) = state.requests.get_mut(&request_id) {
                request.record_failure(config_error.to_string());
            }
            if let Err(persist_error) = self
                .persisted
                .mark_request_failed(request_id, &config_error.to_string())
            {
                warn!(
                    log, "failed to record request failure durably";
                    "error" => %InlineErrorChain::new(&persist_error),
                );
            }
            return;
        }

        self.dispatch_tasks(&log, request_id).await;
    }

    async fn dispatch_tasks(&self, log: &Logger, request_id: RequestId) {
        let to_submit: Vec<Task> = {
            let mut state = self.state.lock().await;
            let Some(request) = state.requests.get_mut(&request_id) else {
                return;
            };
            request.set_phase(RequestStatus::Dispatched);
            request
                .tasks()
                .filter(|task| task.status == TaskStatus::Pending)
                .cloned()
                .collect()
        };
        info!(log, "dispatching host tasks"; "count" => to_submit.len());
        for task in to_submit {
            self.submit_task(request_id, &task).await;
        }
    }

    async fn submit_task(&self, request_id: RequestId, task: &Task) {
        match self.executor.submit(request_id, task).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                let Some(request) = state.requests.get_mut(&request_id) else {
                    return;
                };
                if request.mark_task_queued(task.id) {
                    if let Err(error) = self.persisted.update_task_status(
                        request_id,
                        task.id,
                        TaskStatus::Queued,
                    ) {
                        warn!(
                            self.log, "failed to persist task status";
                            "task_id" => %task.id,
                            "error" => %InlineErrorChain::new(&error),
                        );
                    }
                }
            }
            Err(submit_error) => {
                // Submission failures are task failures, not orchestrator
                // failures; they surface through aggregate status.
                error!(
                    self.log, "failed to submit task; marking it failed";
                    "request_id" => %request_id,
                    "task_id" => %task.id,
                    "error" => %InlineErrorChain::new(&submit_error),
                );
                self.apply_task_status(TaskStatusUpdate {
                    request_id,
                    task_id: task.id,
                    status: TaskStatus::Failed,
                })
                .await;
            }
        }
    }

    /// Folds one task status update into the owning request.  Runs only on
    /// the aggregation worker (or the submit path above), never on
    /// executor threads.
    async fn apply_task_status(&self, update: TaskStatusUpdate) {
        let mut state = self.state.lock().await;
        let Some(request) = state.requests.get_mut(&update.request_id) else {
            warn!(
                self.log, "task status update for unknown request";
                "request_id" => %update.request_id,
                "task_id" => %update.task_id,
            );
            return;
        };
        let was_finished = request.is_finished();
        if !request.update_task_status(update.task_id, update.status) {
            warn!(
                self.log, "task status update for unknown task";
                "request_id" => %update.request_id,
                "task_id" => %update.task_id,
            );
            return;
        }
        if let Err(error) = self.persisted.update_task_status(
            update.request_id,
            update.task_id,
            update.status,
        ) {
            warn!(
                self.log, "failed to persist task status";
                "task_id" => %update.task_id,
                "error" => %InlineErrorChain::new(&error),
            );
        }

        let status = request.status();
        debug!(
            self.log, "applied task status update";
            "request_id" => %update.request_id,
            "task_id" => %update.task_id,
            "task_status" => %update.status,
            "request_status" => %status,
        );
        if !was_finished && status.is_terminal() {
            info!(
                self.log, "logical request finished";
                "request_id" => %update.request_id,
                "status" => %status,
            );
        }
    }
}
