// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guts of persisted-state replay
//!
//! At startup the orchestrator loads every persisted request and builds a
//! [`Plan`] describing what to do with each one: terminal requests are
//! registered for the completion query only; open requests are
//! reconstructed with their last-known task statuses and re-registered for
//! completion events.  Replay rebuilds bookkeeping, never side effects: it
//! does not re-run configuration resolution, and the only tasks it hands
//! back for submission are those persisted as `Pending` -- created before
//! the crash but never dispatched.

use crate::persist::LogicalRequestEntity;
use crate::persist::PersistedRequest;
use crate::persist::TaskEntity;
use shipwright_types::ids::RequestId;
use shipwright_types::ids::TaskId;
use shipwright_types::request::TopologyRequest;
use shipwright_types::task::RequestStatus;
use shipwright_types::task::TaskStatus;
use slog::debug;
use slog::info;
use slog::Logger;
use std::collections::BTreeMap;

/// One persisted logical request together with its owning topology request
#[derive(Clone, Debug)]
pub struct PlannedRequest {
    pub topology_request_id: u64,
    pub payload: TopologyRequest,
    pub entity: LogicalRequestEntity,
}

/// Last-known aggregate status of a persisted request
///
/// Mirrors the in-memory aggregation rule, applied to entities: a recorded
/// request-level failure is terminal; otherwise a pending host slot keeps
/// the request open, any failed non-skip-failure task fails it, and
/// all-terminal tasks complete it.
pub fn entity_status(entity: &LogicalRequestEntity) -> RequestStatus {
    if entity.failure.is_some() {
        return RequestStatus::Failed;
    }
    if entity.host_requests.iter().any(|hr| hr.host.is_none()) {
        return RequestStatus::InProgress;
    }
    let tasks: Vec<&TaskEntity> =
        entity.host_requests.iter().flat_map(|hr| hr.tasks.iter()).collect();
    if tasks
        .iter()
        .any(|task| task.status.is_failed() && !task.skip_failure)
    {
        return RequestStatus::Failed;
    }
    if tasks.iter().all(|task| task.status.is_terminal()) {
        return RequestStatus::Completed;
    }
    RequestStatus::InProgress
}

/// Tasks of an open request that were created but never handed to the
/// execution subsystem; replay resubmits exactly these
pub fn undispatched_task_ids(entity: &LogicalRequestEntity) -> Vec<TaskId> {
    entity
        .host_requests
        .iter()
        .flat_map(|hr| hr.tasks.iter())
        .filter(|task| task.status == TaskStatus::Pending)
        .map(|task| task.id)
        .collect()
}

/// Describes what should happen with each persisted request
pub struct Plan {
    open: BTreeMap<RequestId, PlannedRequest>,
    terminal: BTreeMap<RequestId, PlannedRequest>,
}

impl Plan {
    /// Classifies every persisted request from one `load_all()` snapshot.
    pub fn new(log: &Logger, records: &[PersistedRequest]) -> Plan {
        let mut builder = PlanBuilder::new(log);
        for record in records {
            for logical in &record.logical {
                let planned = PlannedRequest {
                    topology_request_id: record.topology.id,
                    payload: record.topology.payload.clone(),
                    entity: logical.clone(),
                };
                if entity_status(logical).is_terminal() {
                    builder.request_terminal(planned);
                } else {
                    builder.request_open(planned);
                }
            }
        }
        builder.build()
    }

    /// Iterate over the requests to reconstruct and re-register, oldest
    /// first
    pub fn open_requests(&self) -> impl Iterator<Item = &PlannedRequest> {
        self.open.values()
    }

    /// Iterate over the requests kept only for the completion query
    pub fn terminal_requests(&self) -> impl Iterator<Item = &PlannedRequest> {
        self.terminal.values()
    }

    pub fn nopen(&self) -> usize {
        self.open.len()
    }

    pub fn nterminal(&self) -> usize {
        self.terminal.len()
    }
}

/// Internal helper used to construct `Plan`
struct PlanBuilder<'a> {
    log: &'a Logger,
    open: BTreeMap<RequestId, PlannedRequest>,
    terminal: BTreeMap<RequestId, PlannedRequest>,
}

impl<'a> PlanBuilder<'a> {
    fn new(log: &'a Logger) -> PlanBuilder<'a> {
        PlanBuilder { log, open: BTreeMap::new(), terminal: BTreeMap::new() }
    }

    fn build(self) -> Plan {
        Plan { open: self.open, terminal: self.terminal }
    }

    /// Record that this request is still in flight and must be
    /// reconstructed and re-registered for completion events
    fn request_open(&mut self, planned: PlannedRequest) {
        let request_id = planned.entity.request_id;
        info!(
            self.log,
            "found persisted request that is still open";
            "request_id" => %request_id,
            "cluster_id" => %planned.entity.cluster_id,
            "undispatched_tasks" => undispatched_task_ids(&planned.entity).len(),
        );
        assert!(!self.terminal.contains_key(&request_id));
        assert!(self.open.insert(request_id, planned).is_none());
    }

    /// Record that this request already reached a terminal status; only the
    /// completion query needs it
    fn request_terminal(&mut self, planned: PlannedRequest) {
        let request_id = planned.entity.request_id;
        debug!(
            self.log,
            "found persisted request that is already terminal";
            "request_id" => %request_id,
            "cluster_id" => %planned.entity.cluster_id,
        );
        assert!(!self.open.contains_key(&request_id));
        assert!(self.terminal.insert(request_id, planned).is_none());
    }
}
