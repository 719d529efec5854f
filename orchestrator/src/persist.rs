// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable request state
//!
//! The relational storage layer is outside this system; the orchestrator
//! sees it through [`PersistedState`].  The entities here are the
//! semantic contract: each must round-trip `{request id, cluster id,
//! topology payload, per-host task statuses}` losslessly, because replay
//! (see [`crate::replay`]) rebuilds all in-memory orchestration state from
//! them after a restart.
//!
//! [`InMemoryPersistedState`] is the in-process implementation used by
//! tests and development tooling.  It stores records as serialized JSON
//! documents rather than live objects, so the serde round-trip the
//! production store depends on is exercised on every operation.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use shipwright_types::error::ProvisionError;
use shipwright_types::ids::ClusterId;
use shipwright_types::ids::RequestId;
use shipwright_types::ids::TaskId;
use shipwright_types::request::TopologyRequest;
use shipwright_types::task::TaskCommand;
use shipwright_types::task::TaskStatus;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Durable form of one task
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskEntity {
    pub id: TaskId,
    pub component: String,
    pub command: TaskCommand,
    pub status: TaskStatus,
    pub skip_failure: bool,
}

/// Durable form of one host's worth of work
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HostRequestEntity {
    pub stage_id: u64,
    pub host_group: String,
    /// `None` while the host is still predicate-pending
    pub host: Option<String>,
    pub tasks: Vec<TaskEntity>,
}

/// Durable form of one logical request
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogicalRequestEntity {
    pub request_id: RequestId,
    pub cluster_id: ClusterId,
    pub description: String,
    /// Set when the request failed outside task execution (configuration
    /// phase); such a request is terminal regardless of task statuses.
    pub failure: Option<String>,
    pub host_requests: Vec<HostRequestEntity>,
}

/// Durable form of an accepted topology request
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopologyRequestEntity {
    pub id: u64,
    pub cluster_id: ClusterId,
    pub payload: TopologyRequest,
    pub time_created: DateTime<Utc>,
}

/// One topology request and its logical requests, as loaded at startup
#[derive(Clone, Debug)]
pub struct PersistedRequest {
    pub topology: TopologyRequestEntity,
    pub logical: Vec<LogicalRequestEntity>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to serialize persisted record")]
    Serialization(#[from] serde_json::Error),

    #[error("no persisted topology request with id {id}")]
    NoSuchTopologyRequest { id: u64 },

    #[error("no persisted logical request with id {request_id}")]
    NoSuchLogicalRequest { request_id: RequestId },

    #[error("persisted-state store unavailable: {message}")]
    Unavailable { message: String },
}

impl From<PersistenceError> for ProvisionError {
    fn from(error: PersistenceError) -> ProvisionError {
        ProvisionError::Persistence { message: error.to_string() }
    }
}

/// Storage-layer boundary for request state
///
/// `persist_topology_request` must be called (and must succeed) before any
/// side effect of a request; `persist_logical_request` upserts, so binding
/// a predicate-pending host re-persists the whole logical request.
pub trait PersistedState: Send + Sync {
    /// Issues the next logical request id; monotonic across restarts.
    fn next_request_id(&self) -> RequestId;

    fn persist_topology_request(
        &self,
        payload: &TopologyRequest,
    ) -> Result<TopologyRequestEntity, PersistenceError>;

    fn persist_logical_request(
        &self,
        topology_request_id: u64,
        entity: &LogicalRequestEntity,
    ) -> Result<(), PersistenceError>;

    /// Records a task status change so replay sees last-known statuses.
    fn update_task_status(
        &self,
        request_id: RequestId,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<(), PersistenceError>;

    /// Records a request-level (configuration phase) failure.
    fn mark_request_failed(
        &self,
        request_id: RequestId,
        message: &str,
    ) -> Result<(), PersistenceError>;

    /// Loads every persisted request; consumed once at orchestrator
    /// initialization.
    fn load_all(&self) -> Result<Vec<PersistedRequest>, PersistenceError>;

    /// Id of the distinguished blueprint-provision (first) logical request
    /// for a cluster, if any
    fn provision_request_id(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Option<RequestId>, PersistenceError>;
}

#[derive(Debug)]
struct StoredTopologyRequest {
    /// serialized `TopologyRequestEntity`
    document: serde_json::Value,
    /// serialized `LogicalRequestEntity`, keyed by request id
    logical: BTreeMap<RequestId, serde_json::Value>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    requests: BTreeMap<u64, StoredTopologyRequest>,
    provision_requests: BTreeMap<ClusterId, RequestId>,
}

/// In-memory [`PersistedState`], storing serialized documents
#[derive(Debug, Default)]
pub struct InMemoryPersistedState {
    inner: Mutex<Inner>,
}

impl InMemoryPersistedState {
    pub fn new() -> InMemoryPersistedState {
        InMemoryPersistedState::default()
    }
}

impl InMemoryPersistedState {
    fn with_logical_document<T>(
        &self,
        request_id: RequestId,
        mutate: impl FnOnce(&mut LogicalRequestEntity) -> T,
    ) -> Result<T, PersistenceError> {
        let mut inner = self.inner.lock().unwrap();
        for stored in inner.requests.values_mut() {
            if let Some(document) = stored.logical.get_mut(&request_id) {
                let mut entity: LogicalRequestEntity =
                    serde_json::from_value(document.clone())?;
                let result = mutate(&mut entity);
                *document = serde_json::to_value(&entity)?;
                return Ok(result);
            }
        }
        Err(PersistenceError::NoSuchLogicalRequest { request_id })
    }
}

impl PersistedState for InMemoryPersistedState {
    fn next_request_id(&self) -> RequestId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        RequestId(inner.next_id)
    }

    fn persist_topology_request(
        &self,
        payload: &TopologyRequest,
    ) -> Result<TopologyRequestEntity, PersistenceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let entity = TopologyRequestEntity {
            id: inner.next_id,
            cluster_id: payload.cluster_id(),
            payload: payload.clone(),
            time_created: Utc::now(),
        };
        let document = serde_json::to_value(&entity)?;
        inner.requests.insert(
            entity.id,
            StoredTopologyRequest { document, logical: BTreeMap::new() },
        );
        Ok(entity)
    }

    fn persist_logical_request(
        &self,
        topology_request_id: u64,
        entity: &LogicalRequestEntity,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().unwrap();
        let is_provision = {
            let stored = inner
                .requests
                .get(&topology_request_id)
                .ok_or(PersistenceError::NoSuchTopologyRequest {
                    id: topology_request_id,
                })?;
            let topology: TopologyRequestEntity =
                serde_json::from_value(stored.document.clone())?;
            topology.payload.is_provision()
        };
        let document = serde_json::to_value(entity)?;
        let stored = inner
            .requests
            .get_mut(&topology_request_id)
            .expect("checked above");
        stored.logical.insert(entity.request_id, document);
        if is_provision {
            inner
                .provision_requests
                .entry(entity.cluster_id)
                .or_insert(entity.request_id);
        }
        Ok(())
    }

    fn update_task_status(
        &self,
        request_id: RequestId,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<(), PersistenceError> {
        self.with_logical_document(request_id, |entity| {
            for host_request in &mut entity.host_requests {
                for task in &mut host_request.tasks {
                    if task.id == task_id {
                        task.status = status;
                        return;
                    }
                }
            }
        })
    }

    fn mark_request_failed(
        &self,
        request_id: RequestId,
        message: &str,
    ) -> Result<(), PersistenceError> {
        self.with_logical_document(request_id, |entity| {
            entity.failure = Some(message.to_string());
        })
    }

    fn load_all(&self) -> Result<Vec<PersistedRequest>, PersistenceError> {
        let inner = self.inner.lock().unwrap();
        let mut records = Vec::with_capacity(inner.requests.len());
        for stored in inner.requests.values() {
            let topology: TopologyRequestEntity =
                serde_json::from_value(stored.document.clone())?;
            let mut logical = Vec::with_capacity(stored.logical.len());
            for document in stored.logical.values() {
                logical.push(serde_json::from_value(document.clone())?);
            }
            records.push(PersistedRequest { topology, logical });
        }
        Ok(records)
    }

    fn provision_request_id(
        &self,
        cluster_id: ClusterId,
    ) -> Result<Option<RequestId>, PersistenceError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.provision_requests.get(&cluster_id).copied())
    }
}
