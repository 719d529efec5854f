// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundary traits for the orchestrator's collaborators
//!
//! The cluster-management layer and the command-execution subsystem are
//! outside this system.  The orchestrator talks to them through
//! [`ClusterContext`] and [`CommandExecutor`], handed in at construction
//! time; tests substitute fakes.

use async_trait::async_trait;
use shipwright_types::config::Configuration;
use shipwright_types::error::ConfigurationTopologyError;
use shipwright_types::ids::ClusterId;
use shipwright_types::ids::RequestId;
use shipwright_types::ids::TaskId;
use shipwright_types::task::Task;
use shipwright_types::task::TaskCommand;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// One config type's worth of settings to apply to a cluster
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigurationRequest {
    pub cluster_name: String,
    /// `None` for cluster-scoped settings; a group name for settings that
    /// apply only to that host group's hosts
    pub host_group: Option<String>,
    pub config_type: String,
    pub properties: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, BTreeMap<String, String>>,
}

/// Cluster-management operations the orchestrator consumes
///
/// The configuration methods back the asynchronous configuration phase of
/// each request; `create_task` is the execution subsystem's task factory
/// (tasks carry ids issued there, not here).
#[async_trait]
pub trait ClusterContext: Send + Sync {
    /// Turns a resolved configuration into per-type configuration requests.
    fn create_configuration_requests(
        &self,
        cluster_name: &str,
        host_group: Option<&str>,
        configuration: &Configuration,
    ) -> Vec<ConfigurationRequest>;

    /// Applies configuration to the cluster, durably.
    async fn set_configuration_on_cluster(
        &self,
        requests: Vec<ConfigurationRequest>,
    ) -> Result<(), ConfigurationTopologyError>;

    /// Blocks until the configuration-recommendation step has settled for
    /// `updated_config_types`.  Unbounded by this trait; the manager
    /// applies its configured timeout policy around the call.
    async fn wait_for_configuration_resolution(
        &self,
        cluster_name: &str,
        updated_config_types: &BTreeSet<String>,
    ) -> Result<(), ConfigurationTopologyError>;

    fn is_cluster_kerberos_enabled(&self, cluster_id: ClusterId) -> bool;

    /// Kerberos identity properties recommended for the cluster; consulted
    /// only when Kerberos is enabled
    fn kerberos_config(&self, cluster_id: ClusterId) -> Configuration;

    /// Creates one host task.  The returned task starts `Pending` and
    /// carries the id the execution subsystem assigned it.
    fn create_task(
        &self,
        request_id: RequestId,
        stage_id: u64,
        host: &str,
        component: &str,
        command: TaskCommand,
        skip_failure: bool,
    ) -> Task;
}

/// Failure to hand a task to the execution subsystem
#[derive(Clone, Debug, thiserror::Error)]
#[error("failed to submit task {task_id} for host {host:?}: {message}")]
pub struct SubmitError {
    pub task_id: TaskId,
    pub host: String,
    pub message: String,
}

/// The "submit task, observe status" face of the execution subsystem
///
/// Status updates do not come back through this trait: the execution
/// subsystem delivers [`shipwright_types::task::TaskStatusUpdate`]s on the
/// event channel obtained from
/// [`crate::manager::TopologyManager::task_event_sender`].
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn submit(
        &self,
        request_id: RequestId,
        task: &Task,
    ) -> Result<(), SubmitError>;
}
