// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-level tasks and request status views
//!
//! A [`Task`] is one component command on one host.  Tasks are created by
//! the orchestrator (through the execution subsystem's task factory) and
//! thereafter mutated only by status updates the execution subsystem
//! delivers; the orchestrator never invents a task status.

use crate::ids::RequestId;
use crate::ids::TaskId;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// The command a task runs on its host
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskCommand {
    Install,
    Start,
}

impl fmt::Display for TaskCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskCommand::Install => write!(f, "INSTALL"),
            TaskCommand::Start => write!(f, "START"),
        }
    }
}

/// Lifecycle of a single task
///
/// `Pending` means created but not yet handed to the execution subsystem;
/// `Queued` means submitted.  Everything from `Completed` on is terminal
/// and produced exclusively by the execution subsystem.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    InProgress,
    Completed,
    Failed,
    Aborted,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Aborted
                | TaskStatus::TimedOut
        )
    }

    /// Terminal and unsuccessful
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::Aborted | TaskStatus::TimedOut
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Aborted => "ABORTED",
            TaskStatus::TimedOut => "TIMEDOUT",
        };
        write!(f, "{s}")
    }
}

/// One component command on one host
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    pub id: TaskId,
    pub host: String,
    pub component: String,
    pub command: TaskCommand,
    pub status: TaskStatus,
    /// When set, a failure of this task does not fail the owning request.
    pub skip_failure: bool,
}

/// A task status change reported by the execution subsystem
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusUpdate {
    pub request_id: RequestId,
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Aggregate state of a logical request
///
/// `Created`, `ConfigPending` and `Dispatched` are phases the orchestrator
/// moves a request through; once tasks exist, status is derived from them.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Created,
    ConfigPending,
    Dispatched,
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Failed
                | RequestStatus::Aborted
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Created => "CREATED",
            RequestStatus::ConfigPending => "CONFIG_PENDING",
            RequestStatus::Dispatched => "DISPATCHED",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Failed => "FAILED",
            RequestStatus::Aborted => "ABORTED",
        };
        write!(f, "{s}")
    }
}

/// Per-task line of a [`RequestStatusResponse`]
#[derive(Clone, Debug, Eq, PartialEq, Serialize, JsonSchema)]
pub struct ShortTaskStatus {
    pub task_id: TaskId,
    pub host: String,
    pub component: String,
    pub command: TaskCommand,
    pub status: TaskStatus,
}

/// Progress snapshot of a logical request, for polling by the
/// presentation layer
#[derive(Clone, Debug, Eq, PartialEq, Serialize, JsonSchema)]
pub struct RequestStatusResponse {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub tasks: Vec<ShortTaskStatus>,
}
