// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for topology validation and orchestration
//!
//! The split mirrors where each failure is allowed to happen:
//!
//! * [`InvalidTopologyError`], [`InvalidTemplateError`],
//!   [`NoSuchStackError`] and [`NoSuchBlueprintError`] are synchronous and
//!   occur before anything is persisted or dispatched; the caller can fix
//!   the request and resubmit.
//! * [`ConfigurationTopologyError`] happens after the request is durable;
//!   it fails the owning logical request and nothing else.
//! * Task execution failures are never errors at all -- they arrive as
//!   terminal task statuses and surface only through aggregate request
//!   status.

use crate::cardinality::Cardinality;
use std::time::Duration;

/// A structural problem with a requested topology
///
/// Raised during topology construction, before any persistence or dispatch.
#[derive(Clone, Debug, thiserror::Error)]
pub enum InvalidTopologyError {
    #[error("host group {group:?} is not defined in blueprint {blueprint:?}")]
    UnknownHostGroup { blueprint: String, group: String },

    #[error(
        "component {component:?} in host group {group:?} requires \
         {cardinality} host(s), but {actual} assigned"
    )]
    CardinalityViolation {
        component: String,
        group: String,
        cardinality: Cardinality,
        actual: usize,
    },

    #[error("host {host:?} is already a member of cluster {cluster_name:?}")]
    DuplicateHost { cluster_name: String, host: String },

    #[error("topology validator {validator:?} rejected the request: {message}")]
    ValidatorFailed { validator: &'static str, message: String },
}

/// Malformed blueprint or template input
#[derive(Clone, Debug, thiserror::Error)]
pub enum InvalidTemplateError {
    #[error(
        "host group {group:?} must specify exactly one of an explicit host \
         list or a requested host count"
    )]
    AmbiguousHostSelection { group: String },

    #[error(
        "host group {group:?} specifies a host predicate without a \
         requested host count"
    )]
    PredicateWithoutCount { group: String },

    #[error("request names no host groups")]
    NoHostGroups,

    #[error(
        "component {component:?} in host group {group:?} is not defined by \
         stack {stack}"
    )]
    UnknownComponent { stack: String, group: String, component: String },
}

/// The blueprint references a stack this deployment does not have.
#[derive(Clone, Debug, thiserror::Error)]
#[error("no stack definition matching {name}-{version}")]
pub struct NoSuchStackError {
    pub name: String,
    pub version: String,
}

/// The request references a blueprint that has not been registered.
#[derive(Clone, Debug, thiserror::Error)]
#[error("no blueprint named {name:?}")]
pub struct NoSuchBlueprintError {
    pub name: String,
}

/// Failure while resolving or applying configuration for a request
///
/// These occur after the request has been persisted; the owning logical
/// request is marked failed and the persisted record is kept for
/// diagnostics and replay.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigurationTopologyError {
    #[error("failed to apply configuration to cluster {cluster_name:?}: {message}")]
    Apply { cluster_name: String, message: String },

    #[error(
        "configuration resolution failed on cluster {cluster_name:?}: {message}"
    )]
    Resolution { cluster_name: String, message: String },

    #[error(
        "timed out after {timeout:?} waiting for configuration resolution \
         on cluster {cluster_name:?}"
    )]
    ResolutionTimeout { cluster_name: String, timeout: Duration },
}

/// Umbrella error returned by `provision_cluster` / `scale_hosts`
///
/// Everything here is synchronous: the request was rejected before any task
/// was dispatched.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    InvalidTopology(#[from] InvalidTopologyError),

    #[error(transparent)]
    InvalidTemplate(#[from] InvalidTemplateError),

    #[error(transparent)]
    NoSuchStack(#[from] NoSuchStackError),

    #[error(transparent)]
    NoSuchBlueprint(#[from] NoSuchBlueprintError),

    #[error("failed to persist request state: {message}")]
    Persistence { message: String },
}
