// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning and scaling request shapes
//!
//! These arrive from the (out-of-scope) request/validation layer.  The
//! orchestrator re-validates shape here -- notably that each host group
//! picks exactly one host-selection mode -- before building a topology.

use crate::config::Configuration;
use crate::error::InvalidTemplateError;
use crate::ids::ClusterId;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Which task kinds a request should generate for its components
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionAction {
    InstallOnly,
    StartOnly,
    #[default]
    InstallAndStart,
}

impl ProvisionAction {
    pub fn includes_install(&self) -> bool {
        !matches!(self, ProvisionAction::StartOnly)
    }

    pub fn includes_start(&self) -> bool {
        !matches!(self, ProvisionAction::InstallOnly)
    }
}

/// Policy for letting the external configuration advisor adjust
/// configuration before it is applied
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ConfigRecommendationStrategy {
    #[default]
    NeverApply,
    OnlyStackDefaultsApply,
    AlwaysApply,
    AlwaysApplyDontOverrideCustomValues,
}

#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityType {
    None,
    Kerberos,
}

/// Security settings carried on a provision request
///
/// Only the Kerberos/not-Kerberos distinction is consumed by this core;
/// descriptor handling belongs to the security subsystem.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SecurityConfiguration {
    pub security_type: SecurityType,
    pub descriptor_reference: Option<String>,
}

/// Per-request host assignment for one host group
///
/// Exactly one selection mode must be used: an explicit FQDN list, or a
/// requested host count (optionally narrowed by a host predicate evaluated
/// by the out-of-scope host-resolution layer).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HostGroupInfo {
    pub group_name: String,
    pub hosts: BTreeSet<String>,
    pub requested_count: Option<usize>,
    pub predicate: Option<String>,
    /// Host-group-scoped configuration layer, the most specific of all
    pub configuration: Configuration,
}

/// Validated view of a host group's selection mode
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostSelection<'a> {
    Hosts(&'a BTreeSet<String>),
    HostCount { requested: usize, predicate: Option<&'a str> },
}

impl HostGroupInfo {
    pub fn new(group_name: &str) -> HostGroupInfo {
        HostGroupInfo {
            group_name: group_name.to_string(),
            hosts: BTreeSet::new(),
            requested_count: None,
            predicate: None,
            configuration: Configuration::new(),
        }
    }

    pub fn with_hosts<'a>(
        mut self,
        hosts: impl IntoIterator<Item = &'a str>,
    ) -> HostGroupInfo {
        self.hosts.extend(hosts.into_iter().map(str::to_string));
        self
    }

    pub fn with_host_count(mut self, requested: usize) -> HostGroupInfo {
        self.requested_count = Some(requested);
        self
    }

    pub fn with_predicate(mut self, predicate: &str) -> HostGroupInfo {
        self.predicate = Some(predicate.to_string());
        self
    }

    pub fn with_configuration(
        mut self,
        configuration: Configuration,
    ) -> HostGroupInfo {
        self.configuration = configuration;
        self
    }

    /// Resolves the selection mode, rejecting both-set and neither-set.
    pub fn host_selection(
        &self,
    ) -> Result<HostSelection<'_>, InvalidTemplateError> {
        match (self.hosts.is_empty(), self.requested_count) {
            (false, None) => {
                if self.predicate.is_some() {
                    // A predicate only makes sense with a requested count.
                    return Err(InvalidTemplateError::PredicateWithoutCount {
                        group: self.group_name.clone(),
                    });
                }
                Ok(HostSelection::Hosts(&self.hosts))
            }
            (true, Some(requested)) => Ok(HostSelection::HostCount {
                requested,
                predicate: self.predicate.as_deref(),
            }),
            _ => Err(InvalidTemplateError::AmbiguousHostSelection {
                group: self.group_name.clone(),
            }),
        }
    }

    /// Number of hosts this group will ultimately contain: explicit hosts,
    /// or the requested count for predicate-based groups
    pub fn host_count(&self) -> usize {
        if self.hosts.is_empty() {
            self.requested_count.unwrap_or(0)
        } else {
            self.hosts.len()
        }
    }
}

fn validate_host_group_info(
    host_group_info: &BTreeMap<String, HostGroupInfo>,
) -> Result<(), InvalidTemplateError> {
    if host_group_info.is_empty() {
        return Err(InvalidTemplateError::NoHostGroups);
    }
    for info in host_group_info.values() {
        let _ = info.host_selection()?;
    }
    Ok(())
}

/// Request to provision a new cluster from a blueprint
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProvisionClusterRequest {
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub blueprint_name: String,
    pub description: Option<String>,
    pub host_group_info: BTreeMap<String, HostGroupInfo>,
    /// Cluster-level configuration layer (overrides the blueprint's)
    pub configuration: Configuration,
    pub provision_action: ProvisionAction,
    pub config_recommendation_strategy: ConfigRecommendationStrategy,
    pub security: Option<SecurityConfiguration>,
}

impl ProvisionClusterRequest {
    pub fn validate(&self) -> Result<(), InvalidTemplateError> {
        validate_host_group_info(&self.host_group_info)
    }
}

/// Request to add hosts to an existing cluster
///
/// Same shape as provisioning, restricted to the groups and hosts being
/// added; a host already in the cluster must be rejected.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScaleClusterRequest {
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub blueprint_name: String,
    pub host_group_info: BTreeMap<String, HostGroupInfo>,
}

impl ScaleClusterRequest {
    pub fn validate(&self) -> Result<(), InvalidTemplateError> {
        validate_host_group_info(&self.host_group_info)
    }
}

/// Durable payload of an accepted request, provision or scale
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyRequest {
    Provision(ProvisionClusterRequest),
    Scale(ScaleClusterRequest),
}

impl TopologyRequest {
    pub fn cluster_id(&self) -> ClusterId {
        match self {
            TopologyRequest::Provision(r) => r.cluster_id,
            TopologyRequest::Scale(r) => r.cluster_id,
        }
    }

    pub fn cluster_name(&self) -> &str {
        match self {
            TopologyRequest::Provision(r) => &r.cluster_name,
            TopologyRequest::Scale(r) => &r.cluster_name,
        }
    }

    pub fn blueprint_name(&self) -> &str {
        match self {
            TopologyRequest::Provision(r) => &r.blueprint_name,
            TopologyRequest::Scale(r) => &r.blueprint_name,
        }
    }

    pub fn is_provision(&self) -> bool {
        matches!(self, TopologyRequest::Provision(_))
    }
}
