// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolved cluster topology for one request
//!
//! A [`ClusterTopology`] is the validated, immutable view the rest of the
//! system works from: the blueprint, the concrete host-group assignments
//! for this request, and the request-scoped settings.  Construction is
//! atomic: every structural check and every registered validator must pass
//! or no topology exists at all.

use crate::tasks;
use shipwright_types::blueprint::Blueprint;
use shipwright_types::config::Configuration;
use shipwright_types::error::InvalidTopologyError;
use shipwright_types::ids::ClusterId;
use shipwright_types::request::ConfigRecommendationStrategy;
use shipwright_types::request::HostGroupInfo;
use shipwright_types::request::ProvisionAction;
use shipwright_types::request::ProvisionClusterRequest;
use shipwright_types::request::ScaleClusterRequest;
use shipwright_types::request::SecurityConfiguration;
use shipwright_types::request::TopologyRequest;
use shipwright_types::stack::StackCatalog;
use slog::debug;
use slog::info;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A pluggable check run after structural validation
///
/// Validators run in registration order; the first failure aborts topology
/// construction.
pub trait TopologyValidator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns a rejection message if the topology is unacceptable.
    fn validate(&self, topology: &ClusterTopology) -> Result<(), String>;
}

/// Validated, immutable topology for one provisioning or scaling request
#[derive(Clone, Debug)]
pub struct ClusterTopology {
    cluster_id: ClusterId,
    cluster_name: String,
    blueprint: Arc<Blueprint>,
    host_group_info: BTreeMap<String, HostGroupInfo>,
    provision_action: ProvisionAction,
    config_recommendation_strategy: ConfigRecommendationStrategy,
    /// Cluster-level configuration layer from the request
    configuration: Configuration,
    security: Option<SecurityConfiguration>,
}

impl ClusterTopology {
    /// Builds and validates a topology for a cluster provisioning request.
    pub fn new(
        log: &Logger,
        blueprint: Arc<Blueprint>,
        stack: &dyn StackCatalog,
        request: &ProvisionClusterRequest,
        validators: &[Box<dyn TopologyValidator>],
    ) -> Result<ClusterTopology, InvalidTopologyError> {
        let topology = ClusterTopology {
            cluster_id: request.cluster_id,
            cluster_name: request.cluster_name.clone(),
            blueprint,
            host_group_info: request.host_group_info.clone(),
            provision_action: request.provision_action,
            config_recommendation_strategy: request
                .config_recommendation_strategy,
            configuration: request.configuration.clone(),
            security: request.security.clone(),
        };
        topology.validate(log, stack, None, validators)?;
        info!(
            log, "cluster topology validated";
            "cluster_id" => %topology.cluster_id,
            "blueprint" => &topology.blueprint.name,
            "host_groups" => topology.host_group_info.len(),
        );
        Ok(topology)
    }

    /// Builds and validates a topology for a scale-up request.
    ///
    /// `existing_hosts` is the set of FQDNs already part of the cluster
    /// (including hosts reserved by in-flight requests); any overlap with
    /// the hosts being added is rejected before group-level validation.
    pub fn for_scale(
        log: &Logger,
        blueprint: Arc<Blueprint>,
        stack: &dyn StackCatalog,
        request: &ScaleClusterRequest,
        existing_hosts: &BTreeSet<String>,
        validators: &[Box<dyn TopologyValidator>],
    ) -> Result<ClusterTopology, InvalidTopologyError> {
        let topology = ClusterTopology {
            cluster_id: request.cluster_id,
            cluster_name: request.cluster_name.clone(),
            blueprint,
            host_group_info: request.host_group_info.clone(),
            // Scale-ups always install and start the added components.
            provision_action: ProvisionAction::InstallAndStart,
            config_recommendation_strategy:
                ConfigRecommendationStrategy::NeverApply,
            configuration: Configuration::new(),
            security: None,
        };
        topology.validate(log, stack, Some(existing_hosts), validators)?;
        info!(
            log, "scale topology validated";
            "cluster_id" => %topology.cluster_id,
            "blueprint" => &topology.blueprint.name,
            "hosts_added" => topology.all_hosts().len(),
        );
        Ok(topology)
    }

    /// Reconstructs a topology from a persisted request payload without
    /// re-running validation.
    ///
    /// Only for persisted-state replay: the request was validated when it
    /// was accepted, and replay must not re-reject (or re-log) work that is
    /// already in flight.
    pub fn rehydrate(
        blueprint: Arc<Blueprint>,
        payload: &TopologyRequest,
    ) -> ClusterTopology {
        match payload {
            TopologyRequest::Provision(request) => ClusterTopology {
                cluster_id: request.cluster_id,
                cluster_name: request.cluster_name.clone(),
                blueprint,
                host_group_info: request.host_group_info.clone(),
                provision_action: request.provision_action,
                config_recommendation_strategy: request
                    .config_recommendation_strategy,
                configuration: request.configuration.clone(),
                security: request.security.clone(),
            },
            TopologyRequest::Scale(request) => ClusterTopology {
                cluster_id: request.cluster_id,
                cluster_name: request.cluster_name.clone(),
                blueprint,
                host_group_info: request.host_group_info.clone(),
                provision_action: ProvisionAction::InstallAndStart,
                config_recommendation_strategy:
                    ConfigRecommendationStrategy::NeverApply,
                configuration: Configuration::new(),
                security: None,
            },
        }
    }

    fn validate(
        &self,
        log: &Logger,
        stack: &dyn StackCatalog,
        existing_hosts: Option<&BTreeSet<String>>,
        validators: &[Box<dyn TopologyValidator>],
    ) -> Result<(), InvalidTopologyError> {
        // Duplicate-host assignment fails fast, independent of whether the
        // named groups are even valid.
        if let Some(existing) = existing_hosts {
            for info in self.host_group_info.values() {
                for host in &info.hosts {
                    if existing.contains(host) {
                        return Err(InvalidTopologyError::DuplicateHost {
                            cluster_name: self.cluster_name.clone(),
                            host: host.clone(),
                        });
                    }
                }
            }
        }

        for (group_name, info) in &self.host_group_info {
            let Some(group) = self.blueprint.host_group(group_name) else {
                return Err(InvalidTopologyError::UnknownHostGroup {
                    blueprint: self.blueprint.name.clone(),
                    group: group_name.clone(),
                });
            };

            let host_count = info.host_count();
            for component in group.component_names() {
                // Blueprint::validate has already rejected components the
                // stack does not define.
                let Some(cardinality) = stack.cardinality(component) else {
                    continue;
                };
                if !tasks::generates_tasks(
                    stack,
                    component,
                    self.provision_action,
                ) {
                    // No phase of this request touches the component, so
                    // its cardinality is not this request's problem.
                    continue;
                }
                if !cardinality.satisfied_by(host_count) {
                    return Err(InvalidTopologyError::CardinalityViolation {
                        component: component.to_string(),
                        group: group_name.clone(),
                        cardinality,
                        actual: host_count,
                    });
                }
            }
            debug!(
                log, "host group validated";
                "group" => group_name.as_str(),
                "hosts" => host_count,
            );
        }

        for validator in validators {
            if let Err(message) = validator.validate(self) {
                return Err(InvalidTopologyError::ValidatorFailed {
                    validator: validator.name(),
                    message,
                });
            }
        }

        Ok(())
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn blueprint(&self) -> &Arc<Blueprint> {
        &self.blueprint
    }

    pub fn host_group_info(&self) -> &BTreeMap<String, HostGroupInfo> {
        &self.host_group_info
    }

    pub fn provision_action(&self) -> ProvisionAction {
        self.provision_action
    }

    pub fn config_recommendation_strategy(&self) -> ConfigRecommendationStrategy {
        self.config_recommendation_strategy
    }

    /// Cluster-level configuration layer carried by the request
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn security(&self) -> Option<&SecurityConfiguration> {
        self.security.as_ref()
    }

    pub fn is_kerberos_requested(&self) -> bool {
        matches!(
            self.security.as_ref().map(|s| s.security_type),
            Some(shipwright_types::request::SecurityType::Kerberos)
        )
    }

    /// All explicitly assigned FQDNs across host groups
    ///
    /// Predicate-selected groups contribute nothing here until the host
    /// layer binds concrete hosts.
    pub fn all_hosts(&self) -> BTreeSet<String> {
        self.host_group_info
            .values()
            .flat_map(|info| info.hosts.iter().cloned())
            .collect()
    }
}
