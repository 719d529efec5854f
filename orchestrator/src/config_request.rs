// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The configuration phase of a logical request
//!
//! Before any host task may be dispatched, the request's effective
//! configuration must be durably applied to the cluster: resolve the
//! layered configuration (cluster level, then per host group), fold in
//! Kerberos identity settings when the cluster is kerberized, hand the
//! result to the cluster-management layer, and wait for the
//! recommendation step to settle.  A failure anywhere here fails the
//! owning request -- the request is already persisted, so the record
//! remains for diagnostics and replay.

use crate::context::ClusterContext;
use shipwright_topology::resolver;
use shipwright_topology::ClusterTopology;
use shipwright_types::config::Configuration;
use shipwright_types::error::ConfigurationTopologyError;
use shipwright_types::stack::StackCatalog;
use slog::debug;
use slog::info;
use slog::Logger;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Applies the effective configuration for one topology request
pub struct ClusterConfigurationRequest {
    log: Logger,
    topology: Arc<ClusterTopology>,
    stack: Arc<dyn StackCatalog>,
}

impl ClusterConfigurationRequest {
    pub fn new(
        log: Logger,
        topology: Arc<ClusterTopology>,
        stack: Arc<dyn StackCatalog>,
    ) -> ClusterConfigurationRequest {
        ClusterConfigurationRequest { log, topology, stack }
    }

    /// Runs the configuration phase to completion.
    ///
    /// `resolution_timeout` bounds the wait for the recommendation step;
    /// `None` waits indefinitely.
    pub async fn process(
        &self,
        context: &dyn ClusterContext,
        resolution_timeout: Option<Duration>,
    ) -> Result<(), ConfigurationTopologyError> {
        let topology = &self.topology;
        let stack = &*self.stack;
        let cluster_name = topology.cluster_name();

        let mut configuration =
            resolver::effective_cluster_configuration(topology, stack);

        // A cluster is kerberized either because it already is (scale-up)
        // or because this very request asks for it.
        let kerberized = topology.is_kerberos_requested()
            || context.is_cluster_kerberos_enabled(topology.cluster_id());
        let mut updated_config_types = BTreeSet::new();
        if kerberized {
            let kerberos_config =
                context.kerberos_config(topology.cluster_id());
            updated_config_types = apply_kerberos_updates(
                &mut configuration,
                &kerberos_config,
                &topology.blueprint().configuration,
                stack.default_configuration(),
            );
            info!(
                self.log, "applied kerberos identity configuration";
                "updated_config_types" => ?updated_config_types,
            );
        }

        let mut requests = context.create_configuration_requests(
            cluster_name,
            None,
            &configuration,
        );
        for group_name in topology.host_group_info().keys() {
            let Some(group_configuration) =
                resolver::effective_group_configuration(
                    topology, stack, group_name,
                )
            else {
                continue;
            };
            requests.extend(context.create_configuration_requests(
                cluster_name,
                Some(group_name),
                &group_configuration,
            ));
        }

        debug!(
            self.log, "applying configuration to cluster";
            "cluster_name" => cluster_name,
            "config_requests" => requests.len(),
        );
        context.set_configuration_on_cluster(requests).await?;

        let wait = context
            .wait_for_configuration_resolution(cluster_name, &updated_config_types);
        match resolution_timeout {
            None => wait.await,
            Some(timeout) => {
                match tokio::time::timeout(timeout, wait).await {
                    Ok(result) => result,
                    Err(_) => {
                        Err(ConfigurationTopologyError::ResolutionTimeout {
                            cluster_name: cluster_name.to_string(),
                            timeout,
                        })
                    }
                }
            }
        }
    }
}

/// Folds Kerberos identity properties into `configuration`.
///
/// A Kerberos-recommended property is applied unless the blueprint carries
/// a custom value for it -- custom meaning present and different from the
/// stack default.  Returns the config types actually touched, which the
/// caller passes to the configuration-resolution wait.
pub fn apply_kerberos_updates(
    configuration: &mut Configuration,
    kerberos_config: &Configuration,
    blueprint_config: &Configuration,
    stack_defaults: &Configuration,
) -> BTreeSet<String> {
    let mut updated_config_types = BTreeSet::new();
    for (config_type, properties) in &kerberos_config.properties {
        for (name, value) in properties {
            let blueprint_value = blueprint_config.property(config_type, name);
            let stack_default = stack_defaults.property(config_type, name);
            if let Some(custom) = blueprint_value {
                if Some(custom) != stack_default {
                    // The operator chose this value on purpose; the
                    // Kerberos recommendation does not override it.
                    continue;
                }
            }
            configuration.set_property(config_type, name, value);
            updated_config_types.insert(config_type.clone());
        }
    }
    updated_config_types
}
