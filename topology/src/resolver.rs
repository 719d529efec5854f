// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layered configuration resolution
//!
//! Resolution is a total function: merge the ordered layers
//! (most-specific-wins, attributes key-by-key per property), then prune
//! config types whose owning service is out of scope.  Pruning runs
//! independently at the cluster level and per host group, because a host
//! group may span fewer services than the cluster.

use crate::topology::ClusterTopology;
use shipwright_types::config::ConfigStack;
use shipwright_types::config::Configuration;
use shipwright_types::stack::StackCatalog;
use std::collections::BTreeSet;

/// Cluster-wide config types that survive pruning regardless of service
/// ownership
pub const RESERVED_CONFIG_TYPES: &[&str] = &["cluster-env", "global"];

pub fn is_reserved_config_type(config_type: &str) -> bool {
    RESERVED_CONFIG_TYPES.contains(&config_type)
}

/// Resolves an ordered layer stack down to one configuration.
///
/// A config type is retained only if its owning service (per `stack`) is in
/// `services_in_scope` or the type is reserved; `excluded_types` are
/// dropped unconditionally (reserved types cannot be excluded).  A type
/// whose owning service is in scope is retained even if it ends up with no
/// properties; a type no layer mentions never appears.
pub fn resolve(
    layers: &ConfigStack,
    stack: &dyn StackCatalog,
    services_in_scope: &BTreeSet<String>,
    excluded_types: &BTreeSet<String>,
) -> Configuration {
    let mut merged = layers.flatten();

    let pruned: Vec<String> = merged
        .config_types()
        .into_iter()
        .filter(|config_type| {
            if is_reserved_config_type(config_type) {
                return false;
            }
            if excluded_types.contains(config_type) {
                return true;
            }
            match stack.service_for_config_type(config_type) {
                Some(service) => !services_in_scope.contains(service),
                // Unclaimed types have no service to scope them by.
                None => true,
            }
        })
        .collect();
    for config_type in pruned {
        merged.remove_config_type(&config_type);
    }
    merged
}

/// Union of excluded config types across a set of services
fn excluded_types_for(
    stack: &dyn StackCatalog,
    services: &BTreeSet<String>,
) -> BTreeSet<String> {
    services
        .iter()
        .flat_map(|service| stack.excluded_config_types(service))
        .collect()
}

/// Effective cluster-level configuration for a topology: stack defaults,
/// then the blueprint layer, then the request's cluster layer, pruned
/// against the full set of blueprint services.
pub fn effective_cluster_configuration(
    topology: &ClusterTopology,
    stack: &dyn StackCatalog,
) -> Configuration {
    let layers = ConfigStack::from_layers([
        stack.default_configuration().clone(),
        topology.blueprint().configuration.clone(),
        topology.configuration().clone(),
    ]);
    let services = topology.blueprint().services(stack);
    let excluded = excluded_types_for(stack, &services);
    resolve(&layers, stack, &services, &excluded)
}

/// Effective configuration for one host group: the cluster layers plus the
/// blueprint group layer and the request's group layer, pruned against the
/// group's own (possibly narrower) service set.
///
/// Returns `None` for a group the topology does not contain.
pub fn effective_group_configuration(
    topology: &ClusterTopology,
    stack: &dyn StackCatalog,
    group_name: &str,
) -> Option<Configuration> {
    let blueprint_group = topology.blueprint().host_group(group_name)?;
    let group_info = topology.host_group_info().get(group_name)?;

    let layers = ConfigStack::from_layers([
        stack.default_configuration().clone(),
        topology.blueprint().configuration.clone(),
        topology.configuration().clone(),
        blueprint_group.configuration.clone(),
        group_info.configuration.clone(),
    ]);
    let services = blueprint_group.services(stack);
    let excluded = excluded_types_for(stack, &services);
    Some(resolve(&layers, stack, &services, &excluded))
}
