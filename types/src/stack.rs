// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only stack metadata
//!
//! The stack-definition loader is outside this system; the orchestration
//! core consumes it through [`StackCatalog`], a narrow lookup trait handed
//! in at construction time.  [`StackDefinition`] is the in-memory
//! implementation used by tests and development tooling.

use crate::blueprint::StackId;
use crate::cardinality::Cardinality;
use crate::cardinality::CardinalityParseError;
use crate::config::Configuration;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Auto-deploy metadata for a component
///
/// Carried through from the stack definition; acting on it (placing the
/// component on extra hosts) is the stack layer's business, not ours.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AutoDeployInfo {
    pub enabled: bool,
    /// Component this one should be co-located with, if any
    pub co_locate: Option<String>,
}

/// Read-only lookup service over stack metadata
///
/// Implementations must be cheap to call and safe to share without
/// locking; the orchestrator and topology builders call these from
/// concurrent contexts.
pub trait StackCatalog: Send + Sync {
    fn stack_id(&self) -> &StackId;

    /// Cardinality spec for a component; `None` if the stack does not
    /// define the component.
    fn cardinality(&self, component: &str) -> Option<Cardinality>;

    /// Whether a component is client-only.  Clients are installed but never
    /// started.
    fn is_client_component(&self, component: &str) -> bool;

    fn service_for_component(&self, component: &str) -> Option<&str>;

    /// Owning service of a config type; `None` for types the stack does
    /// not claim (the resolver prunes those unless they're reserved).
    fn service_for_config_type(&self, config_type: &str) -> Option<&str>;

    fn config_types_for_service(&self, service: &str) -> BTreeSet<String>;

    /// Config types a service declares but explicitly opts out of managing
    fn excluded_config_types(&self, service: &str) -> BTreeSet<String>;

    fn auto_deploy(&self, component: &str) -> Option<&AutoDeployInfo>;

    /// Stack-default configuration, the least specific layer of every
    /// resolution
    fn default_configuration(&self) -> &Configuration;
}

#[derive(Clone, Debug)]
struct ComponentDefinition {
    service: String,
    cardinality: Cardinality,
    client: bool,
    auto_deploy: Option<AutoDeployInfo>,
}

#[derive(Clone, Debug, Default)]
struct ServiceDefinition {
    config_types: BTreeSet<String>,
    excluded_config_types: BTreeSet<String>,
}

/// In-memory [`StackCatalog`] implementation
///
/// Populated imperatively; the production stack loader is out of scope, so
/// this doubles as the test fixture and the dev-tool backend.
#[derive(Clone, Debug)]
pub struct StackDefinition {
    stack_id: StackId,
    components: BTreeMap<String, ComponentDefinition>,
    services: BTreeMap<String, ServiceDefinition>,
    config_type_owners: BTreeMap<String, String>,
    defaults: Configuration,
}

impl StackDefinition {
    pub fn new(name: &str, version: &str) -> StackDefinition {
        StackDefinition {
            stack_id: StackId::new(name, version),
            components: BTreeMap::new(),
            services: BTreeMap::new(),
            config_type_owners: BTreeMap::new(),
            defaults: Configuration::new(),
        }
    }

    /// Defines a service and the config types it owns.
    pub fn define_service<'a>(
        &mut self,
        service: &str,
        config_types: impl IntoIterator<Item = &'a str>,
    ) -> &mut Self {
        let entry = self.services.entry(service.to_string()).or_default();
        for config_type in config_types {
            entry.config_types.insert(config_type.to_string());
            self.config_type_owners
                .insert(config_type.to_string(), service.to_string());
        }
        self
    }

    /// Defines a (non-client) component of `service` with the given
    /// cardinality string.
    pub fn define_component(
        &mut self,
        component: &str,
        service: &str,
        cardinality: &str,
    ) -> Result<&mut Self, CardinalityParseError> {
        self.insert_component(component, service, cardinality, false)
    }

    /// Defines a client component.  Clients are installed, never started.
    pub fn define_client_component(
        &mut self,
        component: &str,
        service: &str,
        cardinality: &str,
    ) -> Result<&mut Self, CardinalityParseError> {
        self.insert_component(component, service, cardinality, true)
    }

    fn insert_component(
        &mut self,
        component: &str,
        service: &str,
        cardinality: &str,
        client: bool,
    ) -> Result<&mut Self, CardinalityParseError> {
        let cardinality = cardinality.parse()?;
        self.services.entry(service.to_string()).or_default();
        self.components.insert(
            component.to_string(),
            ComponentDefinition {
                service: service.to_string(),
                cardinality,
                client,
                auto_deploy: None,
            },
        );
        Ok(self)
    }

    pub fn set_auto_deploy(
        &mut self,
        component: &str,
        auto_deploy: AutoDeployInfo,
    ) -> &mut Self {
        if let Some(definition) = self.components.get_mut(component) {
            definition.auto_deploy = Some(auto_deploy);
        }
        self
    }

    pub fn exclude_config_type(
        &mut self,
        service: &str,
        config_type: &str,
    ) -> &mut Self {
        self.services
            .entry(service.to_string())
            .or_default()
            .excluded_config_types
            .insert(config_type.to_string());
        self
    }

    pub fn set_default_property(
        &mut self,
        config_type: &str,
        name: &str,
        value: &str,
    ) -> &mut Self {
        self.defaults.set_property(config_type, name, value);
        self
    }
}

impl StackCatalog for StackDefinition {
    fn stack_id(&self) -> &StackId {
        &self.stack_id
    }

    fn cardinality(&self, component: &str) -> Option<Cardinality> {
        self.components.get(component).map(|c| c.cardinality)
    }

    fn is_client_component(&self, component: &str) -> bool {
        self.components.get(component).map_or(false, |c| c.client)
    }

    fn service_for_component(&self, component: &str) -> Option<&str> {
        self.components.get(component).map(|c| c.service.as_str())
    }

    fn service_for_config_type(&self, config_type: &str) -> Option<&str> {
        self.config_type_owners.get(config_type).map(String::as_str)
    }

    fn config_types_for_service(&self, service: &str) -> BTreeSet<String> {
        self.services
            .get(service)
            .map(|s| s.config_types.clone())
            .unwrap_or_default()
    }

    fn excluded_config_types(&self, service: &str) -> BTreeSet<String> {
        self.services
            .get(service)
            .map(|s| s.excluded_config_types.clone())
            .unwrap_or_default()
    }

    fn auto_deploy(&self, component: &str) -> Option<&AutoDeployInfo> {
        self.components.get(component).and_then(|c| c.auto_deploy.as_ref())
    }

    fn default_configuration(&self) -> &Configuration {
        &self.defaults
    }
}
