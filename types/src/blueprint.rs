// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Blueprints: reusable cluster topology templates
//!
//! A blueprint names a stack, a set of host groups, and the components and
//! configuration each group carries.  It is pure template: host groups are
//! abstract buckets that only get concrete hosts when a provisioning or
//! scaling request assigns them.  Once a request references a blueprint the
//! blueprint is immutable; requests hold it behind an `Arc` and never write
//! through it.

use crate::config::Configuration;
use crate::error::InvalidTemplateError;
use crate::error::NoSuchBlueprintError;
use crate::stack::StackCatalog;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Identifies a stack definition (name plus version)
#[derive(
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct StackId {
    pub name: String,
    pub version: String,
}

impl StackId {
    pub fn new(name: &str, version: &str) -> StackId {
        StackId { name: name.to_string(), version: version.to_string() }
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// One component assignment within a host group
#[derive(
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct Component {
    pub name: String,
}

impl Component {
    pub fn new(name: &str) -> Component {
        Component { name: name.to_string() }
    }
}

/// A named bucket of hosts within a blueprint
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HostGroup {
    pub name: String,
    pub components: Vec<Component>,
    /// Group-scoped configuration layer, more specific than the blueprint's
    pub configuration: Configuration,
}

impl HostGroup {
    pub fn new(name: &str) -> HostGroup {
        HostGroup {
            name: name.to_string(),
            components: Vec::new(),
            configuration: Configuration::new(),
        }
    }

    pub fn with_components<'a>(
        mut self,
        components: impl IntoIterator<Item = &'a str>,
    ) -> HostGroup {
        self.components.extend(components.into_iter().map(Component::new));
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> HostGroup {
        self.configuration = configuration;
        self
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.name.as_str())
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.components.iter().any(|c| c.name == component)
    }

    /// Services spanned by this group's components, per the stack's
    /// component-to-service mapping.  Components the stack does not know
    /// are skipped here; [`Blueprint::validate`] reports them.
    pub fn services(&self, stack: &dyn StackCatalog) -> BTreeSet<String> {
        self.component_names()
            .filter_map(|component| stack.service_for_component(component))
            .map(str::to_string)
            .collect()
    }
}

/// A reusable cluster topology template
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Blueprint {
    pub name: String,
    pub stack_id: StackId,
    /// Blueprint-wide configuration layer, more specific than stack
    /// defaults and less specific than anything request-scoped
    pub configuration: Configuration,
    pub host_groups: BTreeMap<String, HostGroup>,
}

impl Blueprint {
    pub fn new(name: &str, stack_id: StackId) -> Blueprint {
        Blueprint {
            name: name.to_string(),
            stack_id,
            configuration: Configuration::new(),
            host_groups: BTreeMap::new(),
        }
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Blueprint {
        self.configuration = configuration;
        self
    }

    pub fn with_host_group(mut self, group: HostGroup) -> Blueprint {
        self.host_groups.insert(group.name.clone(), group);
        self
    }

    pub fn host_group(&self, name: &str) -> Option<&HostGroup> {
        self.host_groups.get(name)
    }

    pub fn host_groups_for_component<'a>(
        &'a self,
        component: &'a str,
    ) -> impl Iterator<Item = &'a HostGroup> + 'a {
        self.host_groups.values().filter(move |g| g.has_component(component))
    }

    /// Every service with at least one component placed in some host group
    pub fn services(&self, stack: &dyn StackCatalog) -> BTreeSet<String> {
        self.host_groups.values().flat_map(|g| g.services(stack)).collect()
    }

    /// Checks that every component placed by this blueprint is defined by
    /// the stack.  Run before topology construction so cardinality lookups
    /// there can assume known components.
    pub fn validate(
        &self,
        stack: &dyn StackCatalog,
    ) -> Result<(), InvalidTemplateError> {
        for group in self.host_groups.values() {
            for component in group.component_names() {
                if stack.service_for_component(component).is_none() {
                    return Err(InvalidTemplateError::UnknownComponent {
                        stack: stack.stack_id().to_string(),
                        group: group.name.clone(),
                        component: component.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Read-only lookup of registered blueprints by name
pub trait BlueprintCatalog: Send + Sync {
    fn blueprint(&self, name: &str) -> Option<Arc<Blueprint>>;

    fn lookup(&self, name: &str) -> Result<Arc<Blueprint>, NoSuchBlueprintError> {
        self.blueprint(name)
            .ok_or_else(|| NoSuchBlueprintError { name: name.to_string() })
    }
}

/// Trivial in-memory [`BlueprintCatalog`]
#[derive(Debug, Default)]
pub struct BlueprintRegistry {
    blueprints: BTreeMap<String, Arc<Blueprint>>,
}

impl BlueprintRegistry {
    pub fn new() -> BlueprintRegistry {
        BlueprintRegistry::default()
    }

    pub fn register(&mut self, blueprint: Blueprint) {
        self.blueprints.insert(blueprint.name.clone(), Arc::new(blueprint));
    }
}

impl BlueprintCatalog for BlueprintRegistry {
    fn blueprint(&self, name: &str) -> Option<Arc<Blueprint>> {
        self.blueprints.get(name).map(Arc::clone)
    }
}
