// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster configuration: a keyed property space plus layered lookup
//!
//! A [`Configuration`] is one layer of settings: `config type -> property ->
//! value`, with a parallel `config type -> property -> attribute -> value`
//! map for per-property metadata (`final`, `maximum`, etc.).
//!
//! Layering is explicit: a [`ConfigStack`] owns an ordered list of layers,
//! least specific first (stack defaults, then blueprint, then cluster
//! request, then host group).  Lookup walks most-specific-first; merging
//! flattens the stack with child-overrides-parent semantics.  There are no
//! parent back-references between configurations, so a cycle cannot be
//! constructed and merge order is visible at the type level.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// `config type -> property name -> value`
pub type PropertyMap = BTreeMap<String, BTreeMap<String, String>>;

/// `config type -> property name -> attribute name -> value`
pub type AttributeMap =
    BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// One layer of configuration
#[derive(
    Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema,
)]
pub struct Configuration {
    pub properties: PropertyMap,
    pub attributes: AttributeMap,
}

impl Configuration {
    pub fn new() -> Configuration {
        Configuration::default()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.attributes.is_empty()
    }

    pub fn property(&self, config_type: &str, name: &str) -> Option<&str> {
        self.properties
            .get(config_type)
            .and_then(|props| props.get(name))
            .map(String::as_str)
    }

    pub fn set_property(
        &mut self,
        config_type: &str,
        name: &str,
        value: &str,
    ) -> Option<String> {
        self.properties
            .entry(config_type.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string())
    }

    pub fn attribute(
        &self,
        config_type: &str,
        name: &str,
        attribute: &str,
    ) -> Option<&str> {
        self.attributes
            .get(config_type)
            .and_then(|props| props.get(name))
            .and_then(|attrs| attrs.get(attribute))
            .map(String::as_str)
    }

    pub fn set_attribute(
        &mut self,
        config_type: &str,
        name: &str,
        attribute: &str,
        value: &str,
    ) -> Option<String> {
        self.attributes
            .entry(config_type.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(attribute.to_string(), value.to_string())
    }

    /// All config types mentioned by this layer, in either map
    ///
    /// A type whose property map exists but is empty still counts: the
    /// resolver must retain such types when their owning service is in
    /// scope.
    pub fn config_types(&self) -> BTreeSet<String> {
        self.properties
            .keys()
            .chain(self.attributes.keys())
            .cloned()
            .collect()
    }

    /// Removes every trace of `config_type` from this layer.
    pub fn remove_config_type(&mut self, config_type: &str) {
        self.properties.remove(config_type);
        self.attributes.remove(config_type);
    }

    /// Overlays `stronger` onto this configuration in place: properties and
    /// attributes present in `stronger` win, key by key.
    pub fn overlay(&mut self, stronger: &Configuration) {
        for (config_type, props) in &stronger.properties {
            let merged =
                self.properties.entry(config_type.clone()).or_default();
            for (name, value) in props {
                merged.insert(name.clone(), value.clone());
            }
        }
        for (config_type, props) in &stronger.attributes {
            let merged =
                self.attributes.entry(config_type.clone()).or_default();
            for (name, attrs) in props {
                let merged_attrs = merged.entry(name.clone()).or_default();
                for (attribute, value) in attrs {
                    merged_attrs.insert(attribute.clone(), value.clone());
                }
            }
        }
    }
}

/// An ordered set of configuration layers, least specific first
#[derive(Clone, Debug, Default)]
pub struct ConfigStack {
    layers: Vec<Configuration>,
}

impl ConfigStack {
    pub fn new() -> ConfigStack {
        ConfigStack::default()
    }

    /// Builds a stack from `layers`, ordered least specific first.
    pub fn from_layers(
        layers: impl IntoIterator<Item = Configuration>,
    ) -> ConfigStack {
        ConfigStack { layers: layers.into_iter().collect() }
    }

    /// Appends a layer more specific than every existing layer.
    pub fn push_layer(&mut self, layer: Configuration) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Configuration] {
        &self.layers
    }

    /// Looks up `config_type`/`name`, walking most-specific-first.
    pub fn property(&self, config_type: &str, name: &str) -> Option<&str> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.property(config_type, name))
    }

    /// Looks up a property attribute, walking most-specific-first.
    pub fn attribute(
        &self,
        config_type: &str,
        name: &str,
        attribute: &str,
    ) -> Option<&str> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.attribute(config_type, name, attribute))
    }

    /// Collapses the stack into a single configuration.
    ///
    /// A property set at a more specific layer always wins, regardless of
    /// value equality; attribute maps merge key by key under the same rule,
    /// independently per property.
    pub fn flatten(&self) -> Configuration {
        let mut merged = Configuration::new();
        for layer in &self.layers {
            // Preserve config types that appear with no properties at all.
            for config_type in layer.config_types() {
                merged.properties.entry(config_type).or_default();
            }
            merged.overlay(layer);
        }
        merged
    }

    /// Union of config types across all layers
    pub fn config_types(&self) -> BTreeSet<String> {
        self.layers.iter().flat_map(|layer| layer.config_types()).collect()
    }
}
