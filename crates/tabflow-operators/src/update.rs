//! Descriptor-only updates: package metadata and resource properties.
//!
//! Rows pass through untouched. A renamed resource keeps its stream, since
//! streams follow descriptor position.

use tabflow_core::prelude::*;
use tabflow_core::schema::Properties;

use crate::traits::{Processor, ProcessorContext};

/// Merge top-level keys into the package descriptor. `name` sets the
/// package name; a `resources` key is ignored.
#[derive(Default)]
pub struct AddMetadata {
    metadata: Properties,
}

impl AddMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_properties(metadata: Properties) -> Self {
        Self { metadata }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Processor for AddMetadata {
    fn name(&self) -> &str {
        "add_metadata"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        for (key, value) in &self.metadata {
            match key.as_str() {
                "resources" => {}
                "name" => package.name = Some(string_property(key, value)?),
                _ => {
                    package.properties.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(package)
    }
}

/// Update descriptor keys of matched resources. `name`, `path` and
/// `schema` replace the modelled fields; other keys land in properties.
pub struct UpdateResource {
    resources: ResourceMatcher,
    metadata: Properties,
}

impl UpdateResource {
    pub fn new(resources: impl Into<ResourceMatcher>) -> Self {
        Self {
            resources: resources.into(),
            metadata: Properties::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn apply(&self, resource: &mut ResourceDescriptor) -> Result<()> {
        for (key, value) in &self.metadata {
            match key.as_str() {
                "name" => resource.name = string_property(key, value)?,
                "path" => resource.path = Some(string_property(key, value)?),
                "schema" => {
                    resource.schema = serde_json::from_value(value.clone()).map_err(|e| {
                        Error::config(format!(
                            "invalid schema for resource '{}': {e}",
                            resource.name
                        ))
                    })?
                }
                _ => {
                    resource.properties.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}

fn string_property(key: &str, value: &serde_json::Value) -> Result<String> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| Error::config(format!("'{key}' must be a string, got {value}")))
}

impl Processor for UpdateResource {
    fn name(&self) -> &str {
        "update_resource"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        let matcher = self.resources.resolve(&package)?;
        for resource in &mut package.resources {
            if matcher.matches(&resource.name) {
                self.apply(resource)?;
            }
        }
        let names = package.resource_names();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::config(format!(
                    "duplicate resource name '{name}' after update"
                )));
            }
        }
        Ok(package)
    }
}
