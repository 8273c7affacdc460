//! Declare the primary key of matched resources.

use tabflow_core::prelude::*;

use crate::traits::{Processor, ProcessorContext};

pub struct SetPrimaryKey {
    primary_key: Vec<String>,
    resources: ResourceMatcher,
}

impl SetPrimaryKey {
    pub fn new<I, S>(primary_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            resources: ResourceMatcher::All,
        }
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }
}

impl Processor for SetPrimaryKey {
    fn name(&self) -> &str {
        "set_primary_key"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        let matcher = self.resources.resolve(&package)?;
        for resource in &mut package.resources {
            if matcher.matches(&resource.name) {
                resource.schema.primary_key = self.primary_key.clone();
            }
        }
        Ok(package)
    }
}
