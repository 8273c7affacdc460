//! Remove resources from the package.
//!
//! Deleted streams are still pulled to exhaustion, so upstream side effects
//! (indexing, checkpoints) happen and upstream errors surface. Each one is
//! drained in its original place: before the next surviving stream, or after
//! the last one.

use tabflow_core::prelude::*;
use tabflow_core::stream;

use crate::traits::{Processor, ProcessorContext};

pub struct DeleteResource {
    resources: ResourceMatcher,
}

impl DeleteResource {
    pub fn new(resources: impl Into<ResourceMatcher>) -> Self {
        Self {
            resources: resources.into(),
        }
    }
}

impl Processor for DeleteResource {
    fn name(&self) -> &str {
        "delete_resource"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        let matcher = &self.resources;
        package.resources.retain(|r| !matcher.matches(&r.name));
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let mut out = Vec::with_capacity(resources.len());
        let mut deleted = Vec::new();
        for r in resources {
            if self.resources.matches(r.name()) {
                deleted.push(r.rows);
            } else {
                out.push(stream::drain_then(std::mem::take(&mut deleted), r.rows));
            }
        }
        // With no surviving stream to drain through, deleted streams are
        // dropped unread.
        if let Some(last) = out.pop() {
            out.push(stream::then_drain(last, deleted));
        }
        Ok(out)
    }
}
