//! Processor trait + the context every stage hands to it.
//!
//! A flow calls `process_package(...)` first, with no row read yet, and then
//! `process_resources(...)` with the upstream streams re-described against
//! the package the first call returned. The streams it returns are paired
//! positionally with that package's resources.

use std::sync::Arc;

use tabflow_core::prelude::*;

/// Stage-level context: position in the flattened chain, shared stats and
/// the flow configuration.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    /// 1-based position of the processor in the flow.
    pub position: usize,
    pub stats: Stats,
    pub config: Arc<FlowConfig>,
}

impl ProcessorContext {
    pub fn new(position: usize, stats: Stats, config: Arc<FlowConfig>) -> Self {
        Self {
            position,
            stats,
            config,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        self.config.store_options()
    }
}

impl Default for ProcessorContext {
    fn default() -> Self {
        Self::new(1, Stats::new(), Arc::new(FlowConfig::default()))
    }
}

/// Trait that all processors must implement.
///
/// Invariants:
/// - `process_package` must not depend on row contents. Every descriptor
///   mutation and every configuration error visible from metadata is
///   resolved there.
/// - `process_resources` must stay lazy: it wires iterators, it does not
///   pull rows.
pub trait Processor: Send {
    /// Human-readable processor name (stable), used in error attribution.
    fn name(&self) -> &str;

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        Ok(resources.into_iter().map(|r| r.rows).collect())
    }
}

/// Map each matched resource's rows through `f`, passing the rest through.
pub(crate) fn map_matched(
    resources: Vec<ResourceStream>,
    matcher: &ResourceMatcher,
    mut f: impl FnMut(ResourceStream) -> Result<RowStream>,
) -> Result<Vec<RowStream>> {
    resources
        .into_iter()
        .map(|r| {
            if matcher.matches(r.name()) {
                f(r)
            } else {
                Ok(r.rows)
            }
        })
        .collect()
}
