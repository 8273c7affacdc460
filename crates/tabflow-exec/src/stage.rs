//! One link of a flow: run a processor over an upstream data stream.
//!
//! The stage owns the alignment protocol:
//! - `process_package` sees a copy of the upstream package and returns the
//!   new one; upstream is kept for descriptor fallback.
//! - every upstream stream is re-described by name against the new package,
//!   falling back to the upstream package for resources the processor
//!   removed or renamed.
//! - the streams `process_resources` returns are paired positionally with the
//!   new package's resources.
//! - every error, at wiring time or per row, is attributed to the processor
//!   exactly once.

use std::sync::Arc;

use tabflow_core::catalog::ResourceCatalog;
use tabflow_core::prelude::*;
use tabflow_core::stream::align;
use tabflow_operators::{Processor, ProcessorContext};
use tracing::debug;

pub(crate) fn run_stage(
    mut processor: Box<dyn Processor>,
    upstream: DataStream,
    position: usize,
    config: Arc<FlowConfig>,
) -> Result<DataStream> {
    let DataStream {
        package: upstream_package,
        resources,
        stats,
    } = upstream;
    let name = processor.name().to_string();
    let ctx = ProcessorContext::new(position, stats.clone(), config);

    let package = processor
        .process_package(upstream_package.clone(), &ctx)
        .map_err(|e| e.in_processor(&name, position))?;

    let redescribed = {
        let current = ResourceCatalog::new(&package.resources);
        let previous = ResourceCatalog::new(&upstream_package.resources);
        resources
            .into_iter()
            .map(|r| {
                let descriptor = current
                    .lookup_with_fallback(r.name(), &previous)
                    .cloned()
                    .unwrap_or(r.descriptor);
                ResourceStream::new(descriptor, r.rows)
            })
            .collect::<Vec<_>>()
    };

    debug!(
        processor = %name,
        position,
        upstream = redescribed.len(),
        resources = package.resources.len(),
        "wiring stage"
    );
    let streams = processor
        .process_resources(redescribed, &ctx)
        .map_err(|e| e.in_processor(&name, position))?;

    let streams = streams
        .into_iter()
        .map(|rows| attribute(rows, name.clone(), position))
        .collect();
    let resources = align(&package.resources, streams);
    Ok(DataStream::new(package, resources, stats))
}

fn attribute(rows: RowStream, name: String, position: usize) -> RowStream {
    Box::new(rows.map(move |row| row.map_err(|e| e.in_processor(&name, position))))
}
