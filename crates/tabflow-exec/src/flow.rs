//! Flow: an ordered chain of processors, sub-flows and checkpoints.
//!
//! Building a flow does nothing. `datastream` flattens the chain, runs every
//! metadata phase and wires the row streams; the `process`/`results` entry
//! points then pull those streams to the end.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tabflow_core::prelude::*;
use tabflow_operators::validate::cast_row;
use tabflow_operators::Processor;
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::stage::run_stage;

enum Link {
    Step(Box<dyn Processor>),
    Flow(Flow),
    Checkpoint(Checkpoint),
}

#[derive(Default)]
pub struct Flow {
    links: Vec<Link>,
    config: Option<Arc<FlowConfig>>,
}

/// Everything a fully pulled flow produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowResults {
    /// Rows per resource, in package order.
    pub resources: Vec<Vec<Row>>,
    pub package: PackageDescriptor,
    pub stats: BTreeMap<String, serde_json::Value>,
}

impl FlowResults {
    /// Rows of the resource called `name`.
    pub fn rows(&self, name: &str) -> Option<&[Row]> {
        let index = self.package.resource_index(name)?;
        self.resources.get(index).map(Vec::as_slice)
    }
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, processor: impl Processor + 'static) -> Self {
        self.links.push(Link::Step(Box::new(processor)));
        self
    }

    pub fn boxed_step(mut self, processor: Box<dyn Processor>) -> Self {
        self.links.push(Link::Step(processor));
        self
    }

    /// Append a sub-flow. Its configuration, if any, is ignored in favor of
    /// the outer flow's.
    pub fn flow(mut self, flow: Flow) -> Self {
        self.links.push(Link::Flow(flow));
        self
    }

    pub fn checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.links.push(Link::Checkpoint(checkpoint));
        self
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Resolve sub-flows and checkpoints into a flat processor chain.
    pub(crate) fn flatten(self, config: &FlowConfig) -> Vec<Box<dyn Processor>> {
        let mut chain: Vec<Box<dyn Processor>> = Vec::new();
        for link in self.links {
            match link {
                Link::Step(p) => chain.push(p),
                Link::Flow(f) => chain.extend(f.flatten(config)),
                Link::Checkpoint(c) => chain = c.resolve(chain, config),
            }
        }
        chain
    }

    /// Wire the flow without pulling any row.
    pub fn datastream(self) -> Result<DataStream> {
        self.datastream_from(DataStream::empty())
    }

    /// Wire the flow on top of an existing data stream.
    pub fn datastream_from(self, upstream: DataStream) -> Result<DataStream> {
        let config = self
            .config
            .clone()
            .unwrap_or_else(|| Arc::new(FlowConfig::default()));
        let chain = self.flatten(&config);
        debug!(stages = chain.len(), "wiring flow");
        chain
            .into_iter()
            .enumerate()
            .try_fold(upstream, |ds, (i, processor)| {
                run_stage(processor, ds, i + 1, config.clone())
            })
    }

    /// Pull every row and return the final package with the stats merged in,
    /// plus the stats on their own.
    pub fn process(self) -> Result<(PackageDescriptor, BTreeMap<String, serde_json::Value>)> {
        let ds = self.datastream()?;
        let stats = ds.stats.clone();
        let package = ds.drain()?;
        Ok((package, stats.snapshot()))
    }

    /// Pull every row into memory. Rows are returned as produced.
    pub fn results(self) -> Result<FlowResults> {
        let ds = self.datastream()?;
        collect(ds, |_, _, row| Ok(Some(row)))
    }

    /// Pull every row into memory, casting each one against its resource
    /// schema and handling cast failures per `on_error`.
    pub fn results_with(self, on_error: OnError, caster: &dyn Caster) -> Result<FlowResults> {
        let ds = self.datastream()?;
        collect(ds, |resource, index, row| {
            cast_row(
                &resource.name,
                index,
                row,
                &resource.schema,
                caster,
                on_error,
            )
        })
    }
}

fn collect(
    ds: DataStream,
    mut accept: impl FnMut(&ResourceDescriptor, usize, Row) -> Result<Option<Row>>,
) -> Result<FlowResults> {
    let DataStream {
        mut package,
        resources,
        stats,
    } = ds;
    let mut out = Vec::with_capacity(resources.len());
    for resource in resources {
        let mut rows = Vec::new();
        for (index, row) in resource.rows.enumerate() {
            if let Some(row) = accept(&resource.descriptor, index, row?)? {
                rows.push(row);
            }
        }
        out.push(rows);
    }
    let stats = stats.snapshot();
    package.stats.extend(stats.clone());
    Ok(FlowResults {
        resources: out,
        package,
        stats,
    })
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let links: Vec<String> = self
            .links
            .iter()
            .map(|link| match link {
                Link::Step(p) => p.name().to_string(),
                Link::Flow(flow) => format!("flow({})", flow.len()),
                Link::Checkpoint(c) => format!("checkpoint({})", c.name()),
            })
            .collect();
        f.debug_struct("Flow").field("links", &links).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_operators::{row_processor, Load};

    #[test]
    fn sub_flows_are_flattened_with_global_positions() {
        let inner = Flow::new().step(row_processor(|_row: &mut Row| {
            Err(Error::config("nope"))
        }));
        let err = Flow::new()
            .step(Load::rows(vec![row! { "a" => 1 }]))
            .flow(inner)
            .results()
            .unwrap_err();
        match err {
            Error::Processor { position, .. } => assert_eq!(position, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn results_are_keyed_by_resource() {
        let results = Flow::new()
            .step(Load::rows(vec![row! { "a" => 1 }]).name("first"))
            .step(Load::rows(vec![row! { "b" => 2 }, row! { "b" => 3 }]).name("second"))
            .results()
            .unwrap();
        assert_eq!(results.resources.len(), 2);
        assert_eq!(results.rows("second").map(<[Row]>::len), Some(2));
        assert!(results.rows("third").is_none());
    }
}
