//! Named checkpoints that short-circuit the links before them.

use std::path::PathBuf;

use tabflow_core::prelude::*;
use tabflow_operators::{Processor, ProcessorContext};
use tracing::info;

use crate::flow::Flow;
use crate::ndjson::{DumpNdjson, LoadNdjson};

pub const CHECKPOINT_FILE: &str = "stream.ndjson";

/// A flow link that caches everything before it.
///
/// When `<path>/<name>/stream.ndjson` exists the preceding links are replaced
/// by a load of that file. Otherwise they run as usual, followed by the
/// checkpoint's own steps, and the result is saved once fully pulled.
pub struct Checkpoint {
    name: String,
    path: Option<PathBuf>,
    steps: Flow,
}

impl Checkpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            steps: Flow::new(),
        }
    }

    /// Root directory for this checkpoint. Defaults to
    /// [`FlowConfig::checkpoint_path`].
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn step(mut self, processor: impl Processor + 'static) -> Self {
        self.steps = self.steps.step(processor);
        self
    }

    pub fn flow(mut self, flow: Flow) -> Self {
        self.steps = self.steps.flow(flow);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self, config: &FlowConfig) -> PathBuf {
        self.path
            .as_ref()
            .unwrap_or(&config.checkpoint_path)
            .join(&self.name)
            .join(CHECKPOINT_FILE)
    }

    pub fn exists(&self, config: &FlowConfig) -> bool {
        self.filename(config).exists()
    }

    /// Rewrite `parent`, the links before this checkpoint, into the links
    /// that replace it.
    pub(crate) fn resolve(
        self,
        parent: Vec<Box<dyn Processor>>,
        config: &FlowConfig,
    ) -> Vec<Box<dyn Processor>> {
        let filename = self.filename(config);
        if filename.exists() {
            info!(
                checkpoint = %self.name,
                path = %filename.display(),
                "using checkpoint data"
            );
            return vec![Box::new(LoadNdjson::new(filename))];
        }
        info!(
            checkpoint = %self.name,
            path = %filename.display(),
            "saving checkpoint"
        );
        let mut chain = parent;
        chain.extend(self.steps.flatten(config));
        chain.push(Box::new(DumpNdjson::new(filename)));
        chain.push(Box::new(NotifySaved { name: self.name }));
        chain
    }
}

/// Log once every resource of the checkpointed stream has been pulled.
struct NotifySaved {
    name: String,
}

struct Notify {
    rows: RowStream,
    name: Option<String>,
}

impl Iterator for Notify {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        let row = self.rows.next();
        if row.is_none() {
            if let Some(name) = self.name.take() {
                info!(checkpoint = %name, "checkpoint saved");
            }
        }
        row
    }
}

impl Processor for NotifySaved {
    fn name(&self) -> &str {
        "checkpoint_saved"
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let mut streams: Vec<RowStream> = resources.into_iter().map(|r| r.rows).collect();
        match streams.pop() {
            Some(last) => {
                streams.push(Box::new(Notify {
                    rows: last,
                    name: Some(self.name),
                }));
            }
            None => info!(checkpoint = %self.name, "checkpoint saved"),
        }
        Ok(streams)
    }
}
