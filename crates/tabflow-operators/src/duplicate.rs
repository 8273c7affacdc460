//! Copy a resource under a new name.
//!
//! The source rows pass through unchanged while being written to an
//! [`OrderedStore`] under their sequence number. The copy replays the store
//! once the source is exhausted, draining whatever the source pass-through
//! has not pulled yet.

use std::sync::Arc;

use parking_lot::Mutex;
use tabflow_core::prelude::*;
use tabflow_core::stream;
use tabflow_store::OrderedStore;
use tracing::debug;

use crate::traits::{Processor, ProcessorContext};

pub struct Duplicate {
    source: Option<String>,
    target_name: Option<String>,
    target_path: Option<String>,
    batch_size: usize,
    duplicate_to_end: bool,
}

impl Default for Duplicate {
    fn default() -> Self {
        Self {
            source: None,
            target_name: None,
            target_path: None,
            batch_size: 1000,
            duplicate_to_end: false,
        }
    }
}

impl Duplicate {
    /// Duplicate the first resource of the package.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.source = Some(name.into());
        self
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    pub fn target_path(mut self, path: impl Into<String>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Place the copy after every other resource instead of right after
    /// the source.
    pub fn duplicate_to_end(mut self, to_end: bool) -> Self {
        self.duplicate_to_end = to_end;
        self
    }
}

struct CopyState {
    source: Option<RowStream>,
    store: Option<OrderedStore<Row>>,
    seq: u64,
}

impl CopyState {
    fn save(&mut self, row: &Row) -> Result<()> {
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| Error::Invariant("duplicate store already replayed".into()))?;
        store.set(format!("{:016x}", self.seq), row.clone())?;
        self.seq += 1;
        Ok(())
    }

    fn drain_source(&mut self) -> Result<()> {
        if let Some(rows) = self.source.take() {
            for row in rows {
                self.save(&row?)?;
            }
        }
        Ok(())
    }
}

struct SourceRows {
    state: Arc<Mutex<CopyState>>,
}

impl Iterator for SourceRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        let mut state = self.state.lock();
        let row = match state.source.as_mut()?.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        Some(state.save(&row).map(|()| row))
    }
}

fn replay(state: Arc<Mutex<CopyState>>) -> Result<RowStream> {
    let store = {
        let mut state = state.lock();
        state.drain_source()?;
        debug!(rows = state.seq, "replaying duplicated rows");
        state
            .store
            .take()
            .ok_or_else(|| Error::Invariant("duplicate store already replayed".into()))?
    };
    let items = store.into_items(false)?;
    Ok(Box::new(
        items.map(|item| item.map(|(_, row)| row).map_err(Error::from)),
    ))
}

impl Processor for Duplicate {
    fn name(&self) -> &str {
        "duplicate"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        let source = match &self.source {
            Some(name) => name.clone(),
            None => package
                .resources
                .first()
                .map(|r| r.name.clone())
                .ok_or_else(|| Error::config("cannot duplicate from an empty package"))?,
        };
        let Some(index) = package.resource_index(&source) else {
            return Err(Error::config(format!(
                "resource '{source}' to duplicate not found (found: {:?})",
                package.resource_names()
            )));
        };
        let target_name = self
            .target_name
            .clone()
            .unwrap_or_else(|| format!("{source}_copy"));
        let target_path = self
            .target_path
            .clone()
            .unwrap_or_else(|| format!("{target_name}.csv"));

        let mut copy = package.resources[index].clone();
        copy.name = target_name.clone();
        copy.path = Some(target_path);
        if self.duplicate_to_end {
            package.resources.push(copy);
        } else {
            package.resources.insert(index + 1, copy);
        }

        self.source = Some(source);
        self.target_name = Some(target_name);
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let Duplicate {
            source,
            batch_size,
            duplicate_to_end,
            ..
        } = *self;
        let Some(source) = source else {
            return Err(Error::Invariant(
                "duplicate resources processed before package".into(),
            ));
        };
        let options = StoreOptions {
            batch_size,
            ..ctx.store_options()
        };

        let mut out: Vec<RowStream> = Vec::with_capacity(resources.len() + 1);
        let mut seen = false;
        let mut tail = None;
        for r in resources {
            if seen || r.name() != source {
                out.push(r.rows);
                continue;
            }
            seen = true;
            let state = Arc::new(Mutex::new(CopyState {
                source: Some(r.rows),
                store: Some(OrderedStore::new(options.clone())),
                seq: 0,
            }));
            out.push(Box::new(SourceRows {
                state: state.clone(),
            }));
            let replayed = stream::lazy(move || replay(state));
            if duplicate_to_end {
                tail = Some(replayed);
            } else {
                out.push(replayed);
            }
        }
        out.extend(tail);
        Ok(out)
    }
}
