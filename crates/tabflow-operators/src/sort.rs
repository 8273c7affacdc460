//! External sort over an [`OrderedStore`].
//!
//! Every row is written under `key + sequence`, where the sequence is a
//! 16-digit hex counter, and read back in key order. The sequence keeps the
//! sort stable; when sorting in reverse it is complemented so equal keys
//! still come out in input order.

use tabflow_core::prelude::*;
use tabflow_core::stream;
use tabflow_store::OrderedStore;

use crate::key::{KeyCalc, KeySpec};
use crate::traits::{map_matched, Processor, ProcessorContext};

pub struct SortRows {
    key: KeySpec,
    resources: ResourceMatcher,
    reverse: bool,
    batch_size: usize,
    calc: Option<KeyCalc>,
}

impl SortRows {
    pub fn new(key: impl Into<KeySpec>) -> Self {
        Self {
            key: key.into(),
            resources: ResourceMatcher::All,
            reverse: false,
            batch_size: 1000,
            calc: None,
        }
    }

    /// Sort by a custom row → key function.
    pub fn by(f: impl Fn(&Row) -> Result<String> + Send + Sync + 'static) -> Self {
        Self::new(KeySpec::custom(f))
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Row counter appended after the key. The leading NUL sorts below every key
/// byte, so a key that is a prefix of another still sorts first.
fn sequence_suffix(seq: u64, reverse: bool) -> String {
    let seq = if reverse { u64::MAX - seq } else { seq };
    format!("\u{0}{seq:016x}")
}

fn sorted(
    rows: RowStream,
    calc: KeyCalc,
    reverse: bool,
    batch_size: usize,
    options: StoreOptions,
) -> Result<RowStream> {
    let mut store: OrderedStore<Row> = OrderedStore::new(options);
    let mut seq: u64 = 0;
    let entries = rows.map(|row| {
        let row = row?;
        let key = calc.sort_key(&row)? + &sequence_suffix(seq, reverse);
        seq += 1;
        Ok::<_, Error>((key, row))
    });
    let count = store.insert(entries, batch_size)?;
    tracing::debug!(rows = count, reverse, "sorted rows into store");
    let items = store.into_items(reverse)?;
    Ok(Box::new(
        items.map(|item| item.map(|(_, row)| row).map_err(Error::from)),
    ))
}

impl Processor for SortRows {
    fn name(&self) -> &str {
        "sort_rows"
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        self.calc = Some(KeyCalc::for_sort(&self.key)?);
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let SortRows {
            key,
            resources: matcher,
            reverse,
            batch_size,
            calc,
        } = *self;
        let calc = match calc {
            Some(calc) => calc,
            None => KeyCalc::for_sort(&key)?,
        };
        let options = ctx.store_options();
        map_matched(resources, &matcher, |r| {
            let calc = calc.clone();
            let options = options.clone();
            let rows = r.rows;
            Ok(stream::lazy(move || {
                sorted(rows, calc, reverse, batch_size, options)
            }))
        })
    }
}
