//! Lazy row streams and the package-level data stream.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::row::Row;
use crate::schema::{PackageDescriptor, ResourceDescriptor};

/// Single-pass, pull-based sequence of rows.
pub type RowStream = Box<dyn Iterator<Item = Result<Row>> + Send>;

pub fn empty_rows() -> RowStream {
    Box::new(std::iter::empty())
}

pub fn rows_from_vec(rows: Vec<Row>) -> RowStream {
    Box::new(rows.into_iter().map(Ok))
}

/// Defer building a stream until its first row is pulled. An error from
/// `init` is yielded once, then the stream ends.
pub fn lazy<F>(init: F) -> RowStream
where
    F: FnOnce() -> Result<RowStream> + Send + 'static,
{
    Box::new(Lazy {
        init: Some(init),
        inner: None,
    })
}

struct Lazy<F> {
    init: Option<F>,
    inner: Option<RowStream>,
}

impl<F> Iterator for Lazy<F>
where
    F: FnOnce() -> Result<RowStream>,
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        if let Some(init) = self.init.take() {
            match init() {
                Ok(stream) => self.inner = Some(stream),
                Err(e) => return Some(Err(e)),
            }
        }
        self.inner.as_mut()?.next()
    }
}

/// Pull `before` to exhaustion, surfacing only their errors, then continue
/// with `then`.
pub fn drain_then(before: Vec<RowStream>, then: RowStream) -> RowStream {
    if before.is_empty() {
        return then;
    }
    Box::new(errors_only(before).chain(then))
}

/// Continue `first` with the exhaustion of `after`, surfacing only their
/// errors.
pub fn then_drain(first: RowStream, after: Vec<RowStream>) -> RowStream {
    if after.is_empty() {
        return first;
    }
    Box::new(first.chain(errors_only(after)))
}

fn errors_only(streams: Vec<RowStream>) -> impl Iterator<Item = Result<Row>> + Send {
    streams
        .into_iter()
        .flatten()
        .filter_map(|row| row.err().map(Err))
}

/// A resource descriptor paired with its rows.
pub struct ResourceStream {
    pub descriptor: ResourceDescriptor,
    pub rows: RowStream,
}

impl ResourceStream {
    pub fn new(descriptor: ResourceDescriptor, rows: RowStream) -> Self {
        Self { descriptor, rows }
    }

    pub fn from_rows(descriptor: ResourceDescriptor, rows: Vec<Row>) -> Self {
        Self::new(descriptor, rows_from_vec(rows))
    }

    pub fn empty(descriptor: ResourceDescriptor) -> Self {
        Self::new(descriptor, empty_rows())
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Pull every row and return them. Stops at the first error.
    pub fn collect_rows(self) -> Result<Vec<Row>> {
        self.rows.collect()
    }

    /// Pull every row, discarding them. Returns the row count.
    pub fn drain(self) -> Result<usize> {
        let mut n = 0;
        for row in self.rows {
            row?;
            n += 1;
        }
        Ok(n)
    }
}

impl fmt::Debug for ResourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceStream")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Pair streams positionally with `resources`. Missing streams become empty,
/// surplus streams are dropped.
pub fn align(resources: &[ResourceDescriptor], streams: Vec<RowStream>) -> Vec<ResourceStream> {
    let surplus = streams.len().saturating_sub(resources.len());
    if surplus > 0 {
        warn!(
            surplus,
            resources = resources.len(),
            "dropping row streams with no matching resource"
        );
    }
    let mut streams = streams.into_iter();
    resources
        .iter()
        .map(|descriptor| {
            let rows = streams.next().unwrap_or_else(empty_rows);
            ResourceStream::new(descriptor.clone(), rows)
        })
        .collect()
}

/// Shared counters and values reported by processors. Cloning shares the
/// underlying map.
#[derive(Clone, Default)]
pub struct Stats {
    inner: Arc<Mutex<BTreeMap<String, serde_json::Value>>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, key: &str, by: i64) {
        let mut map = self.inner.lock();
        let current = map.get(key).and_then(serde_json::Value::as_i64).unwrap_or(0);
        map.insert(key.to_string(), serde_json::Value::from(current + by));
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.inner.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        self.inner.lock().clone()
    }
}

impl fmt::Debug for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

/// A package descriptor with its resource streams, ready to be pulled.
pub struct DataStream {
    pub package: PackageDescriptor,
    pub resources: Vec<ResourceStream>,
    pub stats: Stats,
}

impl DataStream {
    pub fn new(package: PackageDescriptor, resources: Vec<ResourceStream>, stats: Stats) -> Self {
        Self {
            package,
            resources,
            stats,
        }
    }

    pub fn empty() -> Self {
        Self::new(PackageDescriptor::default(), Vec::new(), Stats::new())
    }

    /// Drain every resource in order. Returns the package with the
    /// collected stats merged in.
    pub fn drain(self) -> Result<PackageDescriptor> {
        let DataStream {
            mut package,
            resources,
            stats,
        } = self;
        for resource in resources {
            resource.drain()?;
        }
        package.stats.extend(stats.snapshot());
        Ok(package)
    }
}

impl fmt::Debug for DataStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStream")
            .field("package", &self.package)
            .field("resources", &self.resources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn align_pads_and_truncates() {
        let resources = vec![ResourceDescriptor::new("a"), ResourceDescriptor::new("b")];

        let padded = align(&resources, vec![rows_from_vec(vec![row! { "x" => 1 }])]);
        assert_eq!(padded.len(), 2);
        let mut padded = padded.into_iter();
        assert_eq!(padded.next().unwrap().drain().unwrap(), 1);
        assert_eq!(padded.next().unwrap().drain().unwrap(), 0);

        let truncated = align(&resources, vec![empty_rows(), empty_rows(), empty_rows()]);
        assert_eq!(
            truncated.iter().map(|r| r.name()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn lazy_runs_init_on_first_pull() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let mut s = lazy(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(rows_from_vec(vec![row! { "a" => 1 }]))
        });
        assert!(!called.load(Ordering::SeqCst));
        assert!(s.next().unwrap().is_ok());
        assert!(called.load(Ordering::SeqCst));
        assert!(s.next().is_none());
    }

    #[test]
    fn drained_streams_only_surface_errors() {
        let failing: RowStream = Box::new(
            vec![
                Ok(row! { "x" => 1 }),
                Err(crate::error::Error::config("boom")),
            ]
            .into_iter(),
        );
        let kept = rows_from_vec(vec![row! { "y" => 2 }]);
        let out: Vec<_> = drain_then(vec![failing], kept).collect();
        assert_eq!(out.len(), 2);
        assert!(out[0].is_err());
        assert_eq!(out[1].as_ref().unwrap(), &row! { "y" => 2 });
    }

    #[test]
    fn stats_are_shared_between_clones() {
        let stats = Stats::new();
        let other = stats.clone();
        other.increment("rows", 2);
        stats.increment("rows", 3);
        assert_eq!(stats.get("rows"), Some(serde_json::json!(5)));
    }
}
