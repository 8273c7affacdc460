//! Apply a row transform on a pool of worker threads.
//!
//! Layout, per matched resource, once the first row passes the predicate:
//!
//! ```text
//!   upstream ──> feeder ──(predicate)──> input queue ──> worker × N ──┐
//!                   │                                                 ├──> output queue ──> consumer
//!                   └──────(others)───────────────────────────────────┘
//! ```
//!
//! Both queues are bounded crossbeam channels, so a slow consumer stalls the
//! feeder instead of buffering the whole resource. Rows move between threads
//! by ownership. The consumer sees rows in arrival order, which is not input
//! order once more than one worker runs. The stream ends when every sender
//! of the output queue is gone.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use tabflow_core::prelude::*;
use tabflow_operators::{Processor, ProcessorContext};
use tracing::{debug, warn};

type Transform = Arc<dyn Fn(&mut Row) -> Result<()> + Send + Sync>;
type Predicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

pub struct Parallelize {
    transform: Transform,
    predicate: Option<Predicate>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    join_timeout: Option<Duration>,
    resources: ResourceMatcher,
}

impl Parallelize {
    pub fn new(transform: impl Fn(&mut Row) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            transform: Arc::new(transform),
            predicate: None,
            workers: None,
            queue_capacity: None,
            join_timeout: None,
            resources: ResourceMatcher::All,
        }
    }

    /// Only rows passing `predicate` go to the workers; the rest are
    /// forwarded untouched.
    pub fn predicate(mut self, predicate: impl Fn(&Row) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Defaults to [`FlowConfig::parallel_workers`].
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }
}

#[derive(Clone)]
struct Settings {
    resource: String,
    transform: Transform,
    predicate: Option<Predicate>,
    workers: usize,
    capacity: usize,
    join_timeout: Duration,
    stats: Stats,
}

impl Settings {
    fn selects(&self, row: &Row) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(row))
    }

    fn failed_rows_key(&self) -> String {
        format!("{}:parallel_failed_rows", self.resource)
    }
}

impl Processor for Parallelize {
    fn name(&self) -> &str {
        "parallelize"
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let config = &ctx.config;
        let base = Settings {
            resource: String::new(),
            transform: self.transform,
            predicate: self.predicate,
            workers: self.workers.unwrap_or(config.parallel_workers).max(1),
            capacity: self
                .queue_capacity
                .unwrap_or(config.parallel_queue_capacity)
                .max(1),
            join_timeout: self
                .join_timeout
                .unwrap_or(Duration::from_millis(config.parallel_join_timeout_ms)),
            stats: ctx.stats.clone(),
        };
        let matcher = self.resources;
        Ok(resources
            .into_iter()
            .map(|r| -> RowStream {
                if !matcher.matches(r.name()) {
                    return r.rows;
                }
                let settings = Settings {
                    resource: r.descriptor.name.clone(),
                    ..base.clone()
                };
                Box::new(ParallelRows {
                    state: State::Waiting(Some(r.rows)),
                    settings,
                })
            })
            .collect())
    }
}

enum State {
    /// No row has matched the predicate yet; rows are forwarded inline.
    Waiting(Option<RowStream>),
    Running(Pool),
    Done,
}

struct ParallelRows {
    state: State,
    settings: Settings,
}

impl Iterator for ParallelRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        loop {
            match &mut self.state {
                State::Waiting(rows) => {
                    let Some(upstream) = rows.as_mut() else {
                        self.state = State::Done;
                        continue;
                    };
                    match upstream.next() {
                        Some(Ok(row)) if self.settings.selects(&row) => {
                            let Some(upstream) = rows.take() else {
                                continue;
                            };
                            match Pool::start(row, upstream, &self.settings) {
                                Ok(pool) => self.state = State::Running(pool),
                                Err(e) => {
                                    self.state = State::Done;
                                    return Some(Err(e));
                                }
                            }
                        }
                        Some(item) => return Some(item),
                        None => self.state = State::Done,
                    }
                }
                State::Running(pool) => match pool.recv() {
                    Some(item) => return Some(item),
                    None => {
                        if let State::Running(pool) =
                            std::mem::replace(&mut self.state, State::Done)
                        {
                            pool.shutdown();
                        }
                    }
                },
                State::Done => return None,
            }
        }
    }
}

/// Signals a finished thread on drop, so panics are reported too.
struct DoneGuard {
    id: usize,
    done: Sender<usize>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.done.send(self.id);
    }
}

struct Pool {
    output: Option<Receiver<Result<Row>>>,
    handles: Vec<(usize, JoinHandle<()>)>,
    done: Receiver<usize>,
    join_timeout: Duration,
    resource: String,
}

impl Pool {
    fn start(first: Row, upstream: RowStream, settings: &Settings) -> Result<Pool> {
        let (input_tx, input_rx) = bounded::<Row>(settings.capacity);
        let (output_tx, output_rx) = bounded::<Result<Row>>(settings.capacity);
        let (done_tx, done_rx) = unbounded::<usize>();
        debug!(
            resource = %settings.resource,
            workers = settings.workers,
            capacity = settings.capacity,
            "starting parallel pool"
        );

        let mut handles = Vec::with_capacity(settings.workers + 1);
        for id in 0..settings.workers {
            let input = input_rx.clone();
            let output = output_tx.clone();
            let guard = DoneGuard {
                id,
                done: done_tx.clone(),
            };
            let settings = settings.clone();
            let handle = thread::Builder::new()
                .name(format!("tabflow-parallel-{id}"))
                .spawn(move || {
                    let _guard = guard;
                    work(input, output, &settings);
                })?;
            handles.push((id, handle));
        }
        drop(input_rx);

        let feeder_id = settings.workers;
        let guard = DoneGuard {
            id: feeder_id,
            done: done_tx,
        };
        let feeder_settings = settings.clone();
        let handle = thread::Builder::new()
            .name("tabflow-parallel-feeder".into())
            .spawn(move || {
                let _guard = guard;
                feed(first, upstream, input_tx, output_tx, &feeder_settings);
            })?;
        handles.push((feeder_id, handle));

        Ok(Pool {
            output: Some(output_rx),
            handles,
            done: done_rx,
            join_timeout: settings.join_timeout,
            resource: settings.resource.clone(),
        })
    }

    fn recv(&mut self) -> Option<Result<Row>> {
        self.output.as_ref()?.recv().ok()
    }

    /// Close the output queue and join the threads that finish within the
    /// timeout. The rest are detached.
    fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        // Dropping the receiver makes every pending send fail, which stops
        // the feeder and the workers.
        self.output.take();
        let deadline = Instant::now() + self.join_timeout;
        let mut finished = HashSet::new();
        while finished.len() < self.handles.len() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.done.recv_timeout(left) {
                Ok(id) => {
                    finished.insert(id);
                }
                Err(_) => break,
            }
        }
        for (id, handle) in self.handles.drain(..) {
            if finished.contains(&id) {
                if handle.join().is_err() {
                    warn!(resource = %self.resource, thread = id, "parallel thread panicked");
                }
            } else {
                warn!(
                    resource = %self.resource,
                    thread = id,
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "detaching parallel thread that did not finish in time"
                );
            }
        }
        debug!(resource = %self.resource, "parallel pool stopped");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.join();
        }
    }
}

fn feed(
    first: Row,
    upstream: RowStream,
    input: Sender<Row>,
    output: Sender<Result<Row>>,
    settings: &Settings,
) {
    if input.send(first).is_err() {
        return;
    }
    for item in upstream {
        let sent = match item {
            Ok(row) => {
                let selected = catch_unwind(AssertUnwindSafe(|| settings.selects(&row)));
                match selected {
                    Ok(true) => input.send(row).is_ok(),
                    Ok(false) => output.send(Ok(row)).is_ok(),
                    Err(_) => {
                        let _ = output.send(Err(Error::Invariant(
                            "parallel predicate panicked".into(),
                        )));
                        false
                    }
                }
            }
            Err(e) => {
                let _ = output.send(Err(e));
                false
            }
        };
        if !sent {
            return;
        }
    }
}

fn work(input: Receiver<Row>, output: Sender<Result<Row>>, settings: &Settings) {
    for row in input {
        let mut transformed = row.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            (settings.transform)(&mut transformed)
        }));
        let row = match outcome {
            Ok(Ok(())) => transformed,
            Ok(Err(e)) => {
                warn!(resource = %settings.resource, error = %e, "parallel transform failed");
                settings.stats.increment(&settings.failed_rows_key(), 1);
                row
            }
            Err(_) => {
                warn!(resource = %settings.resource, "parallel transform panicked");
                settings.stats.increment(&settings.failed_rows_key(), 1);
                row
            }
        };
        if output.send(Ok(row)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_core::stream::rows_from_vec;

    fn run(p: Parallelize, rows: Vec<Row>) -> (Vec<Row>, Stats) {
        let ctx = ProcessorContext::default();
        let stream = ResourceStream::new(ResourceDescriptor::new("r"), rows_from_vec(rows));
        let mut out = Box::new(p).process_resources(vec![stream], &ctx).unwrap();
        let rows = out.remove(0).collect::<Result<Vec<_>>>().unwrap();
        (rows, ctx.stats)
    }

    fn sorted(mut rows: Vec<Row>) -> Vec<i64> {
        let mut ns: Vec<i64> = rows
            .drain(..)
            .map(|r| r.get_or_null("n").as_i64().unwrap())
            .collect();
        ns.sort();
        ns
    }

    #[test]
    fn transforms_selected_rows_only() {
        let rows = (0..200).map(|n| row! { "n" => n as i64 }).collect();
        let p = Parallelize::new(|row: &mut Row| {
            let n = row.get_or_null("n").as_i64().unwrap_or(0);
            row.insert("n", n + 1000);
            Ok(())
        })
        .predicate(|row| row.get_or_null("n").as_i64().unwrap_or(0) % 2 == 0)
        .workers(4);
        let (out, _) = run(p, rows);
        let expected: Vec<i64> = {
            let mut v: Vec<i64> = (0..200)
                .map(|n| if n % 2 == 0 { n + 1000 } else { n })
                .collect();
            v.sort();
            v
        };
        assert_eq!(sorted(out), expected);
    }

    #[test]
    fn failed_rows_are_forwarded_unmodified() {
        let rows = (0..10).map(|n| row! { "n" => n as i64 }).collect();
        let p = Parallelize::new(|row: &mut Row| {
            row.insert("touched", true);
            if row.get_or_null("n").as_i64() == Some(3) {
                return Err(Error::config("bad row"));
            }
            if row.get_or_null("n").as_i64() == Some(4) {
                panic!("worker blew up");
            }
            Ok(())
        })
        .workers(2);
        let (out, stats) = run(p, rows);
        assert_eq!(out.len(), 10);
        for row in &out {
            let n = row.get_or_null("n").as_i64().unwrap();
            assert_eq!(row.contains_key("touched"), n != 3 && n != 4, "row {n}");
        }
        assert_eq!(stats.get("r:parallel_failed_rows"), Some(serde_json::json!(2)));
    }

    #[test]
    fn no_pool_when_nothing_matches() {
        let rows = vec![row! { "n" => 1 }, row! { "n" => 2 }];
        let p = Parallelize::new(|_row: &mut Row| Ok(())).predicate(|_| false);
        let (out, _) = run(p, rows.clone());
        assert_eq!(out, rows);
    }

    #[test]
    fn upstream_errors_surface() {
        let ctx = ProcessorContext::default();
        let rows: RowStream = Box::new(
            vec![Ok(row! { "n" => 1 }), Err(Error::config("upstream"))].into_iter(),
        );
        let stream = ResourceStream::new(ResourceDescriptor::new("r"), rows);
        let p = Box::new(Parallelize::new(|_row: &mut Row| Ok(())).workers(1));
        let mut out = p.process_resources(vec![stream], &ctx).unwrap();
        let items: Vec<Result<Row>> = out.remove(0).collect();
        assert!(items.iter().any(|i| i.is_err()));
    }

    #[test]
    fn early_drop_stops_the_pool() {
        let ctx = ProcessorContext::default();
        let rows = (0..10_000).map(|n| row! { "n" => n as i64 }).collect();
        let stream = ResourceStream::new(ResourceDescriptor::new("r"), rows_from_vec(rows));
        let p = Box::new(
            Parallelize::new(|_row: &mut Row| Ok(()))
                .workers(2)
                .queue_capacity(4)
                .join_timeout(Duration::from_secs(5)),
        );
        let mut out = p.process_resources(vec![stream], &ctx).unwrap();
        let mut rows = out.remove(0);
        assert!(rows.next().is_some());
        drop(rows);
    }
}
