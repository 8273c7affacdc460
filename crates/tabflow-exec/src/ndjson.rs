//! Newline-delimited JSON dump and load of a whole data stream.
//!
//! Layout: line 1 is the package descriptor; then, for each resource in
//! descriptor order, one row per line followed by a blank line. Values use
//! the extended-JSON tags of [`tabflow_core::value`], so decimals, dates and
//! sets survive the round trip.
//!
//! The dump writes `<path>.active` and renames it to `<path>` once the last
//! resource has been pulled to the end, so a present `<path>` is always
//! complete.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tabflow_core::prelude::*;
use tabflow_core::stream::{drain_then, empty_rows};
use tabflow_operators::{Processor, ProcessorContext};
use tracing::debug;

const ACTIVE_SUFFIX: &str = ".active";

fn active_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(ACTIVE_SUFFIX);
    PathBuf::from(s)
}

/// Pass every row through while writing the stream to `path`.
///
/// Resources are expected to be pulled in descriptor order, which is what
/// [`DataStream::drain`] and the flow runner do.
pub struct DumpNdjson {
    path: PathBuf,
    package: PackageDescriptor,
}

impl DumpNdjson {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            package: PackageDescriptor::default(),
        }
    }
}

struct Writer {
    path: PathBuf,
    package: PackageDescriptor,
    out: Option<BufWriter<File>>,
    remaining: usize,
}

impl Writer {
    fn out(&mut self) -> Result<&mut BufWriter<File>> {
        if self.out.is_none() {
            let active = active_path(&self.path);
            if let Some(dir) = active.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let mut out = BufWriter::new(File::create(&active)?);
            serde_json::to_writer(&mut out, &self.package)?;
            out.write_all(b"\n")?;
            debug!(path = %active.display(), "opened stream dump");
            self.out = Some(out);
        }
        self.out
            .as_mut()
            .ok_or_else(|| Error::Invariant("stream dump already closed".into()))
    }

    fn write_row(&mut self, row: &Row) -> Result<()> {
        let out = self.out()?;
        serde_json::to_writer(&mut *out, row)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn end_resource(&mut self) -> Result<()> {
        self.out()?.write_all(b"\n")?;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.finish()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut out = match self.out.take() {
            Some(out) => out,
            None => {
                self.out()?;
                self.out
                    .take()
                    .ok_or_else(|| Error::Invariant("stream dump not opened".into()))?
            }
        };
        out.flush()?;
        drop(out);
        fs::rename(active_path(&self.path), &self.path)?;
        debug!(path = %self.path.display(), "stream dump complete");
        Ok(())
    }
}

struct DumpRows {
    rows: RowStream,
    writer: Arc<Mutex<Writer>>,
    done: bool,
}

impl Iterator for DumpRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        if self.done {
            return None;
        }
        match self.rows.next() {
            Some(Ok(row)) => match self.writer.lock().write_row(&row) {
                Ok(()) => Some(Ok(row)),
                Err(e) => {
                    self.done = true;
                    Some(Err(e))
                }
            },
            Some(Err(e)) => Some(Err(e)),
            None => {
                self.done = true;
                self.writer.lock().end_resource().err().map(Err)
            }
        }
    }
}

impl Processor for DumpNdjson {
    fn name(&self) -> &str {
        "dump_ndjson"
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.package = package.clone();
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let DumpNdjson { path, package } = *self;
        let mut writer = Writer {
            path,
            package,
            out: None,
            remaining: resources.len(),
        };
        if resources.is_empty() {
            writer.finish()?;
            return Ok(Vec::new());
        }
        let writer = Arc::new(Mutex::new(writer));
        Ok(resources
            .into_iter()
            .map(|r| -> RowStream {
                Box::new(DumpRows {
                    rows: r.rows,
                    writer: writer.clone(),
                    done: false,
                })
            })
            .collect())
    }
}

/// Replace the upstream package with one read back from `path`.
///
/// Upstream streams are drained before the first loaded row.
pub struct LoadNdjson {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    resources: usize,
}

impl LoadNdjson {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            resources: 0,
        }
    }
}

struct Reader {
    input: BufReader<File>,
    /// Index of the resource whose rows are next in the file.
    group: usize,
    line: String,
}

impl Reader {
    /// Next row of the current group, or `None` at its blank terminator.
    fn read_row(&mut self) -> Result<Option<Row>> {
        self.line.clear();
        if self.input.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        let line = self.line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(line)?))
    }

    /// Advance to the start of `group`, skipping rows nobody pulled.
    fn seek_group(&mut self, group: usize) -> Result<()> {
        while self.group < group {
            while self.read_row()?.is_some() {}
            self.group += 1;
        }
        Ok(())
    }
}

struct LoadRows {
    reader: Arc<Mutex<Reader>>,
    group: usize,
    done: bool,
}

impl Iterator for LoadRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        if self.done {
            return None;
        }
        let mut reader = self.reader.lock();
        if reader.group > self.group {
            self.done = true;
            return None;
        }
        let row = reader
            .seek_group(self.group)
            .and_then(|()| reader.read_row());
        match row {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                reader.group += 1;
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Processor for LoadNdjson {
    fn name(&self) -> &str {
        "load_ndjson"
    }

    fn process_package(
        &mut self,
        _package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        let mut input = BufReader::new(File::open(&self.path)?);
        let mut line = String::new();
        input.read_line(&mut line)?;
        if line.trim().is_empty() {
            return Err(Error::config(format!(
                "stream file {} has no package descriptor",
                self.path.display()
            )));
        }
        let package: PackageDescriptor = serde_json::from_str(line.trim())?;
        self.reader = Some(input);
        self.resources = package.resources.len();
        debug!(
            path = %self.path.display(),
            resources = self.resources,
            "loading stream dump"
        );
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let LoadNdjson {
            reader, resources: count, ..
        } = *self;
        let input = reader
            .ok_or_else(|| Error::Invariant("stream file read before its descriptor".into()))?;
        let reader = Arc::new(Mutex::new(Reader {
            input,
            group: 0,
            line: String::new(),
        }));
        let upstream: Vec<RowStream> = resources.into_iter().map(|r| r.rows).collect();
        let mut streams: Vec<RowStream> = (0..count)
            .map(|group| -> RowStream {
                Box::new(LoadRows {
                    reader: reader.clone(),
                    group,
                    done: false,
                })
            })
            .collect();
        if let Some(first) = streams.first_mut() {
            let rows = std::mem::replace(first, empty_rows());
            *first = drain_then(upstream, rows);
        }
        Ok(streams)
    }
}
