//! Dump a data stream as a directory of CSV files plus `datapackage.json`.
//!
//! Each resource is written to its descriptor `path` (`<name>.csv` when it
//! has none) under the output directory, one header line of schema field
//! names and then one record per row. The package descriptor is written
//! last, once every resource has been read to the end, with a
//! `count_of_rows` on each resource.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tabflow_core::prelude::*;
use tabflow_operators::{Processor, ProcessorContext};
use tracing::debug;

pub const DESCRIPTOR_FILE: &str = "datapackage.json";

fn csv_error(e: csv::Error) -> Error {
    Error::Io(e.into())
}

fn cell(value: &Value) -> String {
    value.to_string()
}

/// Resource paths must stay inside the output directory.
fn check_path(resource: &str, path: &str) -> Result<()> {
    let inside = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || !inside {
        return Err(Error::config(format!(
            "resource '{resource}' path '{path}' must be relative to the output directory"
        )));
    }
    Ok(())
}

pub struct DumpToPath {
    out_path: PathBuf,
    package: PackageDescriptor,
}

impl DumpToPath {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            package: PackageDescriptor::default(),
        }
    }
}

struct Package {
    out_path: PathBuf,
    package: PackageDescriptor,
    remaining: usize,
}

impl Package {
    fn end_resource(&mut self, index: usize, rows: u64) -> Result<()> {
        if let Some(resource) = self.package.resources.get_mut(index) {
            resource
                .properties
                .insert("count_of_rows".into(), serde_json::Value::from(rows));
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.write_descriptor()?;
        }
        Ok(())
    }

    fn write_descriptor(&self) -> Result<()> {
        fs::create_dir_all(&self.out_path)?;
        let path = self.out_path.join(DESCRIPTOR_FILE);
        let out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(out, &self.package)?;
        debug!(path = %path.display(), "package dump complete");
        Ok(())
    }
}

struct CsvRows {
    rows: RowStream,
    index: usize,
    path: PathBuf,
    fields: Vec<String>,
    out: Option<csv::Writer<File>>,
    count: u64,
    package: Arc<Mutex<Package>>,
    done: bool,
}

impl CsvRows {
    fn out(&mut self) -> Result<&mut csv::Writer<File>> {
        if self.out.is_none() {
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir)?;
            }
            let mut out = csv::Writer::from_writer(File::create(&self.path)?);
            out.write_record(&self.fields).map_err(csv_error)?;
            debug!(path = %self.path.display(), "opened resource dump");
            self.out = Some(out);
        }
        self.out
            .as_mut()
            .ok_or_else(|| Error::Invariant("resource dump already closed".into()))
    }

    fn write_row(&mut self, row: &Row) -> Result<()> {
        let record: Vec<String> = self
            .fields
            .iter()
            .map(|f| cell(row.get_or_null(f)))
            .collect();
        self.out()?.write_record(&record).map_err(csv_error)?;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out()?;
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        self.package.lock().end_resource(self.index, self.count)
    }
}

impl Iterator for CsvRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        if self.done {
            return None;
        }
        match self.rows.next() {
            Some(Ok(row)) => match self.write_row(&row) {
                Ok(()) => Some(Ok(row)),
                Err(e) => {
                    self.done = true;
                    Some(Err(e))
                }
            },
            Some(Err(e)) => Some(Err(e)),
            None => {
                self.done = true;
                self.finish().err().map(Err)
            }
        }
    }
}

impl Processor for DumpToPath {
    fn name(&self) -> &str {
        "dump_to_path"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        for resource in &mut package.resources {
            let path = resource
                .path
                .get_or_insert_with(|| format!("{}.csv", resource.name));
            check_path(&resource.name, path)?;
            resource
                .properties
                .insert("format".into(), serde_json::Value::from("csv"));
        }
        self.package = package.clone();
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let DumpToPath { out_path, package } = *self;
        let targets: Vec<(PathBuf, Vec<String>)> = package
            .resources
            .iter()
            .map(|r| {
                let path = out_path.join(r.path.as_deref().unwrap_or_default());
                (path, r.schema.field_names().map(String::from).collect())
            })
            .collect();
        let state = Package {
            out_path,
            package,
            remaining: resources.len(),
        };
        if resources.is_empty() {
            state.write_descriptor()?;
            return Ok(Vec::new());
        }
        let state = Arc::new(Mutex::new(state));
        resources
            .into_iter()
            .zip(targets)
            .enumerate()
            .map(|(index, (r, (path, fields)))| -> Result<RowStream> {
                Ok(Box::new(CsvRows {
                    rows: r.rows,
                    index,
                    path,
                    fields,
                    out: None,
                    count: 0,
                    package: state.clone(),
                    done: false,
                }))
            })
            .collect()
    }
}
