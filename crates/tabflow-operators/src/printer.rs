//! Print a sample of each matched resource as a text table.
//!
//! Rows pass through unchanged; the table is written once the resource has
//! been read to the end. The sample holds the first `num_rows` rows, then
//! windows at geometrically growing offsets, then the last `last_rows`
//! rows, with `...` marking skipped stretches.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tabflow_core::prelude::*;

use crate::traits::{map_matched, Processor, ProcessorContext};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Row(usize, Vec<String>),
    Gap,
}

/// Decides which rows make it into the printed table.
struct Sampler {
    num_rows: usize,
    last_rows: usize,
    window: usize,
    shown: Vec<Line>,
    last: Vec<(usize, Vec<String>)>,
}

impl Sampler {
    fn new(num_rows: usize, last_rows: Option<usize>) -> Self {
        Self {
            num_rows,
            last_rows: last_rows.unwrap_or(num_rows),
            window: 1,
            shown: Vec::new(),
            last: Vec::new(),
        }
    }

    fn last_shown(&self) -> Option<usize> {
        self.shown.iter().rev().find_map(|l| match l {
            Line::Row(i, _) => Some(*i),
            Line::Gap => None,
        })
    }

    /// `index` is 1-based.
    fn push(&mut self, index: usize, cells: Vec<String>) {
        if index >= self.window && index - self.window == self.num_rows + 1 {
            self.window = self.window.saturating_mul(self.num_rows.max(1));
        }
        if index >= self.window && index - self.window <= self.num_rows {
            self.last.clear();
            if matches!(self.shown.last(), Some(Line::Row(i, _)) if *i != index - 1) {
                self.shown.push(Line::Gap);
            }
            self.shown.push(Line::Row(index, cells));
        } else {
            self.last.push((index, cells));
            if self.last.len() > self.last_rows {
                self.last.remove(0);
            }
        }
    }

    fn finish(mut self) -> Vec<Line> {
        if let (Some(shown), Some((first, _))) = (self.last_shown(), self.last.first()) {
            if shown + 1 != *first {
                self.shown.push(Line::Gap);
            }
        }
        self.shown
            .extend(self.last.drain(..).map(|(i, cells)| Line::Row(i, cells)));
        self.shown
    }
}

fn truncate(value: &Value, max: Option<usize>) -> String {
    let s = value.to_string();
    match max {
        Some(max) if s.chars().count() > max => {
            let mut out: String = s.chars().take(max).collect();
            out.push_str(" ...");
            out
        }
        _ => s,
    }
}

fn render(title: &str, headers: &[String], lines: &[Line]) -> String {
    let mut widths: Vec<usize> = std::iter::once(1)
        .chain(headers.iter().map(|h| h.chars().count()))
        .collect();
    for line in lines {
        if let Line::Row(i, cells) = line {
            widths[0] = widths[0].max(i.to_string().len());
            for (w, c) in widths[1..].iter_mut().zip(cells) {
                *w = (*w).max(c.chars().count());
            }
        }
    }
    let row = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<width$}", width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut out = format!("{title}:\n");
    out.push_str(&row(std::iter::once("#".to_string())
        .chain(headers.iter().cloned())
        .collect()));
    out.push('\n');
    out.push_str(&row(widths.iter().map(|w| "-".repeat(*w)).collect()));
    out.push('\n');
    for line in lines {
        let cells = match line {
            Line::Row(i, cells) => std::iter::once(i.to_string())
                .chain(cells.iter().cloned())
                .collect(),
            Line::Gap => vec!["...".to_string()],
        };
        out.push_str(&row(cells));
        out.push('\n');
    }
    out
}

pub struct Printer {
    num_rows: usize,
    last_rows: Option<usize>,
    fields: Option<Vec<String>>,
    max_cell_size: Option<usize>,
    resources: ResourceMatcher,
    sink: Sink,
    columns: Vec<(String, Vec<(String, String)>)>,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    pub fn new() -> Self {
        Self {
            num_rows: 10,
            last_rows: None,
            fields: None,
            max_cell_size: Some(100),
            resources: ResourceMatcher::All,
            sink: Arc::new(Mutex::new(Box::new(io::stdout()))),
            columns: Vec::new(),
        }
    }

    pub fn num_rows(mut self, n: usize) -> Self {
        self.num_rows = n;
        self
    }

    /// Rows shown from the end; defaults to `num_rows`.
    pub fn last_rows(mut self, n: usize) -> Self {
        self.last_rows = Some(n);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Longer cells are cut and suffixed with ` ...`; `None` disables it.
    pub fn max_cell_size(mut self, max: Option<usize>) -> Self {
        self.max_cell_size = max;
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }

    /// Write tables to `out` instead of stdout.
    pub fn sink(mut self, out: impl Write + Send + 'static) -> Self {
        self.sink = Arc::new(Mutex::new(Box::new(out)));
        self
    }
}

struct PrintRows {
    rows: RowStream,
    title: String,
    fields: Vec<(String, String)>,
    max_cell_size: Option<usize>,
    sampler: Option<Sampler>,
    index: usize,
    sink: Sink,
}

impl PrintRows {
    fn flush(&mut self) -> Result<()> {
        let Some(sampler) = self.sampler.take() else {
            return Ok(());
        };
        let headers: Vec<String> = self
            .fields
            .iter()
            .map(|(name, ty)| format!("{name} ({ty})"))
            .collect();
        let table = render(&self.title, &headers, &sampler.finish());
        let mut sink = self.sink.lock();
        sink.write_all(table.as_bytes())?;
        sink.flush()?;
        Ok(())
    }
}

impl Iterator for PrintRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        self.sampler.as_ref()?;
        match self.rows.next() {
            Some(Ok(row)) => {
                if let Some(sampler) = self.sampler.as_mut() {
                    self.index += 1;
                    let cells = self
                        .fields
                        .iter()
                        .map(|(name, _)| truncate(row.get_or_null(name), self.max_cell_size))
                        .collect();
                    sampler.push(self.index, cells);
                }
                Some(Ok(row))
            }
            Some(Err(e)) => Some(Err(e)),
            None => self.flush().err().map(Err),
        }
    }
}

impl Processor for Printer {
    fn name(&self) -> &str {
        "printer"
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        self.columns = package
            .resources
            .iter()
            .filter(|r| self.resources.matches(&r.name))
            .map(|r| {
                let fields = r
                    .schema
                    .fields
                    .iter()
                    .filter(|f| self.fields.as_ref().map_or(true, |keep| keep.contains(&f.name)))
                    .map(|f| (f.name.clone(), f.field_type.clone()))
                    .collect();
                (r.name.clone(), fields)
            })
            .collect();
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let Printer {
            num_rows,
            last_rows,
            max_cell_size,
            resources: matcher,
            sink,
            columns,
            ..
        } = *self;
        map_matched(resources, &matcher, |r| {
            let fields = columns
                .iter()
                .find(|(name, _)| name == r.name())
                .map(|(_, fields)| fields.clone())
                .unwrap_or_default();
            let rows: RowStream = Box::new(PrintRows {
                title: r.name().to_string(),
                rows: r.rows,
                fields,
                max_cell_size,
                sampler: Some(Sampler::new(num_rows, last_rows)),
                index: 0,
                sink: sink.clone(),
            });
            Ok(rows)
        })
    }
}
