//! Remove fields from matched resources.
//!
//! Field names are anchored regular expressions unless `regex(false)` is
//! set. Rows keep only the fields left in the schema, so undeclared row
//! fields are dropped as well.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use tabflow_core::prelude::*;
use tracing::warn;

use crate::traits::{map_matched, Processor, ProcessorContext};

pub struct DeleteFields {
    fields: Vec<String>,
    regex: bool,
    resources: ResourceMatcher,
    kept: HashMap<String, Arc<HashSet<String>>>,
}

impl DeleteFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            regex: true,
            resources: ResourceMatcher::All,
            kept: HashMap::new(),
        }
    }

    /// Treat field names as literals instead of patterns.
    pub fn regex(mut self, regex: bool) -> Self {
        self.regex = regex;
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }

    fn patterns(&self) -> Result<Vec<Regex>> {
        self.fields
            .iter()
            .map(|f| {
                let body = if self.regex {
                    f.clone()
                } else {
                    regex::escape(f)
                };
                Regex::new(&format!("^(?:{body})$"))
                    .map_err(|e| Error::config(format!("invalid field pattern '{f}': {e}")))
            })
            .collect()
    }
}

impl Processor for DeleteFields {
    fn name(&self) -> &str {
        "delete_fields"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        let patterns = self.patterns()?;
        let mut matched = vec![false; patterns.len()];
        self.kept.clear();
        for resource in &mut package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            resource.schema.fields.retain(|f| {
                match patterns.iter().position(|p| p.is_match(&f.name)) {
                    Some(i) => {
                        matched[i] = true;
                        false
                    }
                    None => true,
                }
            });
            let names = resource.schema.field_names().map(String::from).collect();
            self.kept.insert(resource.name.clone(), Arc::new(names));
        }
        let unmatched: Vec<&str> = self
            .fields
            .iter()
            .zip(&matched)
            .filter(|(_, hit)| !**hit)
            .map(|(f, _)| f.as_str())
            .collect();
        if !unmatched.is_empty() {
            warn!(fields = ?unmatched, "failed to match fields to delete");
        }
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let DeleteFields {
            resources: matcher,
            kept,
            ..
        } = *self;
        map_matched(resources, &matcher, |r| {
            let keep = kept.get(r.name()).cloned().ok_or_else(|| {
                Error::Invariant(format!("no field list for resource '{}'", r.name()))
            })?;
            let rows: RowStream = Box::new(r.rows.map(move |row| {
                let mut row = row?;
                row.retain(|name, _| keep.contains(name));
                Ok(row)
            }));
            Ok(rows)
        })
    }
}
