//! Drop rows whose primary key was already seen.

use std::collections::HashMap;

use tabflow_core::prelude::*;
use tabflow_core::stream;
use tabflow_store::KeySet;

use crate::traits::{map_matched, Processor, ProcessorContext};

/// Keep the first row per distinct primary key in every matched resource.
/// Resources without a primary key pass through untouched.
#[derive(Debug, Default)]
pub struct Deduplicate {
    resources: ResourceMatcher,
    primary_keys: HashMap<String, Vec<String>>,
}

impl Deduplicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }
}

/// Identity of a row under `key`: the JSON of its key values.
fn row_key(row: &Row, key: &[String]) -> Result<String> {
    let values: Vec<&Value> = key.iter().map(|k| row.get_or_null(k)).collect();
    Ok(serde_json::to_string(&values)?)
}

fn deduplicated(rows: RowStream, key: Vec<String>, mut seen: KeySet) -> RowStream {
    Box::new(rows.filter_map(move |row| {
        let step = row.and_then(|row| {
            let k = row_key(&row, &key)?;
            Ok(seen.insert(k)?.then_some(row))
        });
        step.transpose()
    }))
}

impl Processor for Deduplicate {
    fn name(&self) -> &str {
        "deduplicate"
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        self.primary_keys = package
            .resources
            .iter()
            .filter(|r| self.resources.matches(&r.name))
            .filter(|r| !r.schema.primary_key.is_empty())
            .map(|r| (r.name.clone(), r.schema.primary_key.clone()))
            .collect();
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let Deduplicate {
            resources: matcher,
            mut primary_keys,
        } = *self;
        let limit = ctx.config.keyset_memory_limit;
        let options = ctx.store_options();
        map_matched(resources, &matcher, |r| {
            let Some(key) = primary_keys.remove(r.name()) else {
                return Ok(r.rows);
            };
            let options = options.clone();
            let rows = r.rows;
            Ok(stream::lazy(move || {
                Ok(deduplicated(rows, key, KeySet::new(limit, options)))
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_core::stream::rows_from_vec;

    #[test]
    fn key_distinguishes_types() {
        let key = vec!["id".to_string()];
        let a = row_key(&row! { "id" => 1 }, &key).unwrap();
        let b = row_key(&row! { "id" => "1" }, &key).unwrap();
        assert_ne!(a, b);
        let missing = row_key(&Row::new(), &key).unwrap();
        assert_eq!(missing, "[null]");
    }

    #[test]
    fn keeps_first_occurrence() {
        let rows = rows_from_vec(vec![
            row! { "id" => 1, "x" => "a" },
            row! { "id" => 2, "x" => "b" },
            row! { "id" => 1, "x" => "c" },
        ]);
        let out: Vec<Row> = deduplicated(
            rows,
            vec!["id".to_string()],
            KeySet::new(1, StoreOptions::in_memory()),
        )
        .collect::<Result<_>>()
        .unwrap();
        assert_eq!(
            out,
            vec![row! { "id" => 1, "x" => "a" }, row! { "id" => 2, "x" => "b" }]
        );
    }
}
