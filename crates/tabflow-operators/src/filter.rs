//! Row filtering by predicate or by field equality.

use std::sync::Arc;

use tabflow_core::prelude::*;

use crate::traits::{map_matched, Processor, ProcessorContext};

pub type RowPredicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

#[derive(Clone)]
enum Condition {
    Predicate(RowPredicate),
    /// Keep a row when any `equals` pair matches or any `not_equals` pair
    /// differs. Missing fields compare as null.
    Fields {
        equals: Vec<Row>,
        not_equals: Vec<Row>,
    },
}

impl Condition {
    fn keep(&self, row: &Row) -> bool {
        match self {
            Condition::Predicate(p) => p(row),
            Condition::Fields { equals, not_equals } => {
                equals
                    .iter()
                    .flat_map(Row::iter)
                    .any(|(k, v)| row.get_or_null(k) == v)
                    || not_equals
                        .iter()
                        .flat_map(Row::iter)
                        .any(|(k, v)| row.get_or_null(k) != v)
            }
        }
    }
}

pub struct FilterRows {
    condition: Condition,
    resources: ResourceMatcher,
}

impl FilterRows {
    pub fn new(predicate: impl Fn(&Row) -> bool + Send + Sync + 'static) -> Self {
        Self {
            condition: Condition::Predicate(Arc::new(predicate)),
            resources: ResourceMatcher::All,
        }
    }

    /// Keep rows matching any field/value pair of any of `conditions`.
    pub fn equals(conditions: Vec<Row>) -> Self {
        Self::fields(conditions, Vec::new())
    }

    /// Keep rows differing from any field/value pair of any of `conditions`.
    pub fn not_equals(conditions: Vec<Row>) -> Self {
        Self::fields(Vec::new(), conditions)
    }

    pub fn fields(equals: Vec<Row>, not_equals: Vec<Row>) -> Self {
        Self {
            condition: Condition::Fields { equals, not_equals },
            resources: ResourceMatcher::All,
        }
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }
}

impl Processor for FilterRows {
    fn name(&self) -> &str {
        "filter_rows"
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
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let FilterRows {
            condition,
            resources: matcher,
        } = *self;
        map_matched(resources, &matcher, |r| {
            let condition = condition.clone();
            let rows: RowStream = Box::new(r.rows.filter(move |row| match row {
                Ok(row) => condition.keep(row),
                Err(_) => true,
            }));
            Ok(rows)
        })
    }
}
