//! Row validation against the schema or a custom check.

use std::sync::Arc;

use tabflow_core::prelude::*;

use crate::traits::{map_matched, Processor, ProcessorContext};

type RowCheck = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

#[derive(Clone)]
enum Check {
    /// Cast every schema field through the caster.
    Schema(Arc<dyn Caster>),
    Field(String, Arc<dyn Fn(&Value) -> bool + Send + Sync>),
    Row(RowCheck),
}

/// Validate rows of the matched resources, handling failures per
/// [`OnError`]. Row indexes in errors are 0-based.
pub struct Validate {
    check: Check,
    on_error: OnError,
    resources: ResourceMatcher,
    schemas: Vec<(String, Schema)>,
}

impl Validate {
    /// Cast each row against its resource schema with [`BasicCaster`].
    pub fn new() -> Self {
        Self::with_caster(Arc::new(BasicCaster))
    }

    pub fn with_caster(caster: Arc<dyn Caster>) -> Self {
        Self::build(Check::Schema(caster))
    }

    pub fn field(
        name: impl Into<String>,
        check: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::build(Check::Field(name.into(), Arc::new(check)))
    }

    pub fn rows(check: impl Fn(&Row) -> bool + Send + Sync + 'static) -> Self {
        Self::build(Check::Row(Arc::new(check)))
    }

    fn build(check: Check) -> Self {
        Self {
            check,
            on_error: OnError::Raise,
            resources: ResourceMatcher::All,
            schemas: Vec::new(),
        }
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }
}

impl Default for Validate {
    fn default() -> Self {
        Self::new()
    }
}

/// Cast `row` against `schema`. `Ok(None)` means the row is dropped.
pub fn cast_row(
    resource: &str,
    index: usize,
    mut row: Row,
    schema: &Schema,
    caster: &dyn Caster,
    on_error: OnError,
) -> Result<Option<Row>> {
    let mut keep = true;
    for field in &schema.fields {
        let value = row.get(&field.name).cloned().unwrap_or_default();
        match caster.cast(field, value) {
            Ok(cast) => {
                row.insert(field.name.clone(), cast);
            }
            Err(cause) => match on_error {
                OnError::Raise => {
                    return Err(Error::Validation {
                        resource: resource.to_string(),
                        row_index: index,
                        cause,
                    })
                }
                OnError::Drop => keep = false,
                OnError::Ignore => {}
                OnError::Clear => {
                    row.insert(field.name.clone(), Value::Null);
                }
            },
        }
    }
    Ok(keep.then_some(row))
}

/// Apply `on_error` to a row that failed a custom check.
fn reject(
    resource: &str,
    index: usize,
    row: Row,
    cause: CastError,
    on_error: OnError,
) -> Result<Option<Row>> {
    match on_error {
        OnError::Raise => Err(Error::Validation {
            resource: resource.to_string(),
            row_index: index,
            cause,
        }),
        OnError::Ignore => Ok(Some(row)),
        OnError::Drop | OnError::Clear => Ok(None),
    }
}

impl Check {
    fn apply(
        &self,
        resource: &str,
        index: usize,
        row: Row,
        schema: &Schema,
        on_error: OnError,
    ) -> Result<Option<Row>> {
        match self {
            Check::Schema(caster) => {
                cast_row(resource, index, row, schema, caster.as_ref(), on_error)
            }
            Check::Field(name, check) => {
                if check(row.get_or_null(name)) {
                    Ok(Some(row))
                } else {
                    let cause = CastError::new(name, "field check failed");
                    reject(resource, index, row, cause, on_error)
                }
            }
            Check::Row(check) => {
                if check(&row) {
                    Ok(Some(row))
                } else {
                    let cause = CastError::new("", "row check failed");
                    reject(resource, index, row, cause, on_error)
                }
            }
        }
    }
}

impl Processor for Validate {
    fn name(&self) -> &str {
        "validate"
    }

    fn process_package(
        &mut self,
        package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        self.schemas = package
            .resources
            .iter()
            .filter(|r| self.resources.matches(&r.name))
            .map(|r| (r.name.clone(), r.schema.clone()))
            .collect();
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let Validate {
            check,
            on_error,
            resources: matcher,
            schemas,
        } = *self;
        map_matched(resources, &matcher, |r| {
            let name = r.descriptor.name.clone();
            let schema = schemas
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, s)| s.clone())
                .unwrap_or_else(|| r.descriptor.schema.clone());
            let check = check.clone();
            let rows: RowStream = Box::new(r.rows.enumerate().filter_map(move |(index, row)| {
                row.and_then(|row| check.apply(&name, index, row, &schema, on_error))
                    .transpose()
            }));
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![FieldDescriptor::new("n", "integer")])
    }

    #[test]
    fn cast_policies() {
        let bad = row! { "n" => "x" };
        let cast = |policy| cast_row("r", 3, bad.clone(), &schema(), &BasicCaster, policy);

        let err = cast(OnError::Raise).unwrap_err();
        assert!(matches!(err, Error::Validation { row_index: 3, .. }));
        assert_eq!(cast(OnError::Drop).unwrap(), None);
        assert_eq!(cast(OnError::Ignore).unwrap(), Some(bad.clone()));
        assert_eq!(
            cast(OnError::Clear).unwrap(),
            Some(row! { "n" => Value::Null })
        );
    }

    #[test]
    fn casts_good_values() {
        let row = row! { "n" => "7" };
        let out = cast_row("r", 0, row, &schema(), &BasicCaster, OnError::Raise).unwrap();
        assert_eq!(out, Some(row! { "n" => 7 }));
    }
}
