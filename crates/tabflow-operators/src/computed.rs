//! Add fields computed from other fields of the same row.
//!
//! Fields are computed in declaration order and written back into the row
//! before the next one runs, so a later field may use an earlier one.
//! Aggregating operations skip null and missing source values.

use std::sync::Arc;

use tabflow_core::prelude::*;

use crate::key::KeyTemplate;
use crate::traits::{map_matched, Processor, ProcessorContext};

pub type RowFunction = Arc<dyn Fn(&Row) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub enum Operation {
    Sum,
    Avg,
    Max,
    Min,
    Multiply,
    Constant(Value),
    /// Source values rendered as strings and joined with the separator.
    Join(String),
    /// A `{field}` template over the whole row.
    Format(String),
    Custom(RowFunction),
}

#[cfg(test)]
impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Sum => f.write_str("Sum"),
            Operation::Avg => f.write_str("Avg"),
            Operation::Max => f.write_str("Max"),
            Operation::Min => f.write_str("Min"),
            Operation::Multiply => f.write_str("Multiply"),
            Operation::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Operation::Join(s) => f.debug_tuple("Join").field(s).finish(),
            Operation::Format(s) => f.debug_tuple("Format").field(s).finish(),
            Operation::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Operation {
    /// Operation by name. `with` is the separator for `join`, the template
    /// for `format` and the value for `constant`; other operations ignore it.
    pub fn named(name: &str, with: &str) -> Result<Self> {
        Ok(match name {
            "sum" => Operation::Sum,
            "avg" => Operation::Avg,
            "max" => Operation::Max,
            "min" => Operation::Min,
            "multiply" => Operation::Multiply,
            "constant" => Operation::Constant(Value::from(with)),
            "join" => Operation::Join(with.to_string()),
            "format" => Operation::Format(with.to_string()),
            other => {
                return Err(Error::config(format!(
                    "unknown computed field operation '{other}'"
                )))
            }
        })
    }
}

#[derive(Clone)]
pub struct ComputedField {
    target: String,
    operation: Operation,
    source: Vec<String>,
    field_type: Option<String>,
}

impl ComputedField {
    pub fn new(target: impl Into<String>, operation: Operation) -> Self {
        Self {
            target: target.into(),
            operation,
            source: Vec::new(),
            field_type: None,
        }
    }

    pub fn format(target: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(target, Operation::Format(template.into()))
    }

    pub fn constant(target: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(target, Operation::Constant(value.into()))
    }

    pub fn function(
        target: impl Into<String>,
        f: impl Fn(&Row) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::new(target, Operation::Custom(Arc::new(f)))
    }

    pub fn source<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declared type of the new field, overriding the inferred one.
    pub fn field_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    fn inferred_type(&self, schema: &Schema) -> String {
        if let Some(t) = &self.field_type {
            return t.clone();
        }
        let types: Vec<&str> = schema
            .fields
            .iter()
            .filter(|f| self.source.contains(&f.name))
            .map(|f| f.field_type.as_str())
            .collect();
        let inferred = if types.contains(&"any") {
            "any"
        } else if matches!(self.operation, Operation::Format(_) | Operation::Join(_)) {
            "string"
        } else if types.contains(&"number") || matches!(self.operation, Operation::Avg) {
            "number"
        } else {
            types.first().copied().unwrap_or("any")
        };
        inferred.to_string()
    }

    fn compile(&self) -> Result<Compiled> {
        let kind = match &self.operation {
            Operation::Format(template) => Kind::Format(KeyTemplate::parse(template)?),
            Operation::Sum => Kind::Sum,
            Operation::Avg => Kind::Avg,
            Operation::Max => Kind::Max,
            Operation::Min => Kind::Min,
            Operation::Multiply => Kind::Multiply,
            Operation::Constant(v) => Kind::Constant(v.clone()),
            Operation::Join(sep) => Kind::Join(sep.clone()),
            Operation::Custom(f) => Kind::Custom(f.clone()),
        };
        Ok(Compiled {
            target: self.target.clone(),
            source: self.source.clone(),
            kind,
        })
    }
}

#[derive(Clone)]
enum Kind {
    Sum,
    Avg,
    Max,
    Min,
    Multiply,
    Constant(Value),
    Join(String),
    Format(KeyTemplate),
    Custom(RowFunction),
}

#[derive(Clone)]
struct Compiled {
    target: String,
    source: Vec<String>,
    kind: Kind,
}

fn combine(
    values: impl Iterator<Item = Value>,
    op: &str,
    f: impl Fn(&Value, &Value) -> Option<Value>,
) -> Result<Option<Value>> {
    let mut acc: Option<Value> = None;
    for v in values {
        acc = Some(match acc {
            None => v,
            Some(a) => f(&a, &v)
                .ok_or_else(|| Error::Aggregate(format!("cannot {op} {a:?} and {v:?}")))?,
        });
    }
    Ok(acc)
}

impl Compiled {
    fn compute(&self, row: &Row, row_number: usize) -> Result<Value> {
        let values: Vec<Value> = self
            .source
            .iter()
            .map(|f| row.get_or_null(f))
            .filter(|v| !v.is_null())
            .cloned()
            .collect();
        Ok(match &self.kind {
            Kind::Sum => combine(values.into_iter(), "add", Value::add)?
                .unwrap_or(Value::Integer(0)),
            Kind::Avg => {
                let count = values.len();
                match combine(values.into_iter(), "add", Value::add)? {
                    Some(sum) => sum.div_count(count).ok_or_else(|| {
                        Error::Aggregate(format!("cannot average {sum:?}"))
                    })?,
                    None => Value::Null,
                }
            }
            Kind::Max => pick(values, std::cmp::Ordering::Greater)?,
            Kind::Min => pick(values, std::cmp::Ordering::Less)?,
            Kind::Multiply => {
                combine(values.into_iter(), "multiply", Value::mul)?.unwrap_or(Value::Null)
            }
            Kind::Constant(v) => v.clone(),
            Kind::Join(sep) => Value::String(
                values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(sep),
            ),
            Kind::Format(template) => Value::String(template.render(row, row_number)),
            Kind::Custom(f) => f(row)?,
        })
    }
}

/// Extreme value in the direction of `wanted`; the first one wins ties.
fn pick(values: Vec<Value>, wanted: std::cmp::Ordering) -> Result<Value> {
    let mut best: Option<Value> = None;
    for v in values {
        best = Some(match best {
            None => v,
            Some(b) => {
                let ord = v.compare(&b).ok_or_else(|| {
                    Error::Aggregate(format!("cannot compare {v:?} and {b:?}"))
                })?;
                if ord == wanted {
                    v
                } else {
                    b
                }
            }
        });
    }
    Ok(best.unwrap_or(Value::Null))
}

/// Add one or more computed fields to matched resources.
pub struct AddComputedField {
    fields: Vec<ComputedField>,
    resources: ResourceMatcher,
    compiled: Arc<Vec<Compiled>>,
}

impl AddComputedField {
    pub fn new(field: ComputedField) -> Self {
        Self::fields(vec![field])
    }

    pub fn fields(fields: Vec<ComputedField>) -> Self {
        Self {
            fields,
            resources: ResourceMatcher::All,
            compiled: Arc::new(Vec::new()),
        }
    }

    pub fn field(mut self, field: ComputedField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn resources(mut self, matcher: impl Into<ResourceMatcher>) -> Self {
        self.resources = matcher.into();
        self
    }
}

impl Processor for AddComputedField {
    fn name(&self) -> &str {
        "add_computed_field"
    }

    fn process_package(
        &mut self,
        mut package: PackageDescriptor,
        _ctx: &ProcessorContext,
    ) -> Result<PackageDescriptor> {
        self.resources = self.resources.resolve(&package)?;
        self.compiled = Arc::new(
            self.fields
                .iter()
                .map(ComputedField::compile)
                .collect::<Result<_>>()?,
        );
        for resource in &mut package.resources {
            if !self.resources.matches(&resource.name) {
                continue;
            }
            for field in &self.fields {
                let field_type = field.inferred_type(&resource.schema);
                match resource.schema.field_mut(&field.target) {
                    Some(existing) => existing.field_type = field_type,
                    None => resource
                        .schema
                        .fields
                        .push(FieldDescriptor::new(&field.target, field_type)),
                }
            }
        }
        Ok(package)
    }

    fn process_resources(
        self: Box<Self>,
        resources: Vec<ResourceStream>,
        _ctx: &ProcessorContext,
    ) -> Result<Vec<RowStream>> {
        let AddComputedField {
            resources: matcher,
            compiled,
            ..
        } = *self;
        map_matched(resources, &matcher, |r| {
            let compiled = compiled.clone();
            let mut row_number = 0;
            let rows: RowStream = Box::new(r.rows.map(move |row| {
                let mut row = row?;
                row_number += 1;
                for field in compiled.iter() {
                    let value = field.compute(&row, row_number)?;
                    row.insert(field.target.clone(), value);
                }
                Ok(row)
            }));
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compute(field: ComputedField, row: &Row) -> Result<Value> {
        field.compile()?.compute(row, 1)
    }

    #[test]
    fn aggregating_operations_skip_nulls() {
        let row = row! { "a" => 2, "b" => Value::Null, "c" => 5 };
        let over = |op| ComputedField::new("x", op).source(["a", "b", "c"]);
        assert_eq!(compute(over(Operation::Sum), &row).unwrap(), Value::Integer(7));
        assert_eq!(compute(over(Operation::Avg), &row).unwrap(), Value::Number(3.5));
        assert_eq!(compute(over(Operation::Max), &row).unwrap(), Value::Integer(5));
        assert_eq!(compute(over(Operation::Min), &row).unwrap(), Value::Integer(2));
        assert_eq!(compute(over(Operation::Multiply), &row).unwrap(), Value::Integer(10));
        assert_eq!(
            compute(over(Operation::Join("-".into())), &row).unwrap(),
            Value::from("2-5")
        );
        let none = ComputedField::new("x", Operation::Avg).source(["b"]);
        assert_eq!(compute(none, &row).unwrap(), Value::Null);
    }

    #[test]
    fn format_renders_the_row() {
        let row = row! { "lat" => 1.5, "lon" => -2 };
        let f = ComputedField::format("coordinates", "{lat}, {lon}");
        assert_eq!(compute(f, &row).unwrap(), Value::from("1.5, -2"));
    }

    #[test]
    fn mixed_kinds_fail() {
        let row = row! { "a" => 1, "b" => "x" };
        let f = ComputedField::new("x", Operation::Sum).source(["a", "b"]);
        assert!(matches!(compute(f, &row), Err(Error::Aggregate(_))));
        assert!(Operation::named("explode", "").unwrap_err().is_config());
    }

    #[test]
    fn output_types_follow_sources() {
        let schema = Schema::new(vec![
            FieldDescriptor::new("i", "integer"),
            FieldDescriptor::new("n", "number"),
            FieldDescriptor::new("a", "any"),
        ]);
        let t = |f: ComputedField| f.inferred_type(&schema);
        assert_eq!(t(ComputedField::new("x", Operation::Sum).source(["i"])), "integer");
        assert_eq!(t(ComputedField::new("x", Operation::Sum).source(["i", "n"])), "number");
        assert_eq!(t(ComputedField::new("x", Operation::Avg).source(["i"])), "number");
        assert_eq!(t(ComputedField::format("x", "{i}")), "string");
        assert_eq!(t(ComputedField::format("x", "{a}").source(["a"])), "any");
        assert_eq!(t(ComputedField::constant("x", 1)), "any");
        assert_eq!(t(ComputedField::constant("x", 1).field_type("integer")), "integer");
    }
}
