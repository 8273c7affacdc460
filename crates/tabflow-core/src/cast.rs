//! Field-level casting contract.
//!
//! The pipeline does not own a type-casting engine. It talks to one through
//! [`Caster`]; [`BasicCaster`] covers the handful of types the processors
//! themselves produce.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::CastError;
use crate::schema::FieldDescriptor;
use crate::value::{Value, DATE_FORMAT};

pub trait Caster: Send + Sync {
    fn cast(&self, field: &FieldDescriptor, value: Value) -> Result<Value, CastError>;
}

/// What to do with a row whose value fails to cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Fail the pipeline.
    #[default]
    Raise,
    /// Skip the row.
    Drop,
    /// Keep the row as it was.
    Ignore,
    /// Null out the offending field.
    Clear,
}

/// Casts `string`, `integer`, `number`, `boolean` and `date`; everything
/// else, including `any`, passes through. Null always passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicCaster;

impl BasicCaster {
    fn fail(field: &FieldDescriptor, value: &Value) -> CastError {
        CastError::new(
            &field.name,
            format!("value {value:?} is not a valid {}", field.field_type),
        )
    }
}

impl Caster for BasicCaster {
    fn cast(&self, field: &FieldDescriptor, value: Value) -> Result<Value, CastError> {
        if value.is_null() {
            return Ok(value);
        }
        match field.field_type.as_str() {
            "string" => match value {
                Value::String(_) => Ok(value),
                other => Err(Self::fail(field, &other)),
            },
            "integer" => match value {
                Value::Integer(_) => Ok(value),
                Value::Number(n) if n.fract() == 0.0 && n.is_finite() => {
                    Ok(Value::Integer(n as i64))
                }
                Value::Decimal(d) if d.fract().is_zero() => d
                    .to_i64()
                    .map(Value::Integer)
                    .ok_or_else(|| Self::fail(field, &value)),
                Value::String(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| Self::fail(field, &value)),
                other => Err(Self::fail(field, &other)),
            },
            "number" => match value {
                Value::Number(_) | Value::Decimal(_) => Ok(value),
                Value::Integer(i) => Ok(Value::Decimal(i.into())),
                Value::String(ref s) => Value::parse_decimal(s.trim())
                    .map(Value::Decimal)
                    .ok_or_else(|| Self::fail(field, &value)),
                other => Err(Self::fail(field, &other)),
            },
            "boolean" => match value {
                Value::Bool(_) => Ok(value),
                Value::String(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Ok(Value::Bool(true)),
                    "false" | "no" | "0" => Ok(Value::Bool(false)),
                    _ => Err(Self::fail(field, &value)),
                },
                other => Err(Self::fail(field, &other)),
            },
            "date" => match value {
                Value::Date(_) => Ok(value),
                Value::String(ref s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                    .map(Value::Date)
                    .map_err(|_| Self::fail(field, &value)),
                other => Err(Self::fail(field, &other)),
            },
            _ => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casts_strings_to_declared_types() {
        let c = BasicCaster;
        let int = FieldDescriptor::new("n", "integer");
        assert_eq!(c.cast(&int, Value::from(" 42 ")), Ok(Value::Integer(42)));
        assert!(c.cast(&int, Value::from("x")).is_err());

        let b = FieldDescriptor::new("b", "boolean");
        assert_eq!(c.cast(&b, Value::from("Yes")), Ok(Value::Bool(true)));

        let s = FieldDescriptor::new("s", "string");
        assert!(c.cast(&s, Value::Integer(1)).is_err());
        assert_eq!(c.cast(&s, Value::Null), Ok(Value::Null));
    }

    #[test]
    fn any_passes_through() {
        let any = FieldDescriptor::new("a", "any");
        let v = Value::Array(vec![Value::Integer(1)]);
        assert_eq!(BasicCaster.cast(&any, v.clone()), Ok(v));
    }
}
