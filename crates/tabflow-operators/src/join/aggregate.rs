//! Aggregators for join and group-by.
//!
//! Each aggregator folds non-null source values into an [`AggState`], which
//! is stored per key between rows, and turns the final state into a value.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tabflow_core::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    Sum,
    Avg,
    Median,
    Max,
    Min,
    First,
    Last,
    #[default]
    Any,
    Count,
    Set,
    Array,
    Counters,
}

/// Folded state for one field of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggState {
    Value(Value),
    Avg { count: u64, sum: Value },
    Count(u64),
    List(Vec<Value>),
    /// Distinct values in first-seen order.
    Set(Vec<Value>),
    /// Value → occurrences, in first-seen order.
    Counter(Vec<(Value, u64)>),
}

impl Aggregator {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Avg => "avg",
            Aggregator::Median => "median",
            Aggregator::Max => "max",
            Aggregator::Min => "min",
            Aggregator::First => "first",
            Aggregator::Last => "last",
            Aggregator::Any => "any",
            Aggregator::Count => "count",
            Aggregator::Set => "set",
            Aggregator::Array => "array",
            Aggregator::Counters => "counters",
        }
    }

    /// Output field type when it does not follow the source field.
    pub fn data_type(self) -> Option<&'static str> {
        match self {
            Aggregator::Count => Some("integer"),
            Aggregator::Set | Aggregator::Array | Aggregator::Counters => Some("array"),
            _ => None,
        }
    }

    /// Whether the output field copies the whole source field descriptor.
    pub fn copies_properties(self) -> bool {
        matches!(
            self,
            Aggregator::First | Aggregator::Last | Aggregator::Median | Aggregator::Any
        )
    }

    /// Fold `new` (never null) into `current`.
    pub fn combine(self, current: Option<AggState>, new: Value) -> Result<AggState> {
        let mismatch = |state: &AggState| {
            Error::Invariant(format!(
                "aggregator '{}' received foreign state {state:?}",
                self.as_str()
            ))
        };
        Ok(match (self, current) {
            (Aggregator::Count, None) => AggState::Count(1),
            (Aggregator::Count, Some(AggState::Count(n))) => AggState::Count(n + 1),

            (Aggregator::Avg, None) => AggState::Avg { count: 1, sum: new },
            (Aggregator::Avg, Some(AggState::Avg { count, sum })) => AggState::Avg {
                count: count + 1,
                sum: add(&sum, &new)?,
            },

            (Aggregator::Median | Aggregator::Array, None) => AggState::List(vec![new]),
            (Aggregator::Median | Aggregator::Array, Some(AggState::List(mut items))) => {
                items.push(new);
                AggState::List(items)
            }

            (Aggregator::Set, None) => AggState::Set(vec![new]),
            (Aggregator::Set, Some(AggState::Set(mut items))) => {
                if !items.contains(&new) {
                    items.push(new);
                }
                AggState::Set(items)
            }

            (Aggregator::Counters, current) => {
                let mut counts = match current {
                    None => Vec::new(),
                    Some(AggState::Counter(counts)) => counts,
                    Some(other) => return Err(mismatch(&other)),
                };
                let items = match new {
                    Value::Array(items) | Value::Set(items) => items,
                    scalar => vec![scalar],
                };
                for item in items {
                    match counts.iter_mut().find(|(v, _)| *v == item) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((item, 1)),
                    }
                }
                AggState::Counter(counts)
            }

            (_, None) => AggState::Value(new),
            (Aggregator::Sum, Some(AggState::Value(curr))) => AggState::Value(add(&new, &curr)?),
            (Aggregator::Max, Some(AggState::Value(curr))) => {
                AggState::Value(if order(&new, &curr)? == Ordering::Greater {
                    new
                } else {
                    curr
                })
            }
            (Aggregator::Min, Some(AggState::Value(curr))) => {
                AggState::Value(if order(&new, &curr)? == Ordering::Less {
                    new
                } else {
                    curr
                })
            }
            (Aggregator::First, Some(AggState::Value(curr))) => AggState::Value(curr),
            (Aggregator::Last | Aggregator::Any, Some(AggState::Value(_))) => AggState::Value(new),

            (_, Some(other)) => return Err(mismatch(&other)),
        })
    }

    /// Turn the folded state into the output value. `None` means every
    /// source value was null.
    pub fn finalize(self, state: Option<AggState>) -> Result<Value> {
        Ok(match state {
            None => match self {
                Aggregator::Set | Aggregator::Array | Aggregator::Counters => Value::Array(vec![]),
                _ => Value::Null,
            },
            Some(AggState::Value(v)) => v,
            Some(AggState::Count(n)) => Value::Integer(n as i64),
            Some(AggState::Avg { count, sum }) => {
                sum.div_count(count as usize).ok_or_else(|| {
                    Error::Aggregate(format!("cannot average {sum:?} over {count} values"))
                })?
            }
            Some(AggState::List(items)) if self == Aggregator::Median => median(items)?,
            Some(AggState::List(items)) | Some(AggState::Set(items)) => Value::Array(items),
            Some(AggState::Counter(mut counts)) => {
                // Stable: ties keep first-seen order.
                counts.sort_by(|a, b| b.1.cmp(&a.1));
                Value::Array(
                    counts
                        .into_iter()
                        .map(|(v, n)| Value::Array(vec![v, Value::Integer(n as i64)]))
                        .collect(),
                )
            }
        })
    }
}

fn add(a: &Value, b: &Value) -> Result<Value> {
    a.add(b)
        .ok_or_else(|| Error::Aggregate(format!("cannot add {a:?} and {b:?}")))
}

fn order(a: &Value, b: &Value) -> Result<Ordering> {
    a.compare(b)
        .ok_or_else(|| Error::Aggregate(format!("cannot compare {a:?} and {b:?}")))
}

fn median(mut items: Vec<Value>) -> Result<Value> {
    if items.is_empty() {
        return Ok(Value::Null);
    }
    let mut failed = None;
    items.sort_by(|a, b| {
        a.compare(b).unwrap_or_else(|| {
            failed.get_or_insert_with(|| format!("cannot compare {a:?} and {b:?}"));
            Ordering::Equal
        })
    });
    if let Some(msg) = failed {
        return Err(Error::Aggregate(msg));
    }
    let mid = items.len() / 2;
    Ok(items.swap_remove(mid))
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "sum" => Aggregator::Sum,
            "avg" => Aggregator::Avg,
            "median" => Aggregator::Median,
            "max" => Aggregator::Max,
            "min" => Aggregator::Min,
            "first" => Aggregator::First,
            "last" => Aggregator::Last,
            "any" => Aggregator::Any,
            "count" => Aggregator::Count,
            "set" => Aggregator::Set,
            "array" => Aggregator::Array,
            "counters" => Aggregator::Counters,
            other => return Err(Error::config(format!("unknown aggregator '{other}'"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(agg: Aggregator, values: &[Value]) -> Value {
        let mut state = None;
        for v in values {
            state = Some(agg.combine(state, v.clone()).unwrap());
        }
        agg.finalize(state).unwrap()
    }

    #[test]
    fn numeric_aggregates() {
        let vals = [Value::Integer(3), Value::Integer(1), Value::Integer(2)];
        assert_eq!(fold(Aggregator::Sum, &vals), Value::Integer(6));
        assert_eq!(fold(Aggregator::Avg, &vals), Value::Number(2.0));
        assert_eq!(fold(Aggregator::Max, &vals), Value::Integer(3));
        assert_eq!(fold(Aggregator::Min, &vals), Value::Integer(1));
        assert_eq!(fold(Aggregator::Median, &vals), Value::Integer(2));
        assert_eq!(fold(Aggregator::Median, &vals[..2]), Value::Integer(3));
        assert_eq!(fold(Aggregator::Count, &vals), Value::Integer(3));
    }

    #[test]
    fn median_takes_upper_middle_of_even_groups() {
        let ints = [4, 1, 3, 2].map(Value::Integer);
        assert_eq!(fold(Aggregator::Median, &ints), Value::Integer(3));
        let words = [Value::from("y"), Value::from("x")];
        assert_eq!(fold(Aggregator::Median, &words), Value::from("y"));
    }

    #[test]
    fn positional_aggregates() {
        let vals = [Value::from("a"), Value::from("b")];
        assert_eq!(fold(Aggregator::First, &vals), Value::from("a"));
        assert_eq!(fold(Aggregator::Last, &vals), Value::from("b"));
        assert_eq!(fold(Aggregator::Any, &vals), Value::from("b"));
    }

    #[test]
    fn collection_aggregates() {
        let vals = [Value::from("x"), Value::from("y"), Value::from("x")];
        assert_eq!(
            fold(Aggregator::Set, &vals),
            Value::Array(vec![Value::from("x"), Value::from("y")])
        );
        assert_eq!(fold(Aggregator::Array, &vals), Value::Array(vals.to_vec()));
        assert_eq!(
            fold(Aggregator::Counters, &vals),
            Value::Array(vec![
                Value::Array(vec![Value::from("x"), Value::Integer(2)]),
                Value::Array(vec![Value::from("y"), Value::Integer(1)]),
            ])
        );
    }

    #[test]
    fn empty_states_finalize() {
        assert_eq!(Aggregator::Avg.finalize(None).unwrap(), Value::Null);
        assert_eq!(Aggregator::Set.finalize(None).unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn incompatible_values_fail() {
        let err = Aggregator::Sum
            .combine(Some(AggState::Value(Value::Integer(1))), Value::from("a"))
            .unwrap_err();
        assert!(matches!(err, Error::Aggregate(_)));
        assert!("nope".parse::<Aggregator>().unwrap_err().is_config());
    }
}
