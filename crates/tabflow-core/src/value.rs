//! Typed cell values carried in rows.
//!
//! Values serialize to plain JSON where JSON has a native representation and
//! to single-key tagged objects otherwise (`{"type{decimal}": "1.10"}`), so a
//! row written to a store or a checkpoint reads back with the same types.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::duration::IsoDuration;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const TAG_DECIMAL: &str = "type{decimal}";
const TAG_TIME: &str = "type{time}";
const TAG_DATETIME: &str = "type{datetime}";
const TAG_DATE: &str = "type{date}";
const TAG_DURATION: &str = "type{duration}";
const TAG_SET: &str = "type{set}";

/// A wall-clock timestamp with an optional fixed UTC offset and zone name.
#[derive(Debug, Clone, PartialEq)]
pub struct DateTimeValue {
    pub naive: NaiveDateTime,
    /// Offset from UTC in seconds, east positive.
    pub utc_offset: Option<i32>,
    pub tzname: Option<String>,
}

impl DateTimeValue {
    pub fn naive(naive: NaiveDateTime) -> Self {
        Self {
            naive,
            utc_offset: None,
            tzname: None,
        }
    }

    pub fn with_zone(naive: NaiveDateTime, utc_offset: i32, tzname: impl Into<String>) -> Self {
        Self {
            naive,
            utc_offset: Some(utc_offset),
            tzname: Some(tzname.into()),
        }
    }

    /// Comparable instant: offset-aware values are normalized to UTC.
    fn instant(&self) -> NaiveDateTime {
        match self.utc_offset {
            Some(offset) => self.naive - chrono::Duration::seconds(offset as i64),
            None => self.naive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Decimal(Decimal),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTimeValue),
    Duration(IsoDuration),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// Unordered collection of distinct values; kept in insertion order.
    Set(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Number(_) | Value::Decimal(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Table-schema type name describing this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "any",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Number(_) | Value::Decimal(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Duration(_) => "duration",
            Value::Array(_) | Value::Set(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Partial order between values. Numeric kinds compare with each other;
    /// other kinds only compare within the same kind.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
            (Integer(a), Decimal(b)) => Some(rust_decimal::Decimal::from(*a).cmp(b)),
            (Decimal(a), Integer(b)) => Some(a.cmp(&rust_decimal::Decimal::from(*b))),
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (String(a), String(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.instant().cmp(&b.instant())),
            (Array(a), Array(b)) => compare_seq(a, b),
            _ => None,
        }
    }

    /// `self + other` for the summing aggregator. `None` when the kinds cannot
    /// be added.
    pub fn add(&self, other: &Value) -> Option<Value> {
        use Value::*;
        match (self, other) {
            (Integer(a), Integer(b)) => Some(match a.checked_add(*b) {
                Some(sum) => Integer(sum),
                None => Number(*a as f64 + *b as f64),
            }),
            (Decimal(a), Decimal(b)) => a.checked_add(*b).map(Decimal),
            (Decimal(a), Integer(b)) | (Integer(b), Decimal(a)) => {
                a.checked_add(rust_decimal::Decimal::from(*b)).map(Decimal)
            }
            (a, b) if a.is_numeric() && b.is_numeric() => Some(Number(a.as_f64()? + b.as_f64()?)),
            (String(a), String(b)) => Some(String(format!("{a}{b}"))),
            (Array(a), Array(b)) => Some(Array(a.iter().chain(b).cloned().collect())),
            _ => None,
        }
    }

    /// Numeric product. Integer overflow falls back to a float.
    pub fn mul(&self, other: &Value) -> Option<Value> {
        use Value::*;
        match (self, other) {
            (Integer(a), Integer(b)) => Some(match a.checked_mul(*b) {
                Some(product) => Integer(product),
                None => Number(*a as f64 * *b as f64),
            }),
            (Decimal(a), Decimal(b)) => a.checked_mul(*b).map(Decimal),
            (Decimal(a), Integer(b)) | (Integer(b), Decimal(a)) => {
                a.checked_mul(rust_decimal::Decimal::from(*b)).map(Decimal)
            }
            (a, b) if a.is_numeric() && b.is_numeric() => Some(Number(a.as_f64()? * b.as_f64()?)),
            _ => None,
        }
    }

    /// `self / count` for the averaging aggregator.
    pub fn div_count(&self, count: usize) -> Option<Value> {
        if count == 0 {
            return None;
        }
        match self {
            Value::Integer(a) => Some(Value::Number(*a as f64 / count as f64)),
            Value::Number(a) => Some(Value::Number(a / count as f64)),
            Value::Decimal(a) => a
                .checked_div(Decimal::from_usize(count)?)
                .map(Value::Decimal),
            _ => None,
        }
    }

    pub fn parse_decimal(s: &str) -> Option<Decimal> {
        Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .ok()
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.naive.format(DATETIME_FORMAT)),
            Value::Duration(d) => write!(f, "{d}"),
            Value::Array(_) | Value::Object(_) | Value::Set(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(DateTimeValue::naive(v))
    }
}

impl From<DateTimeValue> for Value {
    fn from(v: DateTimeValue) -> Self {
        Value::DateTime(v)
    }
}

impl From<IsoDuration> for Value {
    fn from(v: IsoDuration) -> Self {
        Value::Duration(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        serde_json::from_value(v).unwrap_or(Value::Null)
    }
}

struct Tagged<'a, T: ?Sized>(&'static str, &'a T);

impl<T: Serialize + ?Sized> Serialize for Tagged<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.0, self.1)?;
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Decimal(d) => Tagged(TAG_DECIMAL, &d.to_string()).serialize(serializer),
            Value::Date(d) => {
                Tagged(TAG_DATE, &d.format(DATE_FORMAT).to_string()).serialize(serializer)
            }
            Value::Time(t) => {
                Tagged(TAG_TIME, &t.format(TIME_FORMAT).to_string()).serialize(serializer)
            }
            Value::DateTime(dt) => {
                let repr = (
                    dt.naive.format(DATETIME_FORMAT).to_string(),
                    dt.utc_offset,
                    dt.tzname.as_deref(),
                );
                Tagged(TAG_DATETIME, &repr).serialize(serializer)
            }
            Value::Duration(d) => Tagged(TAG_DURATION, &d.to_string()).serialize(serializer),
            Value::Set(items) => Tagged(TAG_SET, items.as_slice()).serialize(serializer),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

/// Decode a tagged object. Tags are tried in a fixed order; a tag whose
/// payload does not parse is skipped.
fn decode_tagged(map: &BTreeMap<String, Value>) -> Option<Value> {
    if let Some(Value::String(s)) = map.get(TAG_DECIMAL) {
        if let Some(d) = Value::parse_decimal(s) {
            return Some(Value::Decimal(d));
        }
    }
    if let Some(Value::String(s)) = map.get(TAG_TIME) {
        if let Ok(t) = NaiveTime::parse_from_str(s, TIME_FORMAT) {
            return Some(Value::Time(t));
        }
    }
    if let Some(Value::Array(parts)) = map.get(TAG_DATETIME) {
        if let Some(dt) = decode_datetime(parts) {
            return Some(Value::DateTime(dt));
        }
    }
    if let Some(Value::String(s)) = map.get(TAG_DATE) {
        if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
            return Some(Value::Date(d));
        }
    }
    if let Some(Value::String(s)) = map.get(TAG_DURATION) {
        if let Ok(d) = IsoDuration::parse(s) {
            return Some(Value::Duration(d));
        }
    }
    if let Some(Value::Array(items)) = map.get(TAG_SET) {
        return Some(Value::Set(items.clone()));
    }
    None
}

fn decode_datetime(parts: &[Value]) -> Option<DateTimeValue> {
    let [iso, offset, tzname] = parts else {
        return None;
    };
    let naive = NaiveDateTime::parse_from_str(iso.as_str()?, DATETIME_FORMAT).ok()?;
    let tzname = match tzname {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        _ => return None,
    };
    let utc_offset = match offset {
        Value::Integer(o) => Some(i32::try_from(*o).ok()?),
        Value::Null => None,
        _ => return None,
    };
    Some(DateTimeValue {
        naive,
        utc_offset,
        tzname,
    })
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        Deserialize::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Number(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            map.insert(k, v);
        }
        if map.keys().any(|k| k.starts_with("type{")) {
            if let Some(tagged) = decode_tagged(&map) {
                return Ok(tagged);
            }
        }
        Ok(Value::Object(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
