//! Row key templates shared by sort and join.
//!
//! A template is a string with `{field}` placeholders. Literal braces are
//! written `{{` and `}}`. Format specifications (`{a:>5}`) and conversions
//! (`{a!r}`) are not supported and are rejected when the template is parsed.

use std::fmt;
use std::sync::Arc;

use tabflow_core::prelude::*;

/// User-supplied key function.
pub type KeyFn = Arc<dyn Fn(&Row) -> Result<String> + Send + Sync>;

/// How a row key is computed.
#[derive(Clone)]
pub enum KeySpec {
    /// Format string with `{field}` placeholders.
    Template(String),
    /// Plain field list.
    Fields(Vec<String>),
    Custom(KeyFn),
}

impl KeySpec {
    pub fn custom(f: impl Fn(&Row) -> Result<String> + Send + Sync + 'static) -> Self {
        KeySpec::Custom(Arc::new(f))
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Template(t) => f.debug_tuple("Template").field(t).finish(),
            KeySpec::Fields(v) => f.debug_tuple("Fields").field(v).finish(),
            KeySpec::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<&str> for KeySpec {
    fn from(s: &str) -> Self {
        KeySpec::Template(s.to_string())
    }
}

impl From<String> for KeySpec {
    fn from(s: String) -> Self {
        KeySpec::Template(s)
    }
}

impl From<Vec<String>> for KeySpec {
    fn from(v: Vec<String>) -> Self {
        KeySpec::Fields(v)
    }
}

impl From<Vec<&str>> for KeySpec {
    fn from(v: Vec<&str>) -> Self {
        KeySpec::Fields(v.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for KeySpec {
    fn from(v: [&str; N]) -> Self {
        KeySpec::Fields(v.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Field(String),
}

/// Placeholder name that renders the 1-based row number in join keys.
pub const ROW_NUMBER: &str = "#";

/// Parsed key template.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTemplate {
    parts: Vec<Part>,
    fields: Vec<String>,
}

impl KeyTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut fields = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(Error::config(format!(
                            "unterminated placeholder in key template '{template}'"
                        )));
                    }
                    if name.is_empty() {
                        return Err(Error::config(format!(
                            "empty placeholder in key template '{template}'"
                        )));
                    }
                    if name.contains(':') || name.contains('!') {
                        return Err(Error::config(format!(
                            "format specifications are not supported in key template '{template}' (placeholder '{{{name}}}')"
                        )));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    fields.push(name.clone());
                    parts.push(Part::Field(name));
                }
                '}' => {
                    return Err(Error::config(format!(
                        "single '}}' in key template '{template}'"
                    )));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(Self { parts, fields })
    }

    /// Fields concatenated with `sep` between them.
    pub fn from_fields(fields: &[String], sep: &str) -> Self {
        let mut parts = Vec::with_capacity(fields.len() * 2);
        for (i, f) in fields.iter().enumerate() {
            if i > 0 && !sep.is_empty() {
                parts.push(Part::Literal(sep.to_string()));
            }
            parts.push(Part::Field(f.clone()));
        }
        Self {
            parts,
            fields: fields.to_vec(),
        }
    }

    /// Referenced field names, in template order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Render with plain value formatting. `#` renders `row_number`; a
    /// missing or null field renders as the empty string.
    pub fn render(&self, row: &Row, row_number: usize) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Field(f) if f == ROW_NUMBER => out.push_str(&row_number.to_string()),
                Part::Field(f) => out.push_str(&row.get_or_null(f).to_string()),
            }
        }
        out
    }

    /// Render so that byte order of the result follows value order for
    /// numeric fields.
    pub fn render_sortable(&self, row: &Row) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Field(f) => {
                    let value = row.get_or_null(f);
                    match value.as_f64() {
                        Some(n) if value.is_numeric() => out.push_str(&sortable_number(n)),
                        _ => out.push_str(&value.to_string()),
                    }
                }
            }
        }
        out
    }
}

/// 16 hex digits whose byte order matches numeric order: the IEEE-754 bit
/// pattern with the sign bit flipped, and every other bit flipped too for
/// negative values.
pub fn sortable_number(n: f64) -> String {
    let bits = n.to_bits();
    let key = if n.is_sign_negative() { !bits } else { bits ^ (1 << 63) };
    format!("{key:016x}")
}

/// A compiled [`KeySpec`].
#[derive(Clone)]
pub enum KeyCalc {
    Template(KeyTemplate),
    Custom(KeyFn),
}

impl KeyCalc {
    /// Compile a sort key. Field lists concatenate without a separator.
    pub fn for_sort(spec: &KeySpec) -> Result<Self> {
        Ok(match spec {
            KeySpec::Template(t) => KeyCalc::Template(KeyTemplate::parse(t)?),
            KeySpec::Fields(f) => KeyCalc::Template(KeyTemplate::from_fields(f, "")),
            KeySpec::Custom(f) => KeyCalc::Custom(f.clone()),
        })
    }

    /// Compile a join key. Field lists are joined with `:`.
    pub fn for_join(spec: &KeySpec) -> Result<KeyTemplate> {
        match spec {
            KeySpec::Template(t) => KeyTemplate::parse(t),
            KeySpec::Fields(f) => Ok(KeyTemplate::from_fields(f, ":")),
            KeySpec::Custom(_) => Err(Error::config(
                "join keys must be a template or a field list",
            )),
        }
    }

    pub fn sort_key(&self, row: &Row) -> Result<String> {
        match self {
            KeyCalc::Template(t) => Ok(t.render_sortable(row)),
            KeyCalc::Custom(f) => f(row),
        }
    }
}
