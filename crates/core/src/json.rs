//! Index projection
//!
//! Extracts the scalar stored in an index column from a JSON document.
//!
//! ## Path semantics
//!
//! Paths are dot-delimited object keys (`"address.city"`). Projection walks
//! nested objects one segment at a time and yields `None` as soon as a
//! segment is missing or the current value is not an object. The empty
//! path selects the whole document. A JSON `null` document projects to
//! `None` for every path.
//!
//! ## Column coercion
//!
//! | Column | Source value | Stored |
//! |--------|--------------|--------|
//! | string | string | as is |
//! | string | number / bool | its JSON text |
//! | string | null / object / array / missing | NULL |
//! | integer | integral number | the number |
//! | integer | fractional number | truncated toward zero |
//! | integer | string parsing as i64 | the parsed value |
//! | integer | anything else | NULL |
//! | floating | number | the number as f64 |
//! | floating | string parsing as f64 | the parsed value |
//! | floating | anything else | NULL |

use crate::error::{SoupError, SoupResult};
use crate::types::IndexType;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use serde_json::Value;
use std::fmt;

// =============================================================================
// JsonPath
// =============================================================================

/// Parsed dot-delimited document path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JsonPath {
    segments: Vec<String>,
}

impl JsonPath {
    /// Create the root path (empty path)
    pub fn root() -> Self {
        JsonPath {
            segments: Vec::new(),
        }
    }

    /// Parse a dot-delimited path. Empty input yields the root path.
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        JsonPath {
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    /// Check if this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Get the value at `path` within `doc`
///
/// Returns `None` if any segment is absent or the document is `null`.
pub fn get_at_path<'a>(doc: &'a Value, path: &JsonPath) -> Option<&'a Value> {
    if doc.is_null() {
        return None;
    }

    let mut current = doc;
    for segment in path.segments() {
        match current {
            Value::Object(obj) => current = obj.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Project `doc` at a dot-delimited path
pub fn project<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    get_at_path(doc, &JsonPath::parse(path))
}

/// Parse a document at the API boundary
///
/// Unparsable text and non-object roots are rejected with `MalformedJson`.
pub fn parse_document(json: &str) -> SoupResult<Value> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| SoupError::malformed_json(e.to_string()))?;
    if !value.is_object() {
        return Err(SoupError::malformed_json("document must be a JSON object"));
    }
    Ok(value)
}

// =============================================================================
// IndexValue
// =============================================================================

/// Typed value written to an index column
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    /// SQL NULL
    Null,
    /// TEXT
    Text(String),
    /// INTEGER
    Integer(i64),
    /// REAL
    Floating(f64),
}

impl IndexValue {
    /// Coerce a projected JSON value into a column of `index_type`
    pub fn coerce(value: Option<&Value>, index_type: IndexType) -> IndexValue {
        let Some(value) = value else {
            return IndexValue::Null;
        };
        match index_type {
            IndexType::String => match value {
                Value::String(s) => IndexValue::Text(s.clone()),
                Value::Number(n) => IndexValue::Text(n.to_string()),
                Value::Bool(b) => IndexValue::Text(b.to_string()),
                _ => IndexValue::Null,
            },
            IndexType::Integer => match value {
                Value::Number(n) => match n.as_i64() {
                    Some(i) => IndexValue::Integer(i),
                    None => n
                        .as_f64()
                        .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                        .map(|f| IndexValue::Integer(f.trunc() as i64))
                        .unwrap_or(IndexValue::Null),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(IndexValue::Integer)
                    .unwrap_or_else(|_| coercion_miss(value, index_type)),
                _ => coercion_miss(value, index_type),
            },
            IndexType::Floating => match value {
                Value::Number(n) => n
                    .as_f64()
                    .map(IndexValue::Floating)
                    .unwrap_or(IndexValue::Null),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(IndexValue::Floating)
                    .unwrap_or_else(|| coercion_miss(value, index_type)),
                _ => coercion_miss(value, index_type),
            },
        }
    }

    /// Project `doc` at `path` and coerce into a column of `index_type`
    pub fn project(doc: &Value, path: &str, index_type: IndexType) -> IndexValue {
        Self::coerce(project(doc, path), index_type)
    }

    /// Coerce a caller-supplied query key for comparison against a column
    ///
    /// Keys that cannot be coerced are compared as given, so a query on an
    /// integer column with a non-numeric key matches nothing instead of
    /// matching every NULL row.
    pub fn for_query_key(key: &Value, index_type: IndexType) -> IndexValue {
        match Self::coerce(Some(key), index_type) {
            IndexValue::Null => match key {
                Value::Null => IndexValue::Null,
                Value::String(s) => IndexValue::Text(s.clone()),
                other => IndexValue::Text(other.to_string()),
            },
            coerced => coerced,
        }
    }

    /// Check if this is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, IndexValue::Null)
    }
}

fn coercion_miss(value: &Value, index_type: IndexType) -> IndexValue {
    if !value.is_null() {
        tracing::debug!(
            index_type = %index_type,
            value = %value,
            "projected value not coercible, storing NULL"
        );
    }
    IndexValue::Null
}

impl ToSql for IndexValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            IndexValue::Null => ToSqlOutput::Owned(SqlValue::Null),
            IndexValue::Text(s) => ToSqlOutput::Borrowed(s.as_str().into()),
            IndexValue::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            IndexValue::Floating(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
        })
    }
}
