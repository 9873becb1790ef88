//! Normalized mirror values.
//!
//! Upstream payloads are loosely typed JSON: a field may arrive as a bare
//! scalar, a `{name, ...}` reference object, a `{value, ...}` wrapper, or a
//! collection. Everything the schema inferencer and the change applier
//! consume goes through one of the two normalization entry points here
//! first, so the rest of the crate only ever sees the closed [`Value`]
//! variant:
//!
//! - [`Value::from_record_json`] for bulk records and `Created` snapshots.
//!   Reference objects unwrap to their display `name` (then `value`); empty
//!   strings, the literal text `"None"`, and whitespace-only strings are
//!   null; timestamp-shaped strings parse; collections collapse to their
//!   element count.
//! - [`Value::from_change_json`] for `Updated` field changes. These carry
//!   literals destined for a `column = <literal>` assignment, so strings
//!   stay strings and only a `value` wrapper key is unwrapped.

use chrono::NaiveDateTime;
use rusqlite::types::{Null, ToSql, ToSqlOutput};
use serde_json::Value as Json;

use crate::schema::ColumnType;

/// Wire format for upstream timestamps, e.g. `2024-03-01T17:22:05.123Z`.
/// The fractional part is optional on parse.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// A normalized value bound for (or read back from) the mirror store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
    /// Cardinality of a multi-valued field. The mirror stores counts for
    /// collection columns, never the collection contents.
    Count(i64),
}

impl Value {
    /// Parse an upstream timestamp string.
    #[must_use]
    pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()
    }

    /// Normalize a raw JSON value from a bulk record or a `Created`
    /// attribute snapshot.
    #[must_use]
    pub fn from_record_json(raw: &Json) -> Self {
        match raw {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => Self::from_number(n),
            Json::String(s) => Self::from_text(s),
            Json::Array(items) => Self::Count(count_of(items)),
            Json::Object(map) => {
                // Reference objects carry a display name; wrapper objects
                // carry the payload under "value".
                if let Some(inner) = map.get("name").or_else(|| map.get("value")) {
                    Self::from_record_json(inner)
                } else {
                    tracing::debug!("opaque object with no name/value field treated as null");
                    Self::Null
                }
            }
        }
    }

    /// Normalize the literal value carried by an `Updated` field change.
    #[must_use]
    pub fn from_change_json(raw: Option<&Json>) -> Self {
        match raw {
            None | Some(Json::Null) => Self::Null,
            Some(Json::Bool(b)) => Self::Bool(*b),
            Some(Json::Number(n)) => Self::from_number(n),
            Some(Json::String(s)) => Self::Text(s.clone()),
            Some(Json::Object(map)) => Self::from_change_json(map.get("value")),
            Some(Json::Array(items)) => {
                tracing::warn!("unexpected collection literal in field change; storing count");
                Self::Count(count_of(items))
            }
        }
    }

    /// Coerce to the destination column type where the source shape allows
    /// it. Today the only cross-type rule is stringification into a text
    /// column; everything else passes through unchanged.
    #[must_use]
    pub fn coerce(self, destination: ColumnType) -> Self {
        if destination != ColumnType::Text {
            return self;
        }
        match self {
            Self::Bool(b) => Self::Text(b.to_string()),
            Self::Int(i) => Self::Text(i.to_string()),
            Self::Float(f) => Self::Text(f.to_string()),
            other => other,
        }
    }

    /// The column type this value would establish in an inferred schema,
    /// or `None` for null (nulls never establish a column).
    #[must_use]
    pub const fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ColumnType::Bool),
            Self::Int(_) => Some(ColumnType::Int),
            Self::Float(_) => Some(ColumnType::Float),
            Self::Timestamp(_) => Some(ColumnType::Timestamp),
            Self::Text(_) => Some(ColumnType::Text),
            Self::Count(_) => Some(ColumnType::Count),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn from_number(n: &serde_json::Number) -> Self {
        n.as_i64().map_or_else(
            || Self::Float(n.as_f64().unwrap_or(0.0)),
            Self::Int,
        )
    }

    fn from_text(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || s == "None" {
            return Self::Null;
        }
        Self::parse_timestamp(s).map_or_else(|| Self::Text(s.to_owned()), Self::Timestamp)
    }
}

fn count_of(items: &[Json]) -> i64 {
    i64::try_from(items.len()).unwrap_or(i64::MAX)
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Null => Ok(ToSqlOutput::from(Null)),
            Self::Bool(b) => Ok(ToSqlOutput::from(*b)),
            Self::Int(i) | Self::Count(i) => Ok(ToSqlOutput::from(*i)),
            Self::Float(f) => Ok(ToSqlOutput::from(*f)),
            Self::Timestamp(ts) => ts.to_sql(),
            Self::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}
