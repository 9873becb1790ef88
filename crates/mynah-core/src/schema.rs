//! Per-entity-type schema inference.
//!
//! Each tracked entity type owns exactly one mirror table whose column set
//! is inferred once, from a representative sample of bulk records, and then
//! frozen for the rest of the run. Columns a record does not carry are
//! nulls at row-build time, never schema changes.
//!
//! Inference rules:
//! - internal fields (the opaque `oid` identifier and anything starting
//!   with `_`) are excluded;
//! - the type of a column is the first non-null type seen for it across
//!   the sample; later records that disagree are coerced at row-build
//!   time, not here;
//! - columns that are null in every sampled record are excluded entirely;
//! - the `c_` custom-field prefix is stripped from column names, and the
//!   emitted column order is sorted by sanitized name;
//! - the [`KEY_COLUMN`] is always present, text-typed, and the only
//!   non-nullable column.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::value::Value;

/// The stable object identifier column; present in every mirror table and
/// never null. Distinct from the upstream's mutable numeric record id.
pub const KEY_COLUMN: &str = "ObjectUUID";

/// Opaque per-record identifier the upstream client attaches; never a
/// mirror column.
const INTERNAL_ID_FIELD: &str = "oid";

/// Fields the upstream client uses for its own bookkeeping.
const INTERNAL_PREFIX: char = '_';

/// Custom fields arrive prefixed; the mirror exposes them unprefixed.
const CUSTOM_FIELD_PREFIX: &str = "c_";

/// One raw upstream record: field name to raw JSON value.
pub type Record = serde_json::Map<String, Json>;

/// Closed set of mirror column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Timestamp,
    Text,
    /// Small-integer cardinality column for multi-valued fields.
    Count,
}

impl ColumnType {
    /// SQL storage type for this column.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Bool | Self::Int | Self::Count => "INTEGER",
            Self::Float => "REAL",
            Self::Timestamp | Self::Text => "TEXT",
        }
    }
}

/// Strip the custom-field prefix from an upstream field name.
#[must_use]
pub fn sanitize_column_name(name: &str) -> &str {
    name.strip_prefix(CUSTOM_FIELD_PREFIX).unwrap_or(name)
}

/// The frozen column set for one entity type.
///
/// Column order is deterministic: the backing map is keyed by sanitized
/// column name, so iteration yields columns sorted by name, the same
/// order the mirror table is created with and rows are built in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntitySchema {
    columns: BTreeMap<String, ColumnType>,
}

impl EntitySchema {
    /// Infer a schema from a sample of records.
    ///
    /// Deterministic and order-independent for any sample whose records
    /// agree on types; when records disagree, the first-seen non-null type
    /// wins.
    pub fn infer<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut columns = BTreeMap::new();
        for record in records {
            for (field, raw) in record {
                if is_internal_field(field) {
                    continue;
                }
                let Some(column_type) = Value::from_record_json(raw).column_type() else {
                    continue;
                };
                columns
                    .entry(sanitize_column_name(field).to_owned())
                    .or_insert(column_type);
            }
        }
        columns.entry(KEY_COLUMN.to_owned()).or_insert(ColumnType::Text);
        Self { columns }
    }

    /// Look up a column by sanitized name.
    #[must_use]
    pub fn column_type(&self, sanitized_name: &str) -> Option<ColumnType> {
        self.columns.get(sanitized_name).copied()
    }

    /// Columns in table order (sorted by sanitized name).
    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Every column except the key column is nullable.
    #[must_use]
    pub fn is_nullable(column_name: &str) -> bool {
        column_name != KEY_COLUMN
    }
}

fn is_internal_field(field: &str) -> bool {
    field == INTERNAL_ID_FIELD || field.starts_with(INTERNAL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: Json) -> Record {
        fields.as_object().expect("test record must be an object").clone()
    }

    #[test]
    fn infers_types_in_priority_order() {
        let records = vec![record(json!({
            "ObjectUUID": "u-1",
            "CreationDate": "2024-03-01T17:22:05.123Z",
            "Blocked": false,
            "PlanEstimate": 3.5,
            "DefectCount": 4,
            "Tags": ["a", "b"],
            "Name": "Login fails",
            "Owner": {"name": "Alice", "ref": "/user/7"},
        }))];

        let schema = EntitySchema::infer(&records);
        assert_eq!(schema.column_type("CreationDate"), Some(ColumnType::Timestamp));
        assert_eq!(schema.column_type("Blocked"), Some(ColumnType::Bool));
        assert_eq!(schema.column_type("PlanEstimate"), Some(ColumnType::Float));
        assert_eq!(schema.column_type("DefectCount"), Some(ColumnType::Int));
        assert_eq!(schema.column_type("Tags"), Some(ColumnType::Count));
        assert_eq!(schema.column_type("Name"), Some(ColumnType::Text));
        assert_eq!(schema.column_type("Owner"), Some(ColumnType::Text));
        assert_eq!(schema.column_type(KEY_COLUMN), Some(ColumnType::Text));
    }

    #[test]
    fn internal_fields_are_excluded() {
        let records = vec![record(json!({
            "oid": 12345,
            "_apiVersion": "2",
            "_ref": "/defect/1",
            "Name": "x",
        }))];

        let schema = EntitySchema::infer(&records);
        assert_eq!(schema.column_type("oid"), None);
        assert_eq!(schema.column_type("apiVersion"), None);
        assert_eq!(schema.column_type("ref"), None);
        assert_eq!(schema.column_type("Name"), Some(ColumnType::Text));
    }

    #[test]
    fn all_null_columns_are_excluded() {
        let records = vec![
            record(json!({"Name": "x", "Resolution": null})),
            record(json!({"Name": "y", "Resolution": ""})),
        ];

        let schema = EntitySchema::infer(&records);
        assert_eq!(schema.column_type("Resolution"), None);
        assert_eq!(schema.column_type("Name"), Some(ColumnType::Text));
    }

    #[test]
    fn null_occurrences_do_not_remove_established_columns() {
        let records = vec![
            record(json!({"Severity": "Major"})),
            record(json!({"Severity": null})),
        ];

        let schema = EntitySchema::infer(&records);
        assert_eq!(schema.column_type("Severity"), Some(ColumnType::Text));
    }

    #[test]
    fn first_seen_type_wins_on_conflict() {
        let records = vec![
            record(json!({"Estimate": 3})),
            record(json!({"Estimate": "three"})),
        ];

        let schema = EntitySchema::infer(&records);
        assert_eq!(schema.column_type("Estimate"), Some(ColumnType::Int));
    }

    #[test]
    fn custom_field_prefix_is_stripped() {
        let records = vec![record(json!({"c_TeamName": "Platform"}))];

        let schema = EntitySchema::infer(&records);
        assert_eq!(schema.column_type("TeamName"), Some(ColumnType::Text));
        assert_eq!(schema.column_type("c_TeamName"), None);
    }

    #[test]
    fn columns_iterate_sorted_by_sanitized_name() {
        let records = vec![record(json!({
            "Zeta": 1,
            "c_Alpha": "x",
            "Mid": true,
        }))];

        let schema = EntitySchema::infer(&records);
        let names: Vec<&str> = schema.columns().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Alpha", "Mid", KEY_COLUMN, "Zeta"]);
    }

    #[test]
    fn key_column_is_forced_and_non_nullable() {
        let schema = EntitySchema::infer(std::iter::empty::<&Record>());
        assert_eq!(schema.column_type(KEY_COLUMN), Some(ColumnType::Text));
        assert_eq!(schema.len(), 1);
        assert!(!EntitySchema::is_nullable(KEY_COLUMN));
        assert!(EntitySchema::is_nullable("Name"));
    }

    #[test]
    fn inference_is_order_independent_for_consistent_samples() {
        let a = record(json!({"Name": "x", "Count": 1}));
        let b = record(json!({"Name": "y", "Opened": "2024-03-01T00:00:00.0Z"}));
        let c = record(json!({"Count": 9, "Opened": null}));

        let forward = EntitySchema::infer([&a, &b, &c]);
        let backward = EntitySchema::infer([&c, &b, &a]);
        assert_eq!(forward, backward);
    }
}
