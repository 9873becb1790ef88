//! Idempotent application of one change event to the mirror store.
//!
//! The mirror store itself is the source of truth for whether an object
//! exists; no per-object state is cached here. Duplicate creations and
//! duplicate deletions are reported as [`ApplyOutcome::ignored`], not
//! errors: a webhook delivered twice must not double-insert or
//! double-delete.
//!
//! Update events resolve each field-level change to a schema column by
//! sanitized name. Changes to columns the schema never established are
//! skipped with a warning; the rest of the event still applies.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::event::{ChangeAction, ChangeEvent, ChangePayload, FieldChange};
use crate::schema::{EntitySchema, KEY_COLUMN, sanitize_column_name};
use crate::store::{Assignment, InsertOutcome, MirrorStore, StoreError};
use crate::value::Value;

/// Structured outcome of applying one event, suitable for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub entity_type: String,
    pub object_id: String,
    pub action: ChangeAction,
    /// Display labels of the fields the event touched (updates only).
    pub fields: Vec<String>,
    pub rows_affected: usize,
    /// The event's effect already matched mirror state (duplicate create
    /// or delete).
    pub ignored: bool,
    pub user: Option<String>,
}

/// Applies ordered change events against a mirror store.
pub struct Applier<'a> {
    store: &'a dyn MirrorStore,
}

impl<'a> Applier<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn MirrorStore) -> Self {
        Self { store }
    }

    /// Apply one event using the entity type's frozen schema.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the store rejects an operation; the
    /// caller decides whether that is fatal (the ingestion pipeline logs
    /// and moves on).
    pub fn apply(
        &self,
        schema: &EntitySchema,
        event: &ChangeEvent,
    ) -> Result<ApplyOutcome, StoreError> {
        match &event.payload {
            ChangePayload::Created { state } => self.apply_created(schema, event, state),
            ChangePayload::Updated { changes } => self.apply_updated(schema, event, changes),
            ChangePayload::Recycled => self.apply_recycled(event),
        }
    }

    fn apply_created(
        &self,
        schema: &EntitySchema,
        event: &ChangeEvent,
        state: &std::collections::BTreeMap<String, Json>,
    ) -> Result<ApplyOutcome, StoreError> {
        let row = snapshot_row(schema, &event.object_id, state);
        let outcome =
            self.store
                .insert_row_if_absent(&event.entity_type, &event.object_id, &row)?;

        Ok(match outcome {
            InsertOutcome::Inserted => self.outcome(event, vec![], 1, false),
            InsertOutcome::AlreadyPresent => self.outcome(event, vec![], 0, true),
        })
    }

    fn apply_updated(
        &self,
        schema: &EntitySchema,
        event: &ChangeEvent,
        changes: &[FieldChange],
    ) -> Result<ApplyOutcome, StoreError> {
        let mut assignments = Vec::new();
        let mut fields = Vec::new();

        for change in changes {
            let column = sanitize_column_name(&change.name);
            if schema.column_type(column).is_none() {
                tracing::warn!(
                    entity_type = %event.entity_type,
                    column,
                    "ignoring change to unknown column"
                );
                continue;
            }
            fields.push(change.label().to_owned());

            if change.is_delta() {
                let net = change.net_delta();
                // A balanced delta leaves the count where it is.
                if net != 0 {
                    assignments.push(Assignment::Shift {
                        column: column.to_owned(),
                        net,
                    });
                }
            } else {
                assignments.push(Assignment::Set {
                    column: column.to_owned(),
                    value: Value::from_change_json(change.value.as_ref()),
                });
            }
        }

        let rows_affected = if assignments.is_empty() {
            0
        } else {
            self.store
                .update_where_key(&event.entity_type, &assignments, &event.object_id)?
        };

        Ok(self.outcome(event, fields, rows_affected, false))
    }

    fn apply_recycled(&self, event: &ChangeEvent) -> Result<ApplyOutcome, StoreError> {
        let rows_affected = self
            .store
            .delete_where_key(&event.entity_type, &event.object_id)?;

        let ignored = rows_affected == 0;
        Ok(self.outcome(event, vec![], rows_affected, ignored))
    }

    #[allow(clippy::unused_self)]
    fn outcome(
        &self,
        event: &ChangeEvent,
        fields: Vec<String>,
        rows_affected: usize,
        ignored: bool,
    ) -> ApplyOutcome {
        ApplyOutcome {
            entity_type: event.entity_type.clone(),
            object_id: event.object_id.clone(),
            action: event.action(),
            fields,
            rows_affected,
            ignored,
            user: event.user.clone(),
        }
    }
}

/// Build a row from a `Created` attribute snapshot: schema columns only,
/// in schema (sanitized-name) order, normalized and coerced per column
/// type. The key column falls back to the event's object id when the
/// snapshot does not carry it.
fn snapshot_row(
    schema: &EntitySchema,
    object_id: &str,
    state: &std::collections::BTreeMap<String, Json>,
) -> Vec<Value> {
    let by_sanitized: HashMap<&str, &Json> = state
        .iter()
        .map(|(name, value)| (sanitize_column_name(name), value))
        .collect();

    schema
        .columns()
        .map(|(column, column_type)| {
            let value = by_sanitized
                .get(column)
                .map_or(Value::Null, |raw| Value::from_record_json(raw).coerce(column_type));
            if value.is_null() && column == KEY_COLUMN {
                Value::Text(object_id.to_owned())
            } else {
                value
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Record;
    use crate::store::SqliteMirrorStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn test_schema() -> EntitySchema {
        let record: Record = json!({
            "ObjectUUID": "seed",
            "Name": "seed",
            "Severity": "Major",
            "TaskCount": 1,
        })
        .as_object()
        .expect("record object")
        .clone();
        EntitySchema::infer(&[record])
    }

    fn test_store(schema: &EntitySchema) -> SqliteMirrorStore {
        let entity_types = vec!["Defect".to_owned()];
        let store = SqliteMirrorStore::in_memory(&entity_types).expect("open store");
        store.create_table("Defect", schema).expect("create table");
        store
    }

    fn created(object_id: &str, state: serde_json::Value) -> ChangeEvent {
        ChangeEvent {
            entity_type: "Defect".to_owned(),
            object_id: object_id.to_owned(),
            created_ts_ms: 100,
            user: Some("alice".to_owned()),
            payload: ChangePayload::Created {
                state: state
                    .as_object()
                    .expect("state object")
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<BTreeMap<_, _>>(),
            },
        }
    }

    fn updated(object_id: &str, changes: Vec<FieldChange>) -> ChangeEvent {
        ChangeEvent {
            entity_type: "Defect".to_owned(),
            object_id: object_id.to_owned(),
            created_ts_ms: 101,
            user: None,
            payload: ChangePayload::Updated { changes },
        }
    }

    fn recycled(object_id: &str) -> ChangeEvent {
        ChangeEvent {
            entity_type: "Defect".to_owned(),
            object_id: object_id.to_owned(),
            created_ts_ms: 102,
            user: None,
            payload: ChangePayload::Recycled,
        }
    }

    #[test]
    fn created_inserts_one_row() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        let outcome = applier
            .apply(&schema, &created("u-1", json!({"Name": "Login fails", "TaskCount": 2})))
            .expect("apply");

        assert_eq!(outcome.rows_affected, 1);
        assert!(!outcome.ignored);
        assert_eq!(outcome.action, ChangeAction::Created);
        assert_eq!(store.count_where_key("Defect", "u-1").expect("count"), 1);
    }

    #[test]
    fn duplicate_created_is_ignored() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        let event = created("u-1", json!({"Name": "Login fails"}));
        applier.apply(&schema, &event).expect("first apply");
        let outcome = applier.apply(&schema, &event).expect("second apply");

        assert!(outcome.ignored);
        assert_eq!(outcome.rows_affected, 0);
        assert_eq!(store.count_where_key("Defect", "u-1").expect("count"), 1);
    }

    #[test]
    fn recycled_on_absent_object_is_ignored() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        let outcome = applier.apply(&schema, &recycled("u-9")).expect("apply");
        assert!(outcome.ignored);
        assert_eq!(outcome.rows_affected, 0);
    }

    #[test]
    fn recycled_deletes_existing_row() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        applier
            .apply(&schema, &created("u-1", json!({"Name": "x"})))
            .expect("create");
        let outcome = applier.apply(&schema, &recycled("u-1")).expect("recycle");

        assert!(!outcome.ignored);
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(store.count_where_key("Defect", "u-1").expect("count"), 0);
    }

    #[test]
    fn absolute_update_sets_literal_value() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        applier
            .apply(&schema, &created("u-1", json!({"Severity": "Major"})))
            .expect("create");

        let outcome = applier
            .apply(
                &schema,
                &updated(
                    "u-1",
                    vec![FieldChange {
                        name: "Severity".to_owned(),
                        display_name: Some("Severity".to_owned()),
                        value: Some(json!("Critical")),
                        old_value: Some(json!("Major")),
                        ..FieldChange::default()
                    }],
                ),
            )
            .expect("update");

        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.fields, vec!["Severity".to_owned()]);
    }

    #[test]
    fn delta_update_is_net_additive() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        applier
            .apply(&schema, &created("u-1", json!({"TaskCount": 5})))
            .expect("create");

        // added=3, removed=1 on a counter at 5 -> 7.
        let outcome = applier
            .apply(
                &schema,
                &updated(
                    "u-1",
                    vec![FieldChange {
                        name: "TaskCount".to_owned(),
                        added: Some(vec![json!(1), json!(2), json!(3)]),
                        removed: Some(vec![json!(4)]),
                        ..FieldChange::default()
                    }],
                ),
            )
            .expect("delta");
        assert_eq!(outcome.rows_affected, 1);

        let guard = store.conn("Defect").expect("conn");
        let count: i64 = guard
            .query_row(
                "SELECT \"TaskCount\" FROM \"Defect\" WHERE \"ObjectUUID\" = 'u-1'",
                [],
                |r| r.get(0),
            )
            .expect("query");
        assert_eq!(count, 7);
    }

    #[test]
    fn balanced_delta_emits_no_assignment() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        applier
            .apply(&schema, &created("u-1", json!({"TaskCount": 5})))
            .expect("create");

        let outcome = applier
            .apply(
                &schema,
                &updated(
                    "u-1",
                    vec![FieldChange {
                        name: "TaskCount".to_owned(),
                        added: Some(vec![json!(1), json!(2)]),
                        removed: Some(vec![json!(3), json!(4)]),
                        ..FieldChange::default()
                    }],
                ),
            )
            .expect("balanced delta");

        // The change resolves to a known column but produces no
        // assignment, so no UPDATE runs at all.
        assert_eq!(outcome.rows_affected, 0);
        assert!(!outcome.ignored);
        assert_eq!(outcome.fields, vec!["TaskCount".to_owned()]);
    }

    #[test]
    fn unknown_columns_are_skipped_not_fatal() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        applier
            .apply(&schema, &created("u-1", json!({"Severity": "Major"})))
            .expect("create");

        let outcome = applier
            .apply(
                &schema,
                &updated(
                    "u-1",
                    vec![
                        FieldChange {
                            name: "NoSuchColumn".to_owned(),
                            value: Some(json!("x")),
                            old_value: Some(json!("y")),
                            ..FieldChange::default()
                        },
                        FieldChange {
                            name: "Severity".to_owned(),
                            value: Some(json!("Minor")),
                            old_value: Some(json!("Major")),
                            ..FieldChange::default()
                        },
                    ],
                ),
            )
            .expect("update");

        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.fields, vec!["Severity".to_owned()]);
    }

    #[test]
    fn update_of_missing_row_affects_zero_rows() {
        let schema = test_schema();
        let store = test_store(&schema);
        let applier = Applier::new(&store);

        let outcome = applier
            .apply(
                &schema,
                &updated(
                    "u-404",
                    vec![FieldChange {
                        name: "Severity".to_owned(),
                        value: Some(json!("Minor")),
                        old_value: None,
                        ..FieldChange::default()
                    }],
                ),
            )
            .expect("update");

        assert_eq!(outcome.rows_affected, 0);
        assert!(!outcome.ignored);
    }

    #[test]
    fn snapshot_row_orders_and_coerces() {
        let schema = test_schema();
        let state: BTreeMap<String, Json> = [
            ("Name".to_owned(), json!(42)), // numeric into a text column
            ("TaskCount".to_owned(), json!(3)),
        ]
        .into_iter()
        .collect();

        let row = snapshot_row(&schema, "u-1", &state);
        // Column order: Name, ObjectUUID, Severity, TaskCount.
        assert_eq!(
            row,
            vec![
                Value::Text("42".to_owned()),
                Value::Text("u-1".to_owned()),
                Value::Null,
                Value::Int(3),
            ]
        );
    }
}
