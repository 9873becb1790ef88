//! Process-wide shared state.
//!
//! [`MirrorState`] owns the schema-by-entity-type map. It is created once
//! at startup and passed (by `Arc`) to every component that needs it, so
//! there are no ambient globals. Mutation is confined to the bulk loader's
//! finalize step: each entity type's schema is published exactly once and
//! is immutable afterwards. Everything else (the reorder buffer's
//! readiness check, the change applier) only reads.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::schema::EntitySchema;

/// Shared schema map with write-once-per-entity semantics.
#[derive(Debug, Default)]
pub struct MirrorState {
    schemas: RwLock<HashMap<String, EntitySchema>>,
}

impl MirrorState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the entity type has finished bulk loading. Events for
    /// entity types that are not ready stay buffered.
    #[must_use]
    pub fn is_ready(&self, entity_type: &str) -> bool {
        self.read().contains_key(entity_type)
    }

    /// The published schema for an entity type, if any.
    #[must_use]
    pub fn schema(&self, entity_type: &str) -> Option<EntitySchema> {
        self.read().get(entity_type).cloned()
    }

    /// Publish an entity type's schema. First publish wins; a repeat
    /// publish is dropped with a warning, because the schema is frozen for
    /// the rest of the run once any consumer may have seen it.
    pub fn publish(&self, entity_type: &str, schema: EntitySchema) {
        let mut schemas = self
            .schemas
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if schemas.contains_key(entity_type) {
            tracing::warn!(entity_type, "schema already published; keeping the original");
            return;
        }
        schemas.insert(entity_type.to_owned(), schema);
    }

    /// Entity types with published schemas, in no particular order.
    #[must_use]
    pub fn ready_entity_types(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, EntitySchema>> {
        self.schemas
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, KEY_COLUMN, Record};
    use serde_json::json;

    fn schema_with_name() -> EntitySchema {
        let record = json!({"Name": "x"})
            .as_object()
            .expect("record object")
            .clone();
        EntitySchema::infer(&[record])
    }

    #[test]
    fn entity_types_become_ready_on_publish() {
        let state = MirrorState::new();
        assert!(!state.is_ready("Defect"));
        assert!(state.schema("Defect").is_none());

        state.publish("Defect", schema_with_name());
        assert!(state.is_ready("Defect"));
        assert!(!state.is_ready("Story"));
        assert_eq!(state.ready_entity_types(), vec!["Defect".to_owned()]);
    }

    #[test]
    fn first_publish_wins() {
        let state = MirrorState::new();
        state.publish("Defect", schema_with_name());
        state.publish("Defect", EntitySchema::infer(std::iter::empty::<&Record>()));

        let schema = state.schema("Defect").expect("schema present");
        assert_eq!(schema.column_type("Name"), Some(ColumnType::Text));
        assert_eq!(schema.column_type(KEY_COLUMN), Some(ColumnType::Text));
    }
}
