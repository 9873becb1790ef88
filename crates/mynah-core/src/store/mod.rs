//! Mirror-store adapter.
//!
//! The core never talks to a database directly; everything goes through
//! [`MirrorStore`]. The trait is deliberately narrow (table creation,
//! keyed row operations, and a count query) and every operation is
//! fallible: connection and IO failures surface as [`StoreError`], which
//! the ingestion pipeline treats as a consumed per-event failure, never a
//! crash.
//!
//! Duplicate detection lives *in* the adapter rather than as a separate
//! existence check: [`MirrorStore::insert_row_if_absent`] reports
//! `AlreadyPresent` and [`MirrorStore::delete_where_key`] reports zero rows
//! affected, which closes the check-then-act race window under concurrent
//! writers.

pub mod sqlite;

pub use sqlite::SqliteMirrorStore;

use thiserror::Error;

use crate::schema::EntitySchema;
use crate::value::Value;

/// Adapter-level failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity type has no registered connection.
    #[error("unknown entity type '{0}'")]
    UnknownEntity(String),

    /// The entity type has a connection but no mirror table yet.
    #[error("no mirror table for entity type '{0}'")]
    MissingTable(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same key already exists; nothing was written.
    AlreadyPresent,
}

/// One column assignment in a keyed update.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// `column = <literal>`.
    Set { column: String, value: Value },
    /// `column = column + net` (or `- |net|` when negative). Zero-net
    /// shifts are filtered out by the applier and never reach the store.
    Shift { column: String, net: i64 },
}

/// The storage abstraction the core applies changes through.
///
/// Implementations must serialize conflicting writes to the same entity
/// type's table; writes to different entity types may proceed
/// independently.
pub trait MirrorStore: Send + Sync {
    /// Create the entity type's mirror table if it does not exist, with
    /// columns in the schema's order.
    ///
    /// # Errors
    ///
    /// Fails on connection or DDL errors.
    fn create_table(&self, entity_type: &str, schema: &EntitySchema) -> Result<(), StoreError>;

    /// Bulk-insert rows whose values are ordered to match the table's
    /// column order. Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Fails on connection, constraint, or IO errors; no rows are kept
    /// from a failed batch.
    fn insert_rows(&self, entity_type: &str, rows: &[Vec<Value>]) -> Result<usize, StoreError>;

    /// Insert one row unless a row with the given key already exists.
    ///
    /// # Errors
    ///
    /// Fails on connection, constraint, or IO errors. A duplicate key is
    /// not an error; it reports [`InsertOutcome::AlreadyPresent`].
    fn insert_row_if_absent(
        &self,
        entity_type: &str,
        key: &str,
        row: &[Value],
    ) -> Result<InsertOutcome, StoreError>;

    /// Apply assignments to the row with the given key. Returns rows
    /// affected (zero when no such row exists).
    ///
    /// # Errors
    ///
    /// Fails on connection or query errors.
    fn update_where_key(
        &self,
        entity_type: &str,
        assignments: &[Assignment],
        key: &str,
    ) -> Result<usize, StoreError>;

    /// Delete the row with the given key. Returns rows affected (zero when
    /// no such row exists).
    ///
    /// # Errors
    ///
    /// Fails on connection or query errors.
    fn delete_where_key(&self, entity_type: &str, key: &str) -> Result<usize, StoreError>;

    /// Count rows with the given key (0 or 1 in a healthy mirror).
    ///
    /// # Errors
    ///
    /// Fails on connection or query errors.
    fn count_where_key(&self, entity_type: &str, key: &str) -> Result<i64, StoreError>;
}
