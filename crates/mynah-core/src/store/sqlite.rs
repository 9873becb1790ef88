//! SQLite-backed mirror store.
//!
//! One database file and one connection per entity type, mirroring the
//! export layout (each entity type publishes as its own datasource file).
//! Each connection sits behind its own mutex, so conflicting writes to the
//! same entity type serialize at the adapter while different entity types
//! proceed independently.
//!
//! Runtime defaults are conservative:
//! - `journal_mode = WAL` to allow concurrent readers while writers append
//! - `busy_timeout = 5s` to reduce transient lock failures under contention
//! - `synchronous = NORMAL`

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, ToSql, params, params_from_iter};

use crate::schema::{EntitySchema, KEY_COLUMN};
use crate::value::Value;

use super::{Assignment, InsertOutcome, MirrorStore, StoreError};

/// Busy timeout used for mirror connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite implementation of [`MirrorStore`].
pub struct SqliteMirrorStore {
    connections: HashMap<String, Mutex<Connection>>,
}

impl SqliteMirrorStore {
    /// Open (or create) one database file per entity type under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or any database
    /// fails to open or configure.
    pub fn open(dir: &Path, entity_types: &[String]) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;

        let mut connections = HashMap::new();
        for entity_type in entity_types {
            let path = dir.join(format!("{entity_type}.db"));
            let conn = Connection::open(&path)?;
            configure_connection(&conn)?;
            connections.insert(entity_type.clone(), Mutex::new(conn));
        }
        Ok(Self { connections })
    }

    /// In-memory store for tests: one in-memory database per entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if a database fails to open.
    pub fn in_memory(entity_types: &[String]) -> Result<Self, StoreError> {
        let mut connections = HashMap::new();
        for entity_type in entity_types {
            let conn = Connection::open_in_memory()?;
            configure_connection(&conn)?;
            connections.insert(entity_type.clone(), Mutex::new(conn));
        }
        Ok(Self { connections })
    }

    pub(crate) fn conn(&self, entity_type: &str) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let mutex = self
            .connections
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownEntity(entity_type.to_owned()))?;
        // A poisoned mutex only means another writer panicked mid-statement;
        // the connection itself is still usable.
        Ok(mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }
}

impl MirrorStore for SqliteMirrorStore {
    fn create_table(&self, entity_type: &str, schema: &EntitySchema) -> Result<(), StoreError> {
        let column_defs: Vec<String> = schema
            .columns()
            .map(|(name, ty)| {
                let nullability = if EntitySchema::is_nullable(name) {
                    ""
                } else {
                    " NOT NULL"
                };
                format!("{} {}{}", quote_ident(name), ty.sql_type(), nullability)
            })
            .collect();

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(entity_type),
            column_defs.join(", ")
        );

        self.conn(entity_type)?.execute(&sql, [])?;
        tracing::info!(
            entity_type,
            columns = schema.len(),
            "created mirror table"
        );
        Ok(())
    }

    fn insert_rows(&self, entity_type: &str, rows: &[Vec<Value>]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut guard = self.conn(entity_type)?;
        let columns = table_columns(&guard, entity_type)?;
        let sql = insert_sql(entity_type, &columns);

        let tx = guard.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                inserted += stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn insert_row_if_absent(
        &self,
        entity_type: &str,
        key: &str,
        row: &[Value],
    ) -> Result<InsertOutcome, StoreError> {
        let guard = self.conn(entity_type)?;
        let columns = table_columns(&guard, entity_type)?;

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({columns}) SELECT {placeholders} \
             WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {key_column} = ?{key_index})",
            table = quote_ident(entity_type),
            columns = quoted_list(&columns),
            placeholders = placeholders.join(", "),
            key_column = quote_ident(KEY_COLUMN),
            key_index = columns.len() + 1,
        );

        let mut bindings: Vec<&dyn ToSql> = row.iter().map(|v| v as &dyn ToSql).collect();
        bindings.push(&key);

        let changed = guard.execute(&sql, bindings.as_slice())?;
        Ok(if changed == 0 {
            InsertOutcome::AlreadyPresent
        } else {
            InsertOutcome::Inserted
        })
    }

    fn update_where_key(
        &self,
        entity_type: &str,
        assignments: &[Assignment],
        key: &str,
    ) -> Result<usize, StoreError> {
        if assignments.is_empty() {
            return Ok(0);
        }

        let set_clause: Vec<String> = assignments.iter().map(render_assignment).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?1",
            quote_ident(entity_type),
            set_clause.join(", "),
            quote_ident(KEY_COLUMN)
        );

        Ok(self.conn(entity_type)?.execute(&sql, params![key])?)
    }

    fn delete_where_key(&self, entity_type: &str, key: &str) -> Result<usize, StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(entity_type),
            quote_ident(KEY_COLUMN)
        );
        Ok(self.conn(entity_type)?.execute(&sql, params![key])?)
    }

    fn count_where_key(&self, entity_type: &str, key: &str) -> Result<i64, StoreError> {
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {} = ?1",
            quote_ident(entity_type),
            quote_ident(KEY_COLUMN)
        );
        Ok(self
            .conn(entity_type)?
            .query_row(&sql, params![key], |row| row.get(0))?)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Table column names in table order (the order the schema created them in).
fn table_columns(conn: &Connection, entity_type: &str) -> Result<Vec<String>, StoreError> {
    let sql = format!("PRAGMA table_info({})", quote_ident(entity_type));
    let mut stmt = conn.prepare(&sql)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(StoreError::MissingTable(entity_type.to_owned()));
    }
    Ok(columns)
}

fn insert_sql(entity_type: &str, columns: &[String]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(entity_type),
        quoted_list(columns),
        placeholders.join(", ")
    )
}

fn render_assignment(assignment: &Assignment) -> String {
    match assignment {
        Assignment::Set { column, value } => {
            format!("{} = {}", quote_ident(column), literal(value))
        }
        Assignment::Shift { column, net } => {
            let column = quote_ident(column);
            let operator = if *net >= 0 { '+' } else { '-' };
            format!("{column} = {column} {operator} {}", net.abs())
        }
    }
}

/// Render a value as a SQL literal for a `SET` clause. Strings (and
/// timestamps, which store as text) are single-quote escaped.
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(true) => "1".to_owned(),
        Value::Bool(false) => "0".to_owned(),
        Value::Int(i) | Value::Count(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => escape_text(s),
        Value::Timestamp(ts) => escape_text(&ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

fn quoted_list(names: &[String]) -> String {
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}", quote_ident(name));
    }
    out
}
