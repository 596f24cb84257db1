//! Appointment store: the narrow execute/query/get contract and its SQLite backing.
//!
//! The reminder engine only ever talks to [`StoreAdapter`]. Rows come back as
//! column-name keyed JSON maps, the same shape the UI receives over IPC, and
//! parameters are JSON values bound positionally.
//!
//! `SqliteStore` opens its connection lazily and drops it on failure, so a
//! database that is missing or locked at one poll is simply retried at the next.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use thiserror::Error;

use crate::error::ReminderError;

pub mod appointments;
mod schema;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Errors specific to opening the database and setting up its schema.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Database schema revision {found} is newer than this build supports ({supported})")]
    SchemaTooNew { found: i64, supported: i64 },
}

/// Result of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub changes: usize,
    pub last_insert_rowid: i64,
}

/// The only surface the reminder engine uses to reach appointment records.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, ReminderError>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ReminderError>;

    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ReminderError>;
}

/// SQLite-backed store at `~/.rendezvous/rendezvous.db`.
///
/// rusqlite is synchronous, so every call runs on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Store at the default location. Nothing is opened until first use.
    pub fn open_default() -> Result<Self, DbError> {
        Ok(Self::at(Self::db_path()?))
    }

    /// Store at an explicit path. Useful for testing.
    pub fn at(path: PathBuf) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path,
                conn: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.inner.path
    }

    /// Resolve the default database path: `~/.rendezvous/rendezvous.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".rendezvous").join("rendezvous.db"))
    }

    /// Run `f` against the live connection on a blocking worker.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, ReminderError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.with_conn(f))
            .await
            .map_err(|e| ReminderError::StoreUnavailable(format!("store task failed: {}", e)))?
    }
}

impl StoreInner {
    /// Open (or create) the database file and apply the schema.
    fn open_connection(&self) -> Result<Connection, DbError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let mut conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        schema::ensure_schema(&mut conn)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::info!("Opened appointment store at {}", self.path.display());
        Ok(conn)
    }

    /// Opens the connection first if needed. A connection-level fault drops
    /// the connection so the next call reopens it.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, ReminderError> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.open_connection()?);
        }
        let Some(conn) = guard.as_ref() else {
            return Err(ReminderError::StoreUnavailable(
                "connection not open".to_string(),
            ));
        };

        match f(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                if is_connection_fault(&e) {
                    log::warn!("Appointment store connection fault, will reopen: {}", e);
                    *guard = None;
                }
                Err(ReminderError::StoreUnavailable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl StoreAdapter for SqliteStore {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult, ReminderError> {
        let sql = sql.to_string();
        let values = bind_values(params);
        self.with_conn(move |conn| {
            let changes = conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(ExecuteResult {
                changes,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ReminderError> {
        let sql = sql.to_string();
        let values = bind_values(params);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                row_to_map(row, &names)
            })?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ReminderError> {
        let sql = sql.to_string();
        let values = bind_values(params);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let first = match rows.next()? {
                Some(row) => Some(row_to_map(row, &names)?),
                None => None,
            };
            Ok(first)
        })
        .await
    }
}

/// Errors that mean the connection itself is unusable, as opposed to a bad statement.
fn is_connection_fault(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::ReadOnly
        ),
        _ => false,
    }
}

/// Convert JSON parameters to SQLite values.
fn bind_values(params: &[Value]) -> Vec<SqlValue> {
    params
        .iter()
        .map(|p| match p {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        })
        .collect()
}

fn row_to_map(row: &rusqlite::Row<'_>, names: &[String]) -> rusqlite::Result<Row> {
    let mut map = Row::new();
    for (i, name) in names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
        };
        map.insert(name.clone(), value);
    }
    Ok(map)
}

// =============================================================================
// Shared test utilities
// =============================================================================
