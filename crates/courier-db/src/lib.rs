pub mod audit;
pub mod chats;
pub mod challenges;
pub mod error;
pub mod maintenance;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

pub use error::{Result, StoreError};

/// SQLite's `datetime('now')` layout. Every timestamp column uses it so
/// Rust-side values compare correctly against SQL-side `datetime(...)`.
const SQL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The durable store shared by every session.
///
/// Constructed once by the process entry point and passed around by `Arc`.
/// Each public operation takes the connection for its own duration; writes
/// run inside a transaction that commits on success and rolls back on any
/// error.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| StoreError::Sqlite { op: "open", source })?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|source| StoreError::Sqlite { op: "open", source })?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|source| StoreError::Sqlite { op: "open", source })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|source| StoreError::Sqlite { op: "open", source })?;

        migrations::run(&conn).map_err(|source| StoreError::Sqlite { op: "migrate", source })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read-only closure against the connection.
    pub fn with_conn<F, T>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned { op })?;
        f(&conn).map_err(|source| StoreError::Sqlite { op, source })
    }

    /// Run a closure inside a transaction. Dropping the transaction on the
    /// error path rolls it back.
    pub fn with_tx<F, T>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned { op })?;
        let tx = conn
            .transaction()
            .map_err(|source| StoreError::Sqlite { op, source })?;

        let out = f(&*tx).map_err(|source| StoreError::Sqlite { op, source })?;

        tx.commit().map_err(|source| StoreError::Sqlite { op, source })?;
        Ok(out)
    }
}

pub(crate) fn to_sql_time(ts: DateTime<Utc>) -> String {
    ts.format(SQL_TIME_FORMAT).to_string()
}

pub(crate) fn from_sql_time(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, SQL_TIME_FORMAT)
        .map(|ndt| ndt.and_utc())
        .or_else(|_| raw.parse::<DateTime<Utc>>())
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub(crate) fn from_sql_time_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(from_sql_time)
}

/// Wrap a JSON column decode failure so it surfaces through rusqlite.
pub(crate) fn json_column_error(idx: usize, err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
