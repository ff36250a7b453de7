//! Database layer for lakeflow.
//!
//! A single SQLite file holds pipelines, tasks, subtask audit rows and plugin-owned
//! subtask states. Core tables are created by the framework's migration scripts
//! (see [`schema`]); opening the database only bootstraps the migration history.
//!
//! Timestamps are stored as RFC 3339 text, structured values as JSON text.

mod pipelines;
pub(crate) mod schema;
mod subtask_states;
mod subtasks;
mod tasks;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

pub use pipelines::{PipelineFinish, PipelineStore};
pub use subtask_states::SubtaskStateStore;
pub use subtasks::SubtaskStore;
pub use tasks::{TaskFinish, TaskStore};

/// Helper macro to convert rusqlite errors to LakeflowError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| ::lakeflow_shared::errors::LakeflowError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. Domain-specific stores
/// wrap this to provide their APIs (e.g., `TaskStore`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> LakeflowResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // WAL, FULL sync, 100s busy timeout
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=100000;
            "
        ))?;

        db_err!(conn.execute_batch(schema::MIGRATION_HISTORY))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

pub(crate) fn now_text() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn timestamp_text(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a nullable RFC 3339 timestamp column.
pub(crate) fn timestamp_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

/// Read a non-null RFC 3339 timestamp column.
pub(crate) fn required_timestamp_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<DateTime<Utc>> {
    timestamp_column(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "timestamp".to_string(),
        Type::Null,
    ))
}

/// Read a JSON text column into `T`.
pub(crate) fn json_column<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

/// Read a status-like text column parsed with `FromStr`.
pub(crate) fn parsed_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = LakeflowError>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}
