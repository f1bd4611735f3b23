//! roster-store — SQLite persistence for enrolled embeddings and the
//! attendance log.
//!
//! One [`SqliteStore`] implements both [`EmbeddingStore`] and
//! [`AttendanceLog`]. The at-most-one-event-per-type-per-day rule is a
//! `UNIQUE(identity_code, day, event_type)` constraint, so it holds across
//! threads and across processes sharing the database file.
//!
//! [`EmbeddingStore`]: roster_core::EmbeddingStore
//! [`AttendanceLog`]: roster_core::AttendanceLog

mod attendance;
mod embeddings;
mod schema;

use roster_core::RosterError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub use schema::SCHEMA;

/// How long a write waits on a database locked by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed embedding store and attendance log.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dimension: usize,
}

pub(crate) fn db_err(e: rusqlite::Error) -> RosterError {
    RosterError::Persistence(e.to_string())
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// A new database records `dimension`; an existing one must match it.
    pub fn open(path: &Path, dimension: usize) -> Result<Self, RosterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RosterError::Persistence(format!("create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self::init(conn, dimension)?;
        tracing::info!(path = %path.display(), dimension, "opened roster database");
        Ok(store)
    }

    pub fn open_in_memory(dimension: usize) -> Result<Self, RosterError> {
        Self::init(Connection::open_in_memory().map_err(db_err)?, dimension)
    }

    fn init(conn: Connection, dimension: usize) -> Result<Self, RosterError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match stored {
            Some(value) => {
                let existing: usize = value.parse().map_err(|_| {
                    RosterError::CorruptRecord(format!("stored dimension {value:?}"))
                })?;
                if existing != dimension {
                    return Err(RosterError::InvalidDimension {
                        expected: existing,
                        actual: dimension,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('dimension', ?1)",
                    params![dimension.to_string()],
                )
                .map_err(db_err)?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, RosterError> {
        self.conn
            .lock()
            .map_err(|_| RosterError::Persistence("connection lock poisoned".into()))
    }
}
