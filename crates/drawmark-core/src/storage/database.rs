//! SQLite database handle
//!
//! `Database` is a cheap, cloneable handle to the database file. Every
//! store opens its own connection through it, so concurrent writers (threads,
//! processes or server instances) contend on the file the same way
//! independent clients would.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::config::Config;
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::schema::{init_schema, needs_init};

/// How long a connection waits on a held lock before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the annotation database
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open or create the database configured in `config`
    pub fn open(config: &Config) -> StoreResult<Self> {
        Self::open_path(config.sqlite_path())
    }

    /// Open or create the database at a specific path
    ///
    /// Switches the file to WAL mode and initializes the schema if needed.
    pub fn open_path(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let db = Self { path };
        let conn = db.connect()?;

        // WAL lets readers proceed while a writer holds the lock
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(db)
    }

    /// Open a new connection to the database
    pub fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }
}

/// Timestamps are stored as Unix milliseconds
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
