use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::db::sqlite::{open_database, open_memory_database};
use crate::db::DatabaseError;

/// SQLite-backed medication directory, log store and notification sink.
///
/// One connection behind a mutex: the engine issues one request at a time,
/// the lock only guards against a second transport sharing the store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open (and migrate) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(open_database(path)?))
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(open_memory_database()?))
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}
