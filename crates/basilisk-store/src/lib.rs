//! `basilisk-store`: SQLite repositories for the two message kinds, the
//! media catalog and prompt configurations.
//!
//! All repositories live behind one [`Store`] which owns a single
//! connection. The scheduler and the pipeline open their own connections to
//! the same database file.

pub mod db;
pub mod error;
pub mod media;
pub mod messages;
pub mod prompts;
pub mod query;

use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

pub use error::{Result, StoreError};
pub use prompts::NewPrompt;
pub use query::{MediaQuery, MessageQuery, Page, SortField, SortOrder};

/// Thread-safe handle over the message, media and prompt tables.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// A poisoned lock only means another thread panicked mid-call; the
    /// connection itself is still usable.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}
