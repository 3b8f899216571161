use std::sync::Mutex;

use basilisk_core::time::{now, to_db};
use rusqlite::{params, Connection};
use tracing::info;

use crate::db::init_db;
use crate::error::Result;

/// Auto-posting on/off switch, persisted so the CLI and a running daemon
/// observe the same value.
///
/// Single writer: only the CLI or an operator flips it. Readers check it
/// once per auto-post decision, never mid-job.
pub struct SchedulerSwitch {
    db: Mutex<Connection>,
}

impl SchedulerSwitch {
    /// Open the switch, seeding it with `initial` the first time.
    /// An existing stored value wins over `initial`.
    pub fn new(conn: Connection, initial: bool) -> Result<Self> {
        init_db(&conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO scheduler_settings (id, enabled, updated_at)
             VALUES (1, ?1, ?2)",
            params![initial as i64, to_db(&now())],
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn enable(&self) -> Result<()> {
        self.set(true)
    }

    pub fn disable(&self) -> Result<()> {
        self.set(false)
    }

    pub fn is_enabled(&self) -> Result<bool> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let enabled: i64 =
            db.query_row("SELECT enabled FROM scheduler_settings WHERE id = 1", [], |r| {
                r.get(0)
            })?;
        Ok(enabled != 0)
    }

    fn set(&self, enabled: bool) -> Result<()> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.execute(
            "UPDATE scheduler_settings SET enabled = ?1, updated_at = ?2 WHERE id = 1",
            params![enabled as i64, to_db(&now())],
        )?;
        info!(enabled, "scheduler switch updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_from_initial_value() {
        let sw = SchedulerSwitch::new(Connection::open_in_memory().unwrap(), true).unwrap();
        assert!(sw.is_enabled().unwrap());
        sw.disable().unwrap();
        assert!(!sw.is_enabled().unwrap());
        sw.enable().unwrap();
        assert!(sw.is_enabled().unwrap());
    }

    #[test]
    fn stored_value_wins_over_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switch.db");

        let sw = SchedulerSwitch::new(Connection::open(&path).unwrap(), false).unwrap();
        sw.enable().unwrap();
        drop(sw);

        let sw = SchedulerSwitch::new(Connection::open(&path).unwrap(), false).unwrap();
        assert!(sw.is_enabled().unwrap());
    }
}
