use rusqlite::Connection;

use crate::error::Result;

/// Initialise the queue schema in `conn`.
///
/// `publish_jobs.key` is the message id, so the primary key alone keeps at
/// most one job per message.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS publish_jobs (
            key           TEXT    NOT NULL PRIMARY KEY,
            payload       TEXT    NOT NULL,   -- JSON message snapshot
            state         TEXT    NOT NULL DEFAULT 'delayed',
            attempts      INTEGER NOT NULL DEFAULT 0,
            max_attempts  INTEGER NOT NULL DEFAULT 1,
            run_at        TEXT    NOT NULL,
            delay_ms      INTEGER NOT NULL,
            last_error    TEXT,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        -- Polling: SELECT ... WHERE state = 'delayed' AND run_at <= ?
        CREATE INDEX IF NOT EXISTS idx_publish_jobs_due
            ON publish_jobs (state, run_at);

        CREATE TABLE IF NOT EXISTS scheduler_settings (
            id          INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
            enabled     INTEGER NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
