use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use basilisk_core::time::{from_db, now, to_db};
use basilisk_core::Message;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::{JobState, QueuedJob, RetryPolicy};

const JOB_COLUMNS: &str = "key, payload, state, attempts, max_attempts, run_at, delay_ms,
                           last_error, created_at, updated_at";

/// Delayed-job queue persisted in SQLite.
///
/// Cloning is cheap; clones share one connection. The engine, the workers and
/// the lifecycle service each hold a clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    conn: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
}

impl JobQueue {
    pub fn new(conn: Connection, retry: RetryPolicy) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retry,
        })
    }

    pub fn open_in_memory(retry: RetryPolicy) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, retry)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a job due after `delay`, replacing any waiting or failed job with
    /// the same key. Fails with [`SchedulerError::JobActive`] when the key's
    /// job is currently running.
    pub fn add(&self, key: &str, payload: &Message, delay: Duration) -> Result<JobHandle> {
        self.add_at(key, payload, delay, now())
    }

    /// [`JobQueue::add`] with an explicit clock.
    pub fn add_at(
        &self,
        key: &str,
        payload: &Message,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<JobHandle> {
        let payload_json = serde_json::to_string(payload)?;
        let delay_ms = delay.as_millis() as u64;
        let run_at = now + chrono::Duration::milliseconds(delay_ms as i64);
        let now_str = to_db(&now);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT state FROM publish_jobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        if existing.as_deref() == Some("active") {
            return Err(SchedulerError::JobActive {
                key: key.to_string(),
            });
        }
        tx.execute("DELETE FROM publish_jobs WHERE key = ?1", params![key])?;
        tx.execute(
            "INSERT INTO publish_jobs
             (key, payload, state, attempts, max_attempts, run_at, delay_ms,
              last_error, created_at, updated_at)
             VALUES (?1, ?2, 'delayed', 0, ?3, ?4, ?5, NULL, ?6, ?6)",
            params![
                key,
                payload_json,
                self.retry.max_attempts,
                to_db(&run_at),
                delay_ms as i64,
                now_str
            ],
        )?;
        tx.commit()?;

        info!(job_key = %key, delay_ms, replaced = existing.is_some(), "job added");
        Ok(JobHandle {
            queue: self.clone(),
            job: QueuedJob {
                key: key.to_string(),
                payload: payload.clone(),
                state: JobState::Delayed,
                attempts: 0,
                max_attempts: self.retry.max_attempts,
                run_at,
                delay_ms,
                last_error: None,
                created_at: now,
                updated_at: now,
            },
        })
    }

    /// Handle to the job stored under `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<JobHandle>> {
        let conn = self.conn();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM publish_jobs WHERE key = ?1"),
                params![key],
                row_to_job,
            )
            .optional()?;
        Ok(job.map(|job| JobHandle {
            queue: self.clone(),
            job,
        }))
    }

    /// Delete the job for `key`. Returns `false` when there was none.
    /// Running jobs cannot be removed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.conn();
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM publish_jobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match state.as_deref() {
            None => Ok(false),
            Some("active") => Err(SchedulerError::JobActive {
                key: key.to_string(),
            }),
            Some(_) => {
                conn.execute("DELETE FROM publish_jobs WHERE key = ?1", params![key])?;
                info!(job_key = %key, "job removed");
                Ok(true)
            }
        }
    }

    /// All jobs, optionally restricted to one state, soonest first.
    pub fn jobs(&self, state: Option<JobState>) -> Result<Vec<QueuedJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM publish_jobs
             WHERE ?1 IS NULL OR state = ?1
             ORDER BY run_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![state.map(|s| s.to_string())], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Move up to `limit` due delayed jobs to `active` and return them.
    pub fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now_str = to_db(&now);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let due = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {JOB_COLUMNS} FROM publish_jobs
                 WHERE state = 'delayed' AND run_at <= ?1
                 ORDER BY run_at ASC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![now_str, limit as i64], row_to_job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        for job in &due {
            tx.execute(
                "UPDATE publish_jobs SET state = 'active', updated_at = ?1 WHERE key = ?2",
                params![now_str, job.key],
            )?;
        }
        tx.commit()?;

        Ok(due
            .into_iter()
            .map(|job| QueuedJob {
                state: JobState::Active,
                updated_at: now,
                ..job
            })
            .collect())
    }

    /// Remove-on-complete.
    pub fn complete(&self, key: &str) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute("DELETE FROM publish_jobs WHERE key = ?1", params![key])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound {
                key: key.to_string(),
            });
        }
        debug!(job_key = %key, "job completed");
        Ok(())
    }

    /// Record a failed attempt. Re-delays the job while attempts remain,
    /// otherwise parks it in `failed`. Returns the resulting state.
    pub fn fail(&self, key: &str, error: &str, now: DateTime<Utc>) -> Result<JobState> {
        let conn = self.conn();
        let (attempts, max_attempts): (u32, u32) = conn
            .query_row(
                "SELECT attempts, max_attempts FROM publish_jobs WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| SchedulerError::JobNotFound {
                key: key.to_string(),
            })?;

        let attempts = attempts + 1;
        let now_str = to_db(&now);
        if attempts < max_attempts {
            let backoff = self.retry.backoff_ms.saturating_mul(attempts as u64);
            let run_at = now + chrono::Duration::milliseconds(backoff as i64);
            conn.execute(
                "UPDATE publish_jobs
                 SET state = 'delayed', attempts = ?1, run_at = ?2, last_error = ?3,
                     updated_at = ?4
                 WHERE key = ?5",
                params![attempts, to_db(&run_at), error, now_str, key],
            )?;
            warn!(job_key = %key, attempts, backoff_ms = backoff, "job failed, retrying");
            Ok(JobState::Delayed)
        } else {
            conn.execute(
                "UPDATE publish_jobs
                 SET state = 'failed', attempts = ?1, last_error = ?2, updated_at = ?3
                 WHERE key = ?4",
                params![attempts, error, now_str, key],
            )?;
            warn!(job_key = %key, attempts, "job failed permanently");
            Ok(JobState::Failed)
        }
    }

    /// Put a claimed job back without counting an attempt.
    pub fn release(&self, key: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE publish_jobs SET state = 'delayed', updated_at = ?1
             WHERE key = ?2 AND state = 'active'",
            params![to_db(&now()), key],
        )?;
        Ok(())
    }

    /// Return jobs left `active` by a previous process to `delayed`.
    pub fn recover_stalled(&self) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE publish_jobs SET state = 'delayed', updated_at = ?1 WHERE state = 'active'",
            params![to_db(&now())],
        )?;
        if n > 0 {
            warn!(count = n, "stalled jobs returned to the queue");
        }
        Ok(n)
    }
}

/// A job plus the queue it lives in.
#[derive(Debug)]
pub struct JobHandle {
    queue: JobQueue,
    job: QueuedJob,
}

impl JobHandle {
    pub fn job(&self) -> &QueuedJob {
        &self.job
    }

    pub fn key(&self) -> &str {
        &self.job.key
    }

    pub fn state(&self) -> JobState {
        self.job.state
    }

    /// Delete this job from the queue.
    pub fn remove(self) -> Result<()> {
        self.queue.remove(&self.job.key).map(|_| ())
    }
}

fn text_failure(idx: usize, e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedJob> {
    let payload: String = row.get(1)?;
    let state: String = row.get(2)?;
    let run_at: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(QueuedJob {
        key: row.get(0)?,
        payload: serde_json::from_str(&payload).map_err(|e| text_failure(1, e))?,
        state: state.parse().map_err(|e: String| text_failure(2, e))?,
        attempts: row.get(3)?,
        max_attempts: row.get(4)?,
        run_at: from_db(&run_at).map_err(|e| text_failure(5, e))?,
        delay_ms: row.get::<_, i64>(6)? as u64,
        last_error: row.get(7)?,
        created_at: from_db(&created_at).map_err(|e| text_failure(8, e))?,
        updated_at: from_db(&updated_at).map_err(|e| text_failure(9, e))?,
    })
}
