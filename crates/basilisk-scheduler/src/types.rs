use basilisk_core::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a job sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for `run_at`.
    Delayed,
    /// Claimed by the engine and handed to a worker.
    Active,
    /// Out of attempts. Kept for inspection until the key is re-added.
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// A persisted publish job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Message id.
    pub key: String,
    /// Snapshot of the message taken when the job was added.
    pub payload: Message,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    /// Delay requested at `add` time, in milliseconds.
    pub delay_ms: u64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Retry behaviour applied to every job added to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` means no retry.
    pub max_attempts: u32,
    /// Linear backoff unit: attempt `n` is re-delayed by `backoff_ms * n`.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 5_000,
        }
    }
}

impl From<&basilisk_core::config::SchedulerConfig> for RetryPolicy {
    fn from(cfg: &basilisk_core::config::SchedulerConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            backoff_ms: cfg.backoff_ms,
        }
    }
}
