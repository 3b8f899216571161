use basilisk_core::BasiliskError;
use thiserror::Error;

/// Errors that can occur within the job queue.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A job payload could not be encoded or decoded.
    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The job for this key is being processed and cannot be replaced or removed.
    #[error("Job {key} is running")]
    JobActive { key: String },

    /// No job with the given key exists.
    #[error("Job not found: {key}")]
    JobNotFound { key: String },
}

impl From<SchedulerError> for BasiliskError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Database(e) => BasiliskError::Database(e.to_string()),
            SchedulerError::Payload(e) => BasiliskError::Serialization(e),
            SchedulerError::JobNotFound { key } => BasiliskError::not_found("job", key),
            other => BasiliskError::Scheduling(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
