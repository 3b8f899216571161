//! `basilisk-scheduler`: delayed publish jobs keyed by message id.
//!
//! # Overview
//!
//! Jobs live in a SQLite `publish_jobs` table whose primary key is the
//! message id, so there is never more than one job per message. The
//! [`engine::SchedulerEngine`] polls for due jobs, marks them `active` and
//! hands them to a [`worker::WorkerPool`], which runs a [`worker::JobProcessor`]
//! and then removes the job (success) or records the failure.
//!
//! | State     | Meaning                                             |
//! |-----------|-----------------------------------------------------|
//! | `delayed` | Waiting for `run_at`; can be replaced or removed    |
//! | `active`  | Claimed by a worker; cannot be removed              |
//! | `failed`  | Out of attempts; replaced by the next `add`         |

pub mod db;
pub mod engine;
pub mod error;
pub mod publish;
pub mod queue;
pub mod switch;
pub mod types;
pub mod worker;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use publish::PublishScheduler;
pub use queue::{JobHandle, JobQueue};
pub use switch::SchedulerSwitch;
pub use types::{JobState, QueuedJob, RetryPolicy};
pub use worker::{JobProcessor, WorkerPool, WorkerStats};
