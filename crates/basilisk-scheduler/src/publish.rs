use basilisk_core::{BasiliskError, Message};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::SchedulerError;
use crate::queue::{JobHandle, JobQueue};
use crate::types::JobState;

/// Ties one publish job to one message id.
///
/// Only touches the queue; keeping the message store consistent with it is
/// the caller's job.
#[derive(Clone)]
pub struct PublishScheduler {
    queue: JobQueue,
}

impl PublishScheduler {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Enqueue `message` to fire at its `scheduled_at`.
    pub fn schedule(&self, message: &Message) -> Result<JobHandle, BasiliskError> {
        self.schedule_at(message, basilisk_core::time::now())
    }

    /// [`PublishScheduler::schedule`] against an explicit clock.
    ///
    /// Fails with `Scheduling` when the id, content or time is missing, or
    /// when the time is not strictly after `now`.
    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub fn schedule_at(
        &self,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<JobHandle, BasiliskError> {
        if message.id.trim().is_empty() {
            return Err(BasiliskError::Scheduling("message has no id".into()));
        }
        if message.content.is_none() {
            return Err(BasiliskError::Scheduling(format!(
                "message {} has no content",
                message.id
            )));
        }
        let Some(at) = message.scheduled_at else {
            return Err(BasiliskError::Scheduling(format!(
                "message {} has no scheduled time",
                message.id
            )));
        };
        let delay = at - now;
        if delay <= chrono::Duration::zero() {
            return Err(BasiliskError::Scheduling(format!(
                "scheduled time {at} is not in the future"
            )));
        }
        let delay = delay
            .to_std()
            .map_err(|e| BasiliskError::Scheduling(e.to_string()))?;

        let handle = self.queue.add_at(&message.id, message, delay, now)?;
        info!(delay_ms = delay.as_millis() as u64, "publish job scheduled");
        Ok(handle)
    }

    /// Remove the pending job for `id`. No-op when there is none; a job that
    /// is already running is left alone.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: &str) -> Result<(), BasiliskError> {
        let Some(handle) = self.queue.get(id)? else {
            return Ok(());
        };
        match handle.remove() {
            Ok(()) => Ok(()),
            Err(SchedulerError::JobActive { .. }) => {
                warn!(message_id = %id, "publish job already running, not cancelled");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `cancel(message.id)` followed by `schedule(message)`.
    pub fn reschedule(&self, message: &Message) -> Result<JobHandle, BasiliskError> {
        self.reschedule_at(message, basilisk_core::time::now())
    }

    pub fn reschedule_at(
        &self,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<JobHandle, BasiliskError> {
        self.cancel(&message.id)?;
        self.schedule_at(message, now)
    }

    /// Fails with `Scheduling` while the job for `id` is running. Callers
    /// check this before changing a message whose job would otherwise be
    /// cancelled or replaced.
    pub fn ensure_not_running(&self, id: &str) -> Result<(), BasiliskError> {
        match self.queue.get(id)? {
            Some(handle) if handle.state() == JobState::Active => Err(BasiliskError::Scheduling(
                format!("publish already in progress for message {id}"),
            )),
            _ => Ok(()),
        }
    }

    /// Whether a job (in any state) exists for `id`.
    pub fn has_job(&self, id: &str) -> Result<bool, BasiliskError> {
        Ok(self.queue.get(id)?.is_some())
    }

    /// Queue keys, for reconciliation against the message stores.
    pub fn job_keys(&self) -> Result<Vec<String>, BasiliskError> {
        Ok(self
            .queue
            .jobs(None)?
            .into_iter()
            .map(|job| job.key)
            .collect())
    }
}
