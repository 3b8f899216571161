use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::queue::JobQueue;
use crate::types::QueuedJob;

/// Polls the queue and hands due jobs to the worker pool.
///
/// Claims at most as many jobs as the dispatch channel has room for. With
/// [`SchedulerEngine::with_ready_workers`] it also claims no more than the
/// number of idle workers, so a job only turns `active` when a worker is
/// waiting for it and never sits claimed in the channel buffer.
pub struct SchedulerEngine {
    queue: JobQueue,
    dispatch_tx: mpsc::Sender<QueuedJob>,
    poll_interval: Duration,
    ready: Option<Arc<Semaphore>>,
}

impl SchedulerEngine {
    pub fn new(
        queue: JobQueue,
        dispatch_tx: mpsc::Sender<QueuedJob>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            dispatch_tx,
            poll_interval,
            ready: None,
        }
    }

    /// Gate claims on the pool's idle-worker permits (see [`crate::WorkerPool::ready`]).
    pub fn with_ready_workers(mut self, ready: Arc<Semaphore>) -> Self {
        self.ready = Some(ready);
        self
    }

    /// Main event loop. Polls every `poll_interval` until `shutdown` broadcasts `true`.
    ///
    /// Dropping the engine on exit closes the dispatch channel, which lets
    /// idle workers stop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "scheduler engine started");
        if let Err(e) = self.queue.recover_stalled() {
            error!("stalled-job recovery failed: {e}");
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and dispatch every due job that fits in the channel.
    pub fn tick(&self) -> Result<usize> {
        let mut room = self.dispatch_tx.capacity();
        if let Some(ready) = &self.ready {
            room = room.min(ready.available_permits());
        }
        if room == 0 {
            debug!("no idle worker, skipping tick");
            return Ok(0);
        }
        let due = self.queue.claim_due(basilisk_core::time::now(), room)?;
        let mut sent = 0;
        for job in due {
            let key = job.key.clone();
            match self.dispatch_tx.try_send(job) {
                Ok(()) => {
                    debug!(job_key = %key, "job dispatched");
                    if let Some(permit) = self.ready.as_ref().and_then(|r| r.try_acquire().ok()) {
                        permit.forget();
                    }
                    sent += 1;
                }
                Err(e) => {
                    warn!(job_key = %key, "dispatch failed, returning job to queue: {e}");
                    self.queue.release(&key)?;
                }
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobState, RetryPolicy};
    use basilisk_core::{Message, MessageKind};

    fn due_message() -> Message {
        let mut m = Message::new(MessageKind::Terror);
        m.content = Some("X".into());
        m
    }

    #[test]
    fn tick_respects_channel_capacity() {
        let queue = JobQueue::open_in_memory(RetryPolicy::default()).unwrap();
        for _ in 0..3 {
            let m = due_message();
            queue.add(&m.id, &m, Duration::ZERO).unwrap();
        }
        let (tx, mut rx) = mpsc::channel(2);
        let engine = SchedulerEngine::new(queue.clone(), tx, Duration::from_millis(10));

        assert_eq!(engine.tick().unwrap(), 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert_eq!(queue.jobs(Some(JobState::Delayed)).unwrap().len(), 1);

        assert_eq!(engine.tick().unwrap(), 1);
    }

    #[test]
    fn future_jobs_stay_queued() {
        let queue = JobQueue::open_in_memory(RetryPolicy::default()).unwrap();
        let m = due_message();
        queue.add(&m.id, &m, Duration::from_secs(3600)).unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let engine = SchedulerEngine::new(queue, tx, Duration::from_millis(10));
        assert_eq!(engine.tick().unwrap(), 0);
    }

    #[test]
    fn claims_only_for_idle_workers() {
        let queue = JobQueue::open_in_memory(RetryPolicy::default()).unwrap();
        for _ in 0..3 {
            let m = due_message();
            queue.add(&m.id, &m, Duration::ZERO).unwrap();
        }
        let (tx, mut rx) = mpsc::channel(8);
        let ready = Arc::new(Semaphore::new(0));
        let engine = SchedulerEngine::new(queue.clone(), tx, Duration::from_millis(10))
            .with_ready_workers(Arc::clone(&ready));

        // nobody waiting: nothing is claimed, every job stays removable
        assert_eq!(engine.tick().unwrap(), 0);
        assert_eq!(queue.jobs(Some(JobState::Delayed)).unwrap().len(), 3);

        ready.add_permits(1);
        assert_eq!(engine.tick().unwrap(), 1);
        assert_eq!(ready.available_permits(), 0);
        assert_eq!(queue.jobs(Some(JobState::Active)).unwrap().len(), 1);
        assert!(rx.try_recv().is_ok());

        assert_eq!(engine.tick().unwrap(), 0);
        assert_eq!(queue.jobs(Some(JobState::Delayed)).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let queue = JobQueue::open_in_memory(RetryPolicy::default()).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = SchedulerEngine::new(queue.clone(), tx, Duration::from_millis(10));
        let task = tokio::spawn(engine.run(shutdown_rx));

        let m = due_message();
        queue.add(&m.id, &m, Duration::ZERO).unwrap();
        let job = rx.recv().await.unwrap();
        assert_eq!(job.key, m.id);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
