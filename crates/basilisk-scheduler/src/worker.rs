use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use basilisk_core::BasiliskError;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::queue::JobQueue;
use crate::types::{JobState, QueuedJob};

/// Runs one claimed job. Implemented by the pipeline executor.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &QueuedJob) -> Result<(), BasiliskError>;
}

/// Counters shared by every worker in a pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl WorkerStats {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }
}

/// `workers` tasks draining one shared dispatch channel.
///
/// Jobs for distinct keys may run concurrently; the queue never dispatches
/// the same key twice while it is active.
pub struct WorkerPool {
    queue: JobQueue,
    processor: Arc<dyn JobProcessor>,
    workers: usize,
    stats: Arc<WorkerStats>,
    ready: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, processor: Arc<dyn JobProcessor>, workers: usize) -> Self {
        Self {
            queue,
            processor,
            workers: workers.max(1),
            stats: Arc::new(WorkerStats::default()),
            ready: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// One permit per worker waiting for a job. The engine takes a permit for
    /// every job it dispatches.
    pub fn ready(&self) -> Arc<Semaphore> {
        Arc::clone(&self.ready)
    }

    /// Spawn the workers. Each exits once `rx` is closed and drained.
    pub fn spawn(self, rx: mpsc::Receiver<QueuedJob>) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(Mutex::new(rx));
        (0..self.workers)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let queue = self.queue.clone();
                let processor = Arc::clone(&self.processor);
                let stats = Arc::clone(&self.stats);
                let ready = Arc::clone(&self.ready);
                tokio::spawn(async move {
                    info!(worker_id, "publish worker started");
                    loop {
                        ready.add_permits(1);
                        let next = rx.lock().await.recv().await;
                        let Some(job) = next else { break };
                        run_job(worker_id, &queue, processor.as_ref(), &stats, job).await;
                    }
                    info!(worker_id, "publish worker stopped");
                })
            })
            .collect()
    }
}

async fn run_job(
    worker_id: usize,
    queue: &JobQueue,
    processor: &dyn JobProcessor,
    stats: &WorkerStats,
    job: QueuedJob,
) {
    match processor.process(&job).await {
        Ok(()) => {
            if let Err(e) = queue.complete(&job.key) {
                error!(worker_id, job_key = %job.key, "failed to remove completed job: {e}");
            }
            stats.completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            warn!(worker_id, job_key = %job.key, code = err.code(), "job failed: {err}");
            match queue.fail(&job.key, &err.to_string(), basilisk_core::time::now()) {
                Ok(JobState::Delayed) => {
                    stats.retried.fetch_add(1, Ordering::Relaxed);
                }
                Ok(_) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(worker_id, job_key = %job.key, "failed to record job failure: {e}");
                }
            }
        }
    }
}
