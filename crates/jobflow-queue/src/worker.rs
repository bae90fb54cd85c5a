//! Per-queue workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::backend::FailOutcome;
use crate::dispatcher::Dispatcher;
use crate::error::{JobError, QueueResult};
use crate::handles::{QueueHandle, QueueHandleCache};
use crate::job::DeliveredJob;

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs run at the same time per queue.
    pub concurrency: usize,
    /// Longest sleep between checks for ready jobs.
    pub poll_interval: Duration,
    /// How long shutdown waits for running jobs.
    pub drain_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for one worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl WorkerStats {
    /// Jobs completed successfully.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Jobs that failed with no attempts left.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Failed attempts handed back for another try.
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::SeqCst)
    }
}

/// Pulls ready jobs from one queue and dispatches them.
pub struct QueueWorker {
    queue_name: String,
    stats: Arc<WorkerStats>,
    task: JoinHandle<()>,
}

impl QueueWorker {
    /// Start the worker loop. It runs until `shutdown` is cancelled.
    pub fn spawn(
        queue_name: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
        handles: Arc<QueueHandleCache>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let queue_name = queue_name.into();
        let stats = Arc::new(WorkerStats::default());
        let handle = handles.get(&queue_name);

        let task = tokio::spawn(run_loop(
            handle,
            dispatcher,
            config,
            stats.clone(),
            shutdown,
        ));

        Self {
            queue_name,
            stats,
            task,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit after shutdown.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Worker for queue {} panicked: {}", self.queue_name, e);
        }
    }
}

async fn run_loop(
    handle: Arc<QueueHandle>,
    dispatcher: Arc<Dispatcher>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let signal = handle.ready_signal();
    let tracker = TaskTracker::new();

    info!(
        "Worker for queue {} started with concurrency {}",
        handle.name(),
        config.concurrency
    );

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match handle.next_ready().await {
            Ok(Some(job)) => {
                debug!("Queue {} picked job {} ({})", handle.name(), job.id, job.name);
                tracker.spawn(run_job(
                    handle.clone(),
                    dispatcher.clone(),
                    semaphore.clone(),
                    job,
                    stats.clone(),
                    permit,
                ));
                continue;
            }
            Ok(None) => drop(permit),
            Err(e) => {
                drop(permit);
                error!("Queue {} failed to fetch jobs: {}", handle.name(), e);
            }
        }

        match &signal {
            Some(signal) => tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = signal.notified() => {}
                _ = tokio::time::sleep(config.poll_interval) => {}
            },
            None => tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(config.poll_interval) => {}
            },
        }
    }

    tracker.close();
    if tokio::time::timeout(config.drain_timeout, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            "Worker for queue {} stopped with {} jobs still running",
            handle.name(),
            tracker.len()
        );
    }

    info!(
        "Worker for queue {} stopped ({} processed, {} failed)",
        handle.name(),
        stats.processed(),
        stats.failed()
    );
}

async fn run_job(
    handle: Arc<QueueHandle>,
    dispatcher: Arc<Dispatcher>,
    semaphore: Arc<Semaphore>,
    job: DeliveredJob,
    stats: Arc<WorkerStats>,
    permit: OwnedSemaphorePermit,
) {
    match execute(&dispatcher, &semaphore, &job, permit).await {
        Ok(value) => match handle.complete(&job.id, value).await {
            Ok(()) => {
                stats.processed.fetch_add(1, Ordering::SeqCst);
                debug!("Job {} completed", job.id);
            }
            Err(e) => error!("Failed to record completion of job {}: {}", job.id, e),
        },
        Err(e) => {
            let reason = e.failure_reason();
            match handle.fail(&job.id, &reason).await {
                Ok(FailOutcome::Retrying { attempt }) => {
                    stats.retried.fetch_add(1, Ordering::SeqCst);
                    warn!("Job {} failed, retrying as attempt {}: {}", job.id, attempt, reason);
                }
                Ok(FailOutcome::Failed) => {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                    error!("Job {} failed: {}", job.id, reason);
                }
                Err(be) => error!("Failed to record failure of job {}: {}", job.id, be),
            }
        }
    }
}

/// Dispatch one job. A job with dependencies waits without holding a permit
/// and takes a new one before its handler runs.
async fn execute(
    dispatcher: &Dispatcher,
    semaphore: &Arc<Semaphore>,
    job: &DeliveredJob,
    permit: OwnedSemaphorePermit,
) -> QueueResult<Value> {
    if job.dependencies.is_empty() {
        let prepared = dispatcher.prepare(job).await?;
        let result = dispatcher.run(prepared).await;
        drop(permit);
        return result;
    }

    drop(permit);
    let prepared = dispatcher.prepare(job).await?;
    let _permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| JobError::Backend(format!("worker for queue {} closed", job.queue_name)))?;
    dispatcher.run(prepared).await
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
