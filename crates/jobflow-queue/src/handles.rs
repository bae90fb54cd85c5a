//! Queue handles.
//!
//! One [`QueueHandle`] per queue name, created on first use and kept for the
//! life of the process. A handle carries the queue's pending resume timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{FailOutcome, QueueBackend};
use crate::error::QueueResult;
use crate::job::{DeliveredJob, JobResult, JobState, QueueStatus};

struct ResumeTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// A live handle on one named queue.
pub struct QueueHandle {
    name: String,
    backend: Arc<dyn QueueBackend>,
    resume_timer: Mutex<Option<ResumeTimer>>,
    generation: AtomicU64,
}

impl QueueHandle {
    fn new(name: String, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            name,
            backend,
            resume_timer: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pause the queue. Returns `false` if it was already paused.
    pub async fn pause(&self) -> QueueResult<bool> {
        if self.backend.is_paused(&self.name).await? {
            return Ok(false);
        }
        self.backend.pause(&self.name).await?;
        info!("Queue {} paused", self.name);
        Ok(true)
    }

    /// Resume the queue and disarm any pending resume timer.
    pub async fn resume(&self) -> QueueResult<()> {
        self.disarm();
        self.backend.resume(&self.name).await?;
        info!("Queue {} resumed", self.name);
        Ok(())
    }

    pub async fn is_paused(&self) -> QueueResult<bool> {
        self.backend.is_paused(&self.name).await
    }

    /// Resume the queue after `after`, if it is still paused then.
    ///
    /// Replaces a timer armed earlier, so at most one is pending.
    pub fn schedule_resume(self: &Arc<Self>, after: Duration) {
        let mut slot = self.resume_timer.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::clone(self);

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;

            // A newer timer or a manual resume took over while we slept.
            if handle.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            match handle.backend.is_paused(&handle.name).await {
                Ok(true) => {
                    if let Err(e) = handle.backend.resume(&handle.name).await {
                        warn!("Scheduled resume of queue {} failed: {}", handle.name, e);
                    } else {
                        info!("Queue {} resumed after {:?}", handle.name, after);
                    }
                }
                Ok(false) => debug!("Queue {} already running, nothing to resume", handle.name),
                Err(e) => warn!("Scheduled resume of queue {} failed: {}", handle.name, e),
            }

            let mut slot = handle.resume_timer.lock();
            if slot.as_ref().is_some_and(|t| t.generation == generation) {
                *slot = None;
            }
        });

        if let Some(previous) = slot.replace(ResumeTimer { generation, task }) {
            previous.task.abort();
            debug!("Replaced pending resume timer for queue {}", self.name);
        }
    }

    /// Whether a resume timer is armed.
    pub fn has_pending_resume(&self) -> bool {
        self.resume_timer.lock().is_some()
    }

    /// Drop the pending resume timer, if any.
    pub fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self.resume_timer.lock().take() {
            timer.task.abort();
        }
    }

    pub async fn get_job(&self, job_id: &str) -> QueueResult<Option<JobResult>> {
        self.backend.get_job(&self.name, job_id).await
    }

    pub async fn watch(&self, job_id: &str) -> QueueResult<Option<watch::Receiver<JobState>>> {
        self.backend.watch(&self.name, job_id).await
    }

    pub async fn status(&self) -> QueueResult<QueueStatus> {
        Ok(QueueStatus {
            name: self.name.clone(),
            counts: self.backend.counts(&self.name).await?,
        })
    }

    pub async fn next_ready(&self) -> QueueResult<Option<DeliveredJob>> {
        self.backend.next_ready(&self.name).await
    }

    pub async fn mark_waiting_on_dependency(&self, job_id: &str) -> QueueResult<()> {
        self.backend.mark_waiting_on_dependency(&self.name, job_id).await
    }

    pub async fn mark_active(&self, job_id: &str) -> QueueResult<()> {
        self.backend.mark_active(&self.name, job_id).await
    }

    pub async fn complete(&self, job_id: &str, value: Value) -> QueueResult<()> {
        self.backend.complete(&self.name, job_id, value).await
    }

    pub async fn fail(&self, job_id: &str, reason: &str) -> QueueResult<FailOutcome> {
        self.backend.fail(&self.name, job_id, reason).await
    }

    pub fn ready_signal(&self) -> Option<Arc<Notify>> {
        self.backend.ready_signal(&self.name)
    }
}

/// Process-wide map from queue name to its handle.
pub struct QueueHandleCache {
    backend: Arc<dyn QueueBackend>,
    handles: Mutex<HashMap<String, Arc<QueueHandle>>>,
}

impl QueueHandleCache {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Get the handle for `queue_name`, creating it on first use.
    pub fn get(&self, queue_name: &str) -> Arc<QueueHandle> {
        self.handles
            .lock()
            .entry(queue_name.to_string())
            .or_insert_with(|| {
                debug!("Created handle for queue {}", queue_name);
                Arc::new(QueueHandle::new(queue_name.to_string(), self.backend.clone()))
            })
            .clone()
    }

    /// Pause a queue. Returns `false` if it was already paused.
    pub async fn pause(&self, queue_name: &str) -> QueueResult<bool> {
        self.get(queue_name).pause().await
    }

    pub async fn resume(&self, queue_name: &str) -> QueueResult<()> {
        self.get(queue_name).resume().await
    }

    pub fn schedule_resume(&self, queue_name: &str, after: Duration) {
        self.get(queue_name).schedule_resume(after);
    }

    /// Names of the queues with a live handle, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Disarm every pending resume and drop all handles.
    pub fn clear(&self) {
        let handles: Vec<Arc<QueueHandle>> =
            self.handles.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            handle.disarm();
        }
    }
}

#[cfg(test)]
#[path = "handles_tests.rs"]
mod tests;
