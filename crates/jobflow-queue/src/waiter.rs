//! Dependency waiter.
//!
//! Suspends one dispatch until an upstream job is terminal, then hands back
//! its return value or turns its failure into this job's error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{JobError, QueueResult};
use crate::handles::{QueueHandle, QueueHandleCache};
use crate::job::{Dependency, JobResult, JobState};

/// Waits for upstream jobs.
pub struct DependencyWaiter {
    handles: Arc<QueueHandleCache>,
    poll_interval: Duration,
}

impl DependencyWaiter {
    pub fn new(handles: Arc<QueueHandleCache>, poll_interval: Duration) -> Self {
        Self {
            handles,
            poll_interval,
        }
    }

    /// Wait until the dependency is terminal or `timeout` elapses.
    pub async fn wait(&self, dependency: &Dependency, timeout: Duration) -> QueueResult<Value> {
        let handle = self.handles.get(&dependency.queue_name);
        let deadline = Instant::now() + timeout;

        debug!(
            "Waiting up to {:?} for job {} in queue {}",
            timeout, dependency.job_id, dependency.queue_name
        );

        match handle.watch(&dependency.job_id).await? {
            Some(mut rx) => loop {
                // Release the borrow before awaiting.
                let state = *rx.borrow_and_update();
                if state.is_terminal() {
                    break;
                }
                match tokio::time::timeout_at(deadline, rx.changed()).await {
                    Ok(Ok(())) => continue,
                    // Sender gone: fall through and read whatever was stored.
                    Ok(Err(_)) => break,
                    Err(_) => return Err(Self::timed_out(dependency, timeout)),
                }
            },
            None => self.poll(&handle, dependency, deadline, timeout).await?,
        }

        let job = handle.get_job(&dependency.job_id).await?;
        Self::outcome(dependency, job, timeout)
    }

    async fn poll(
        &self,
        handle: &QueueHandle,
        dependency: &Dependency,
        deadline: Instant,
        timeout: Duration,
    ) -> QueueResult<()> {
        loop {
            match handle.get_job(&dependency.job_id).await? {
                Some(job) if !job.state.is_terminal() => {}
                _ => return Ok(()),
            }
            if Instant::now() >= deadline {
                return Err(Self::timed_out(dependency, timeout));
            }
            tokio::time::sleep_until(deadline.min(Instant::now() + self.poll_interval)).await;
        }
    }

    fn outcome(
        dependency: &Dependency,
        job: Option<JobResult>,
        timeout: Duration,
    ) -> QueueResult<Value> {
        let Some(job) = job else {
            return Err(JobError::DependencyFailed {
                queue_name: dependency.queue_name.clone(),
                job_id: dependency.job_id.clone(),
                reason: "job not found".to_string(),
            });
        };

        match job.state {
            JobState::Completed => Ok(job.return_value.unwrap_or(Value::Null)),
            JobState::Failed => Err(JobError::DependencyFailed {
                queue_name: dependency.queue_name.clone(),
                job_id: dependency.job_id.clone(),
                reason: job
                    .failure_reason
                    .unwrap_or_else(|| "unknown failure".to_string()),
            }),
            _ => Err(Self::timed_out(dependency, timeout)),
        }
    }

    fn timed_out(dependency: &Dependency, timeout: Duration) -> JobError {
        JobError::DependencyTimeout {
            queue_name: dependency.queue_name.clone(),
            job_id: dependency.job_id.clone(),
            timeout,
        }
    }
}

#[cfg(test)]
#[path = "waiter_tests.rs"]
mod tests;
