//! Queue backend contract.
//!
//! The backend owns persisted job state, delivery, priority ordering and
//! retry. The rest of the crate only talks to it through this trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, watch};

use crate::error::QueueResult;
use crate::job::{DeliveredJob, JobId, JobResult, JobState, QueueCounts, QueueEntryNode};

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job will be delivered again; `attempt` is the next attempt number.
    Retrying { attempt: u32 },
    /// No attempts left, the job is now `failed`.
    Failed,
}

/// Storage and delivery for job trees.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Submit a whole tree. Either every node becomes visible or none does.
    /// Returns the ids in submission order.
    async fn submit_tree(&self, root: &QueueEntryNode) -> QueueResult<Vec<JobId>>;

    /// Fetch a job snapshot.
    async fn get_job(&self, queue_name: &str, job_id: &str) -> QueueResult<Option<JobResult>>;

    /// Subscribe to state changes of one job.
    ///
    /// Backends without change notification return `None` and callers poll.
    async fn watch(
        &self,
        _queue_name: &str,
        _job_id: &str,
    ) -> QueueResult<Option<watch::Receiver<JobState>>> {
        Ok(None)
    }

    async fn pause(&self, queue_name: &str) -> QueueResult<()>;

    async fn resume(&self, queue_name: &str) -> QueueResult<()>;

    async fn is_paused(&self, queue_name: &str) -> QueueResult<bool>;

    async fn counts(&self, queue_name: &str) -> QueueResult<QueueCounts>;

    /// Take the next deliverable job, moving it to `active`.
    async fn next_ready(&self, queue_name: &str) -> QueueResult<Option<DeliveredJob>>;

    /// Record that an active job is blocked on a dependency.
    async fn mark_waiting_on_dependency(&self, _queue_name: &str, _job_id: &str) -> QueueResult<()> {
        Ok(())
    }

    /// Record that a job blocked on a dependency is running again.
    async fn mark_active(&self, _queue_name: &str, _job_id: &str) -> QueueResult<()> {
        Ok(())
    }

    async fn complete(&self, queue_name: &str, job_id: &str, value: Value) -> QueueResult<()>;

    /// Record a failed attempt. The backend decides whether to retry.
    async fn fail(&self, queue_name: &str, job_id: &str, reason: &str) -> QueueResult<FailOutcome>;

    /// Signal raised whenever jobs may have become ready in `queue_name`.
    fn ready_signal(&self, _queue_name: &str) -> Option<Arc<Notify>> {
        None
    }

    /// Release backend resources.
    async fn close(&self) -> QueueResult<()> {
        Ok(())
    }
}
