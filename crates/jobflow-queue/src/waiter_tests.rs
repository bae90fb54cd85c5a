//! Tests for the dependency waiter.

use super::*;
use crate::backend::{FailOutcome, QueueBackend};
use crate::flow::FlowBuilder;
use crate::job::{DeliveredJob, JobId, JobSpec, QueueCounts, QueueEntryNode};
use crate::memory::MemoryBackend;
use async_trait::async_trait;
use serde_json::json;

/// Memory backend without change notification, to exercise polling.
struct PollingBackend(MemoryBackend);

#[async_trait]
impl QueueBackend for PollingBackend {
    async fn submit_tree(&self, root: &QueueEntryNode) -> QueueResult<Vec<JobId>> {
        self.0.submit_tree(root).await
    }
    async fn get_job(&self, queue_name: &str, job_id: &str) -> QueueResult<Option<JobResult>> {
        self.0.get_job(queue_name, job_id).await
    }
    async fn pause(&self, queue_name: &str) -> QueueResult<()> {
        self.0.pause(queue_name).await
    }
    async fn resume(&self, queue_name: &str) -> QueueResult<()> {
        self.0.resume(queue_name).await
    }
    async fn is_paused(&self, queue_name: &str) -> QueueResult<bool> {
        self.0.is_paused(queue_name).await
    }
    async fn counts(&self, queue_name: &str) -> QueueResult<QueueCounts> {
        self.0.counts(queue_name).await
    }
    async fn next_ready(&self, queue_name: &str) -> QueueResult<Option<DeliveredJob>> {
        self.0.next_ready(queue_name).await
    }
    async fn complete(&self, queue_name: &str, job_id: &str, value: Value) -> QueueResult<()> {
        self.0.complete(queue_name, job_id, value).await
    }
    async fn fail(&self, queue_name: &str, job_id: &str, reason: &str) -> QueueResult<FailOutcome> {
        self.0.fail(queue_name, job_id, reason).await
    }
}

async fn setup(backend: Arc<dyn QueueBackend>) -> (DependencyWaiter, Arc<dyn QueueBackend>, Dependency) {
    let root = FlowBuilder::build(&JobSpec::new("posts", "Post.latest", json!({}))).unwrap();
    backend.submit_tree(&root).await.unwrap();
    backend.next_ready("posts").await.unwrap();

    let handles = Arc::new(QueueHandleCache::new(backend.clone()));
    let waiter = DependencyWaiter::new(handles, Duration::from_millis(10));
    (waiter, backend, Dependency::new("posts", root.id))
}

#[tokio::test]
async fn test_wait_completed() {
    let (waiter, backend, dep) = setup(Arc::new(MemoryBackend::new())).await;

    let completer = {
        let backend = backend.clone();
        let dep = dep.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            backend
                .complete(&dep.queue_name, &dep.job_id, json!({ "ok": true }))
                .await
                .unwrap();
        })
    };

    let value = waiter.wait(&dep, Duration::from_secs(5)).await.unwrap();
    assert_eq!(value, json!({ "ok": true }));
    completer.await.unwrap();
}

#[tokio::test]
async fn test_wait_already_completed_null() {
    let (waiter, backend, dep) = setup(Arc::new(MemoryBackend::new())).await;
    backend.complete(&dep.queue_name, &dep.job_id, Value::Null).await.unwrap();

    let value = waiter.wait(&dep, Duration::from_secs(1)).await.unwrap();
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn test_wait_failed() {
    let (waiter, backend, dep) = setup(Arc::new(MemoryBackend::new())).await;
    backend
        .fail(&dep.queue_name, &dep.job_id, "HandlerException: boom")
        .await
        .unwrap();

    let err = waiter.wait(&dep, Duration::from_secs(1)).await.unwrap_err();
    match err {
        JobError::DependencyFailed { job_id, reason, .. } => {
            assert_eq!(job_id, dep.job_id);
            assert_eq!(reason, "HandlerException: boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_wait_missing_job() {
    let (waiter, _, _) = setup(Arc::new(MemoryBackend::new())).await;
    let missing = Dependency::new("posts", "nope:0");

    let err = waiter.wait(&missing, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, JobError::DependencyFailed { reason, .. } if reason == "job not found"));
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout() {
    let (waiter, _, dep) = setup(Arc::new(MemoryBackend::new())).await;

    let err = waiter.wait(&dep, Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, JobError::DependencyTimeout { .. }));
}

#[tokio::test]
async fn test_wait_polling_completed() {
    let (waiter, backend, dep) = setup(Arc::new(PollingBackend(MemoryBackend::new()))).await;

    let completer = {
        let backend = backend.clone();
        let dep = dep.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            backend.complete(&dep.queue_name, &dep.job_id, json!(42)).await.unwrap();
        })
    };

    let value = waiter.wait(&dep, Duration::from_secs(5)).await.unwrap();
    assert_eq!(value, json!(42));
    completer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_wait_polling_timeout() {
    let (waiter, _, dep) = setup(Arc::new(PollingBackend(MemoryBackend::new()))).await;

    let err = waiter.wait(&dep, Duration::from_millis(55)).await.unwrap_err();
    assert!(matches!(err, JobError::DependencyTimeout { timeout, .. } if timeout == Duration::from_millis(55)));
}
