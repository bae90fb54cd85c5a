//! Tests for the in-process backend.

use super::*;
use crate::flow::FlowBuilder;
use crate::job::{Backoff, JobSpec};
use serde_json::json;

fn single(queue: &str, name: &str, options: JobOptions) -> QueueEntryNode {
    FlowBuilder::build(&JobSpec::new(queue, name, json!({})).with_options(options)).unwrap()
}

#[tokio::test]
async fn test_submit_and_get() {
    let backend = MemoryBackend::new();
    let root = single("posts", "Post.latest", JobOptions::default());

    let ids = backend.submit_tree(&root).await.unwrap();
    assert_eq!(ids, vec![root.id.clone()]);

    let job = backend.get_job("posts", &root.id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.attempts_made, 0);

    // Wrong queue does not find it.
    assert!(backend.get_job("email", &root.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_submit_duplicate_is_atomic() {
    let backend = MemoryBackend::new();
    let root = single("posts", "Post.latest", JobOptions::default());
    backend.submit_tree(&root).await.unwrap();

    let result = backend.submit_tree(&root).await;
    assert!(matches!(result, Err(JobError::Backend(_))));
    assert_eq!(backend.len(), 1);
}

#[tokio::test]
async fn test_dependency_gating() {
    let backend = MemoryBackend::new();
    let tree = JobSpec::new("posts", "Post.parent", json!({}))
        .with_chain_results(true)
        .with_child(JobSpec::new("posts", "Post.a", json!({})))
        .with_child(JobSpec::new("posts", "Post.b", json!({})));
    let root = FlowBuilder::build(&tree).unwrap();
    backend.submit_tree(&root).await.unwrap();

    let first = backend.next_ready("posts").await.unwrap().unwrap();
    assert_eq!(first.name, "Post.parent");
    let second = backend.next_ready("posts").await.unwrap().unwrap();
    assert_eq!(second.name, "Post.a");
    // Post.b waits for Post.a.
    assert!(backend.next_ready("posts").await.unwrap().is_none());

    let counts = backend.counts("posts").await.unwrap();
    assert_eq!(counts.active, 2);
    assert_eq!(counts.waiting_children, 1);

    backend.complete("posts", &second.id, json!(1)).await.unwrap();
    let third = backend.next_ready("posts").await.unwrap().unwrap();
    assert_eq!(third.name, "Post.b");
}

#[tokio::test]
async fn test_priority_order() {
    let backend = MemoryBackend::new();
    let plain = single("posts", "Post.plain", JobOptions::default());
    let low = single(
        "posts",
        "Post.low",
        JobOptions {
            priority: Some(5),
            ..Default::default()
        },
    );
    let high = single(
        "posts",
        "Post.high",
        JobOptions {
            priority: Some(1),
            ..Default::default()
        },
    );
    for tree in [&plain, &low, &high] {
        backend.submit_tree(tree).await.unwrap();
    }

    assert_eq!(backend.counts("posts").await.unwrap().prioritized, 2);

    let order: Vec<String> = {
        let mut names = Vec::new();
        while let Some(job) = backend.next_ready("posts").await.unwrap() {
            names.push(job.name);
        }
        names
    };
    assert_eq!(order, vec!["Post.high", "Post.low", "Post.plain"]);
}

#[tokio::test]
async fn test_pause_blocks_delivery() {
    let backend = MemoryBackend::new();
    backend
        .submit_tree(&single("posts", "Post.latest", JobOptions::default()))
        .await
        .unwrap();

    backend.pause("posts").await.unwrap();
    assert!(backend.is_paused("posts").await.unwrap());
    assert!(backend.counts("posts").await.unwrap().paused);
    assert!(backend.next_ready("posts").await.unwrap().is_none());

    backend.resume("posts").await.unwrap();
    assert!(backend.next_ready("posts").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_delayed_job() {
    let backend = MemoryBackend::new();
    let root = single(
        "posts",
        "Post.delayed",
        JobOptions {
            delay: Some(1000),
            ..Default::default()
        },
    );
    backend.submit_tree(&root).await.unwrap();

    assert_eq!(backend.counts("posts").await.unwrap().delayed, 1);
    assert!(backend.next_ready("posts").await.unwrap().is_none());

    tokio::time::advance(Duration::from_millis(1001)).await;
    let job = backend.next_ready("posts").await.unwrap().unwrap();
    assert_eq!(job.id, root.id);
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_backoff() {
    let backend = MemoryBackend::new();
    let root = single(
        "posts",
        "Post.flaky",
        JobOptions {
            attempts: Some(2),
            backoff: Some(Backoff::Fixed(500)),
            ..Default::default()
        },
    );
    backend.submit_tree(&root).await.unwrap();

    let job = backend.next_ready("posts").await.unwrap().unwrap();
    assert_eq!(job.attempts_made, 1);
    let outcome = backend.fail("posts", &job.id, "HandlerException: boom").await.unwrap();
    assert_eq!(outcome, FailOutcome::Retrying { attempt: 2 });

    let snapshot = backend.get_job("posts", &job.id).await.unwrap().unwrap();
    assert_eq!(snapshot.state, JobState::Delayed);
    assert!(snapshot.failure_reason.is_none());
    assert!(backend.next_ready("posts").await.unwrap().is_none());

    tokio::time::advance(Duration::from_millis(501)).await;
    let job = backend.next_ready("posts").await.unwrap().unwrap();
    assert_eq!(job.attempts_made, 2);

    let outcome = backend.fail("posts", &job.id, "HandlerException: boom").await.unwrap();
    assert_eq!(outcome, FailOutcome::Failed);
    let snapshot = backend.get_job("posts", &job.id).await.unwrap().unwrap();
    assert_eq!(snapshot.state, JobState::Failed);
    assert_eq!(snapshot.failure_reason.as_deref(), Some("HandlerException: boom"));
}

#[tokio::test]
async fn test_watch_sees_completion() {
    let backend = MemoryBackend::new();
    let root = single("posts", "Post.latest", JobOptions::default());
    backend.submit_tree(&root).await.unwrap();

    let mut rx = backend.watch("posts", &root.id).await.unwrap().unwrap();
    assert_eq!(*rx.borrow(), JobState::Waiting);

    backend.next_ready("posts").await.unwrap();
    backend.complete("posts", &root.id, json!({ "ok": true })).await.unwrap();

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), JobState::Completed);

    let job = backend.get_job("posts", &root.id).await.unwrap().unwrap();
    assert_eq!(job.return_value, Some(json!({ "ok": true })));
}

#[tokio::test]
async fn test_mark_waiting_on_dependency() {
    let backend = MemoryBackend::new();
    let root = single("posts", "Post.latest", JobOptions::default());
    backend.submit_tree(&root).await.unwrap();
    backend.next_ready("posts").await.unwrap();

    backend.mark_waiting_on_dependency("posts", &root.id).await.unwrap();
    let job = backend.get_job("posts", &root.id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::WaitingOnDependency);

    backend.mark_active("posts", &root.id).await.unwrap();
    let job = backend.get_job("posts", &root.id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Active);
}

#[tokio::test]
async fn test_terminal_state_is_final() {
    let backend = MemoryBackend::new();
    let root = single("posts", "Post.latest", JobOptions::default());
    backend.submit_tree(&root).await.unwrap();
    backend.next_ready("posts").await.unwrap();

    backend.complete("posts", &root.id, json!(1)).await.unwrap();
    backend.fail("posts", &root.id, "late").await.unwrap();

    let job = backend.get_job("posts", &root.id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.failure_reason.is_none());
}

#[tokio::test]
async fn test_ready_signal_is_shared() {
    let backend = MemoryBackend::new();
    let a = backend.ready_signal("posts").unwrap();
    let b = backend.ready_signal("posts").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

async fn run_to_end(backend: &MemoryBackend, queue: &str) -> JobId {
    let job = backend.next_ready(queue).await.unwrap().unwrap();
    backend.complete(queue, &job.id, json!({ "ok": true })).await.unwrap();
    job.id
}

#[tokio::test]
async fn test_remove_on_complete() {
    let backend = MemoryBackend::new();
    let options = JobOptions {
        remove_on_complete: Some(true),
        ..Default::default()
    };
    backend.submit_tree(&single("posts", "Post.latest", options)).await.unwrap();
    backend
        .submit_tree(&single("posts", "Post.latest", JobOptions::default()))
        .await
        .unwrap();
    assert_eq!(backend.len(), 2);

    let removed = run_to_end(&backend, "posts").await;
    assert_eq!(backend.len(), 1);
    assert!(backend.get_job("posts", &removed).await.unwrap().is_none());

    let kept = run_to_end(&backend, "posts").await;
    assert_eq!(backend.len(), 1);
    let job = backend.get_job("posts", &kept).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn test_remove_on_complete_waits_for_dependents() {
    let backend = MemoryBackend::new();
    let upstream = single(
        "email",
        "Post.latest",
        JobOptions {
            remove_on_complete: Some(true),
            ..Default::default()
        },
    );
    backend.submit_tree(&upstream).await.unwrap();
    let downstream = FlowBuilder::build(
        &JobSpec::new("posts", "Post.notify", json!({}))
            .with_dependency(Dependency::new("email", &upstream.id)),
    )
    .unwrap();
    backend.submit_tree(&downstream).await.unwrap();

    run_to_end(&backend, "email").await;
    let job = backend.get_job("email", &upstream.id).await.unwrap().unwrap();
    assert_eq!(job.return_value, Some(json!({ "ok": true })));

    run_to_end(&backend, "posts").await;
    assert!(backend.get_job("email", &upstream.id).await.unwrap().is_none());
    assert_eq!(backend.len(), 1);
}

#[tokio::test]
async fn test_retention_limit() {
    let backend = MemoryBackend::with_retention(2);
    let mut ids = Vec::new();
    for _ in 0..5 {
        let root = single("posts", "Post.latest", JobOptions::default());
        ids.push(root.id.clone());
        backend.submit_tree(&root).await.unwrap();
    }
    for _ in 0..4 {
        run_to_end(&backend, "posts").await;
    }

    // Two finished jobs plus the one still waiting.
    assert_eq!(backend.len(), 3);
    assert!(backend.get_job("posts", &ids[0]).await.unwrap().is_none());
    assert!(backend.get_job("posts", &ids[1]).await.unwrap().is_none());
    assert!(backend.get_job("posts", &ids[3]).await.unwrap().is_some());

    let job = backend.next_ready("posts").await.unwrap().unwrap();
    backend.fail("posts", &job.id, "HandlerException: boom").await.unwrap();
    assert_eq!(backend.len(), 2);
    let failed = backend.get_job("posts", &ids[4]).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);
}
