//! Tests for the job runtime.

use super::*;
use crate::cron::RegistrationStatus;
use crate::job::JobState;
use crate::memory::MemoryBackend;
use crate::registry::FnHandler;
use jobflow_config::JobFileLoader;
use serde_json::json;

fn runtime() -> JobRuntime {
    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register(Arc::new(
            FnHandler::new("Post").operation("latest", |_| async { Ok(json!({ "ok": true })) }),
        ))
        .unwrap();

    let options = RuntimeOptions {
        worker: WorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(20),
            drain_timeout: Duration::from_secs(1),
        },
        poll_interval: Duration::from_millis(20),
        dependency_timeout: Duration::from_secs(5),
    };
    JobRuntime::new(Arc::new(MemoryBackend::new()), registry, options)
}

fn records(json: &str) -> Vec<JobRecord> {
    JobFileLoader::load_str(json).unwrap()
}

#[test]
fn test_options_from_config() {
    let config = QueuesConfig {
        names: vec!["posts".to_string()],
        concurrency: 8,
        poll_interval_ms: 250,
        dependency_timeout_secs: 12,
    };
    let options = RuntimeOptions::from(&config);
    assert_eq!(options.worker.concurrency, 8);
    assert_eq!(options.worker.poll_interval, Duration::from_millis(250));
    assert_eq!(options.dependency_timeout, Duration::from_secs(12));
}

#[tokio::test]
async fn test_load_jobs_report() {
    let runtime = runtime();
    let report = runtime
        .load_jobs(&records(
            r#"[
                { "queueName": "posts", "name": "Post.latest", "data": {}, "cronPattern": "0 0 0 1 1 *" },
                { "queueName": "posts", "name": "Post.latest", "data": { "type": "PRIORITIZED" } },
                { "queueName": "posts", "name": "Post.latest" },
                { "queueName": "posts", "name": "Post.bad", "data": {}, "cronPattern": "bogus" }
            ]"#,
        ))
        .await;

    assert_eq!(
        report,
        LoadReport {
            registered: 1,
            submitted: 1,
            skipped: 2,
        }
    );
    assert_eq!(runtime.list_crons().len(), 1);

    let status = runtime.queue_status("posts").await.unwrap();
    assert_eq!(status.counts.waiting, 1);
    assert_eq!(status.counts.prioritized, 1);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_add_and_remove_cron() {
    let runtime = runtime();
    let record = records(
        r#"[{ "queueName": "posts", "name": "Post.latest", "data": {}, "cronPattern": "*/10 * * * *" }]"#,
    )
    .remove(0);

    let result = runtime.add_cron("latest-posts", &record).await.unwrap();
    assert_eq!(result.status, RegistrationStatus::Registered);
    assert_eq!(result.pattern.as_deref(), Some("0 */10 * * * *"));

    let result = runtime.add_cron("latest-posts", &record).await.unwrap();
    assert_eq!(result.status, RegistrationStatus::Replaced);
    assert_eq!(runtime.list_crons().len(), 1);

    assert_eq!(
        runtime.remove_cron("latest-posts").await.status,
        RegistrationStatus::Removed
    );
    assert_eq!(
        runtime.remove_cron("latest-posts").await.status,
        RegistrationStatus::NotFound
    );
}

#[tokio::test]
async fn test_add_cron_requires_pattern() {
    let runtime = runtime();
    let record = records(r#"[{ "queueName": "posts", "name": "Post.latest", "data": {} }]"#).remove(0);
    assert!(matches!(
        runtime.add_cron("x", &record).await,
        Err(JobError::InvalidJobSpec(_))
    ));
}

#[tokio::test]
async fn test_blank_cron_pattern_submits_once() {
    let runtime = runtime();
    let loaded = records(
        r#"[{ "queueName": "posts", "name": "Post.latest", "data": {}, "cronPattern": "  " }]"#,
    );
    let report = runtime.load_jobs(&loaded).await;

    assert_eq!(
        report,
        LoadReport {
            registered: 0,
            submitted: 1,
            skipped: 0,
        }
    );
    assert!(runtime.list_crons().is_empty());
    assert!(matches!(
        runtime.add_cron("x", &loaded[0]).await,
        Err(JobError::InvalidJobSpec(_))
    ));

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_submit_job_runs_on_worker() {
    let runtime = runtime();
    assert_eq!(runtime.start_workers(&["posts".to_string()]), 1);
    assert_eq!(runtime.start_workers(&["posts".to_string()]), 0);

    let record = records(r#"[{ "queueName": "posts", "name": "Post.latest", "data": {} }]"#).remove(0);
    let flow = runtime.submit_job(&record).await.unwrap();

    let handle = runtime.handles().get("posts");
    let mut rx = handle.watch(&flow.root_id).await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.is_terminal()))
        .await
        .unwrap()
        .unwrap();

    let job = handle.get_job(&flow.root_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_submit_job_invalid() {
    let runtime = runtime();
    let record = records(r#"[{ "name": "Post.latest", "data": {} }]"#).remove(0);
    assert!(matches!(
        runtime.submit_job(&record).await,
        Err(JobError::InvalidJobSpec(_))
    ));
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let runtime = runtime();
    runtime.start_workers(&["posts".to_string(), "email".to_string()]);
    runtime
        .load_jobs(&records(
            r#"[{ "queueName": "posts", "name": "Post.latest", "data": {}, "cronPattern": "* * * * * *" }]"#,
        ))
        .await;
    runtime.handles().pause("email").await.unwrap();
    runtime.handles().schedule_resume("email", Duration::from_secs(60));

    runtime.shutdown().await.unwrap();
    assert!(runtime.is_shut_down());
    assert!(runtime.list_crons().is_empty());
    assert!(runtime.worker_stats().is_empty());
    assert!(runtime.handles().names().is_empty());

    runtime.shutdown().await.unwrap();
    assert_eq!(runtime.start_workers(&["posts".to_string()]), 0);
}
