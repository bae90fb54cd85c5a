//! Tests for queue handles and scheduled resume.

use super::*;
use crate::memory::MemoryBackend;

fn cache() -> QueueHandleCache {
    QueueHandleCache::new(Arc::new(MemoryBackend::new()))
}

#[tokio::test]
async fn test_get_is_memoised() {
    let cache = cache();
    let a = cache.get("posts");
    let b = cache.get("posts");
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.names(), vec!["posts"]);
}

#[tokio::test]
async fn test_pause_is_idempotent() {
    let cache = cache();
    assert!(cache.pause("posts").await.unwrap());
    assert!(!cache.pause("posts").await.unwrap());
    assert!(cache.get("posts").is_paused().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_schedule_resume() {
    let cache = cache();
    let handle = cache.get("posts");
    handle.pause().await.unwrap();
    handle.schedule_resume(Duration::from_millis(100));

    assert!(handle.is_paused().await.unwrap());
    assert!(handle.has_pending_resume());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.is_paused().await.unwrap());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!handle.is_paused().await.unwrap());
    assert!(!handle.has_pending_resume());
}

#[tokio::test(start_paused = true)]
async fn test_rearm_replaces_timer() {
    let cache = cache();
    let handle = cache.get("posts");
    handle.pause().await.unwrap();
    handle.schedule_resume(Duration::from_millis(100));

    tokio::time::sleep(Duration::from_millis(50)).await;
    // Pausing again and rearming pushes the resume out.
    assert!(!handle.pause().await.unwrap());
    handle.schedule_resume(Duration::from_millis(100));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(handle.is_paused().await.unwrap(), "first timer should be gone");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_paused().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_manual_resume_disarms() {
    let cache = cache();
    let handle = cache.get("posts");
    handle.pause().await.unwrap();
    handle.schedule_resume(Duration::from_millis(100));

    handle.resume().await.unwrap();
    assert!(!handle.has_pending_resume());

    handle.pause().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.is_paused().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_clear_disarms_all() {
    let cache = cache();
    cache.pause("posts").await.unwrap();
    cache.schedule_resume("posts", Duration::from_millis(100));
    let handle = cache.get("posts");

    cache.clear();
    assert!(cache.names().is_empty());
    assert!(!handle.has_pending_resume());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.is_paused().await.unwrap());
}

#[tokio::test]
async fn test_status() {
    let cache = cache();
    cache.pause("email").await.unwrap();
    let status = cache.get("email").status().await.unwrap();
    assert_eq!(status.name, "email");
    assert!(status.counts.paused);
    assert_eq!(status.counts.waiting, 0);
}
