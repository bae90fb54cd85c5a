//! # jobflow Queue
//!
//! Job flows over named queues: parent/child trees, dynamic dispatch to
//! `namespace.method` handlers, hand-off of an upstream job's result to the
//! job that depends on it, and cron-driven resubmission.
//!
//! ## Architecture
//!
//! ```text
//!  CronManager ──┐
//!                ├──► FlowProducer ──► FlowBuilder ──► QueueBackend::submit_tree
//!  admin call ───┘                                          │
//!                                                           ▼
//!              QueueWorker ◄── next_ready ◄─────────── QueueBackend
//!                   │                                       ▲
//!                   ▼                                       │
//!              Dispatcher ──► DependencyWaiter ──► QueueHandleCache
//!                   │
//!                   ▼
//!            HandlerRegistry ──► JobHandler::invoke
//! ```
//!
//! ## Key Components
//!
//! - [`FlowBuilder`]: expands a [`JobSpec`] into a wired [`QueueEntryNode`] tree
//! - [`FlowProducer`]: applies job-type hints and submits whole trees
//! - [`Dispatcher`]: resolves handlers and runs delivered jobs
//! - [`DependencyWaiter`]: waits for an upstream job to finish
//! - [`CronManager`]: named recurring submissions with safe replacement
//! - [`QueueHandleCache`]: per-queue handles with pause and scheduled resume
//! - [`MemoryBackend`]: in-process [`QueueBackend`]
//! - [`JobRuntime`]: owns all of the above
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use jobflow_queue::{FnHandler, HandlerRegistry, JobRuntime, JobSpec, MemoryBackend, RuntimeOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(HandlerRegistry::new());
//!     registry.register(Arc::new(
//!         FnHandler::new("Post").operation("latest", |_| async { Ok(json!({ "ok": true })) }),
//!     ))?;
//!
//!     let runtime = JobRuntime::new(Arc::new(MemoryBackend::new()), registry, RuntimeOptions::default());
//!     runtime.start_workers(&["posts".to_string()]);
//!     runtime.submit(&JobSpec::new("posts", "Post.latest", json!({}))).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cron;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod handles;
pub mod job;
pub mod memory;
pub mod producer;
pub mod registry;
pub mod runtime;
pub mod waiter;
pub mod worker;

pub use backend::{FailOutcome, QueueBackend};
pub use cron::{CronManager, CronRegistrationInfo, RegistrationResult, RegistrationStatus};
pub use dispatcher::{Dispatcher, PreparedJob};
pub use error::{JobError, QueueResult};
pub use flow::{ChainPolicy, FlowBuilder, IdSequence};
pub use handles::{QueueHandle, QueueHandleCache};
pub use job::{
    Backoff, DEPENDENCY_RESULT_FIELD, DeliveredJob, Dependency, JobId, JobInput, JobName,
    JobOptions, JobResult, JobSpec, JobState, QueueCounts, QueueEntryNode, QueueStatus,
};
pub use memory::{DEFAULT_TERMINAL_RETENTION, MemoryBackend};
pub use producer::{FlowProducer, JobTypeHint, SubmittedFlow};
pub use registry::{FnHandler, HandlerRegistry, JobHandler};
pub use runtime::{JobRuntime, LoadReport, RuntimeOptions};
pub use waiter::DependencyWaiter;
pub use worker::{QueueWorker, WorkerConfig, WorkerStats};
