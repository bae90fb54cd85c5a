//! Job runtime.
//!
//! The state container that builds every component, owns it for the life of
//! the process and tears it down on shutdown. Admin operations are thin
//! pass-throughs to the component that implements them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use jobflow_config::{JobRecord, QueuesConfig};

use crate::backend::QueueBackend;
use crate::cron::{CronManager, CronRegistrationInfo, RegistrationResult};
use crate::dispatcher::Dispatcher;
use crate::error::{JobError, QueueResult};
use crate::handles::QueueHandleCache;
use crate::job::{JobSpec, QueueStatus};
use crate::producer::{FlowProducer, SubmittedFlow};
use crate::registry::HandlerRegistry;
use crate::waiter::DependencyWaiter;
use crate::worker::{QueueWorker, WorkerConfig, WorkerStats};

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub worker: WorkerConfig,
    /// Poll interval for dependency waits on backends without notification.
    pub poll_interval: Duration,
    pub dependency_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            poll_interval: Duration::from_millis(500),
            dependency_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&QueuesConfig> for RuntimeOptions {
    fn from(config: &QueuesConfig) -> Self {
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        Self {
            worker: WorkerConfig {
                concurrency: config.concurrency as usize,
                poll_interval,
                ..WorkerConfig::default()
            },
            poll_interval,
            dependency_timeout: Duration::from_secs(config.dependency_timeout_secs),
        }
    }
}

/// Summary of a job-file load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Cron jobs registered.
    pub registered: usize,
    /// One-off jobs submitted.
    pub submitted: usize,
    /// Records skipped because they were malformed or rejected.
    pub skipped: usize,
}

/// Owns the backend, registry, handle cache, producer, cron manager and
/// workers.
pub struct JobRuntime {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<HandlerRegistry>,
    handles: Arc<QueueHandleCache>,
    producer: Arc<FlowProducer>,
    dispatcher: Arc<Dispatcher>,
    crons: CronManager,
    workers: Mutex<Vec<QueueWorker>>,
    options: RuntimeOptions,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl JobRuntime {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<HandlerRegistry>,
        options: RuntimeOptions,
    ) -> Self {
        let handles = Arc::new(QueueHandleCache::new(backend.clone()));
        let producer = Arc::new(FlowProducer::new(handles.clone()));
        let waiter = Arc::new(DependencyWaiter::new(handles.clone(), options.poll_interval));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            waiter,
            handles.clone(),
            options.dependency_timeout,
        ));
        let crons = CronManager::new(producer.clone());

        Self {
            backend,
            registry,
            handles,
            producer,
            dispatcher,
            crons,
            workers: Mutex::new(Vec::new()),
            options,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn handles(&self) -> &Arc<QueueHandleCache> {
        &self.handles
    }

    pub fn producer(&self) -> &Arc<FlowProducer> {
        &self.producer
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn crons(&self) -> &CronManager {
        &self.crons
    }

    /// Submit a job record once.
    pub async fn submit_job(&self, record: &JobRecord) -> QueueResult<SubmittedFlow> {
        let spec = JobSpec::from_record(record)?;
        self.producer.submit(&spec).await
    }

    /// Submit an already-built spec once.
    pub async fn submit(&self, spec: &JobSpec) -> QueueResult<SubmittedFlow> {
        self.producer.submit(spec).await
    }

    /// Register a record's `cronPattern` under `name`.
    pub async fn add_cron(&self, name: &str, record: &JobRecord) -> QueueResult<RegistrationResult> {
        let spec = JobSpec::from_record(record)?;
        let pattern = spec
            .cron_pattern
            .clone()
            .ok_or_else(|| JobError::InvalidJobSpec(format!("{}: missing cronPattern", name)))?;
        self.crons.register(name, &pattern, spec).await
    }

    pub async fn remove_cron(&self, name: &str) -> RegistrationResult {
        self.crons.unregister(name).await
    }

    pub fn list_crons(&self) -> Vec<CronRegistrationInfo> {
        self.crons.list_all()
    }

    pub async fn queue_status(&self, queue_name: &str) -> QueueResult<QueueStatus> {
        self.handles.get(queue_name).status().await
    }

    /// Register the cron records and submit the rest. Malformed records are
    /// logged and skipped.
    pub async fn load_jobs(&self, records: &[JobRecord]) -> LoadReport {
        let mut report = LoadReport::default();

        for (index, record) in records.iter().enumerate() {
            let spec = match JobSpec::from_record(record) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("Skipping job entry {}: {}", index, e);
                    report.skipped += 1;
                    continue;
                }
            };

            match spec.cron_pattern.clone() {
                Some(pattern) => {
                    let name = spec.name.clone();
                    match self.crons.register(&name, &pattern, spec).await {
                        Ok(_) => report.registered += 1,
                        Err(e) => {
                            warn!("Skipping cron entry {} ({}): {}", index, name, e);
                            report.skipped += 1;
                        }
                    }
                }
                None => match self.producer.submit(&spec).await {
                    Ok(_) => report.submitted += 1,
                    Err(e) => {
                        warn!("Skipping job entry {} ({}): {}", index, spec.name, e);
                        report.skipped += 1;
                    }
                },
            }
        }

        info!(
            "Loaded jobs: {} cron, {} submitted, {} skipped",
            report.registered, report.submitted, report.skipped
        );
        report
    }

    /// Start one worker per queue. Queues that already have a worker are
    /// left alone. Returns the number of workers started.
    pub fn start_workers(&self, queue_names: &[String]) -> usize {
        if self.closed.load(Ordering::SeqCst) {
            warn!("Runtime is shut down, not starting workers");
            return 0;
        }

        let mut workers = self.workers.lock();
        let mut started = 0;
        for name in queue_names {
            if workers.iter().any(|w| w.queue_name() == name) {
                continue;
            }
            workers.push(QueueWorker::spawn(
                name.clone(),
                self.dispatcher.clone(),
                self.handles.clone(),
                self.options.worker.clone(),
                self.shutdown.child_token(),
            ));
            started += 1;
        }
        started
    }

    /// Stats of every running worker, by queue name.
    pub fn worker_stats(&self) -> Vec<(String, Arc<WorkerStats>)> {
        self.workers
            .lock()
            .iter()
            .map(|w| (w.queue_name().to_string(), w.stats().clone()))
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop cron timers, drain workers, disarm pending resumes and close the
    /// backend. Calling it again does nothing.
    pub async fn shutdown(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down job runtime");

        self.crons.stop_all().await;

        self.shutdown.cancel();
        let workers: Vec<QueueWorker> = self.workers.lock().drain(..).collect();
        futures::future::join_all(workers.into_iter().map(QueueWorker::join)).await;

        self.handles.clear();
        self.backend.close().await?;

        info!("Job runtime stopped");
        Ok(())
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
