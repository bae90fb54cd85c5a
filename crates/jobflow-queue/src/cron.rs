//! Cron-driven resubmission.
//!
//! A [`CronManager`] owns named [`CronTimer`]s. Each timer resubmits its job
//! spec through the [`FlowProducer`] whenever its schedule comes due.
//! Registering a name that is already taken stops the old timer, waits for
//! its task to end and only then starts the new one.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{JobError, QueueResult};
use crate::job::JobSpec;
use crate::producer::FlowProducer;

/// Accept classic 5-field patterns by adding a seconds field.
pub fn normalize_pattern(pattern: &str) -> String {
    let pattern = pattern.trim();
    if pattern.split_whitespace().count() == 5 {
        format!("0 {}", pattern)
    } else {
        pattern.to_string()
    }
}

/// Parse a recurrence expression.
pub fn parse_schedule(pattern: &str) -> QueueResult<Schedule> {
    Schedule::from_str(&normalize_pattern(pattern)).map_err(|e| JobError::InvalidCronPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// A recurring timer that resubmits one job spec.
pub struct CronTimer {
    name: String,
    pattern: String,
    schedule: Schedule,
    spec: JobSpec,
    cancel: CancellationToken,
    /// Cancelled once the timer task has exited.
    finished: CancellationToken,
    started: AtomicBool,
    fire_count: AtomicU64,
}

impl CronTimer {
    fn new(name: &str, pattern: String, schedule: Schedule, spec: JobSpec) -> Self {
        Self {
            name: name.to_string(),
            pattern,
            schedule,
            spec,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            started: AtomicBool::new(false),
            fire_count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn fire_count(&self) -> u64 {
        self.fire_count.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.finished.is_cancelled()
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.schedule.upcoming(Utc).next()
    }

    fn start(self: &Arc<Self>, producer: Arc<FlowProducer>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let timer = Arc::clone(self);
        tokio::spawn(async move {
            // Marks the timer finished even if the task unwinds.
            let _finished = timer.finished.clone().drop_guard();
            timer.run(producer).await;
        });
    }

    async fn run(&self, producer: Arc<FlowProducer>) {
        let mut last_fire = Utc::now();

        loop {
            let now = Utc::now();
            let Some(next) = self.schedule.after(&last_fire.max(now)).next() else {
                debug!("Cron {} has no upcoming schedule", self.name);
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            if self.cancel.is_cancelled() {
                break;
            }

            last_fire = next;
            self.fire_count.fetch_add(1, Ordering::Relaxed);
            debug!("Cron {} fired for {}", self.name, next.to_rfc3339());

            if let Err(e) = producer.submit(&self.spec).await {
                error!("Cron {} failed to submit {}: {}", self.name, self.spec.name, e);
            }
        }
    }

    /// Ask the timer to stop. Returns `false` if it was already asked.
    fn stop(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        debug!("Cron {} cancelled", self.name);
        true
    }

    /// Wait until the timer task has exited.
    async fn stopped(&self) {
        if self.started.load(Ordering::SeqCst) {
            self.finished.cancelled().await;
        }
    }

    fn info(&self) -> CronRegistrationInfo {
        CronRegistrationInfo {
            name: self.name.clone(),
            queue_name: self.spec.queue_name.clone(),
            job_name: self.spec.name.clone(),
            pattern: self.pattern.clone(),
            running: self.is_running(),
            next_fire: self.next_fire_time(),
            fire_count: self.fire_count(),
        }
    }
}

/// Outcome of a registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registered,
    Replaced,
    Removed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub name: String,
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// A registered cron job as reported to admin callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronRegistrationInfo {
    pub name: String,
    pub queue_name: String,
    pub job_name: String,
    pub pattern: String,
    pub running: bool,
    pub next_fire: Option<DateTime<Utc>>,
    pub fire_count: u64,
}

/// Owns the named cron timers.
pub struct CronManager {
    producer: Arc<FlowProducer>,
    timers: Mutex<HashMap<String, Arc<CronTimer>>>,
}

impl CronManager {
    pub fn new(producer: Arc<FlowProducer>) -> Self {
        Self {
            producer,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Register `spec` to be submitted on `pattern`, replacing any timer
    /// already registered as `name`.
    ///
    /// An invalid pattern or spec leaves the existing registration alone.
    pub async fn register(
        &self,
        name: &str,
        pattern: &str,
        spec: JobSpec,
    ) -> QueueResult<RegistrationResult> {
        let schedule = parse_schedule(pattern)?;
        spec.validate()?;
        let pattern = normalize_pattern(pattern);

        let mut replaced = false;
        loop {
            let timer = Arc::new(CronTimer::new(
                name,
                pattern.clone(),
                schedule.clone(),
                spec.clone(),
            ));
            match self.install(timer) {
                Ok(()) => break,
                Err(JobError::CronRegistrationConflict(_)) => {
                    let existing = self.timers.lock().remove(name);
                    if let Some(existing) = existing {
                        existing.stop();
                        existing.stopped().await;
                        replaced = true;
                        debug!("Cron {} stopped for replacement", name);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let status = if replaced {
            RegistrationStatus::Replaced
        } else {
            RegistrationStatus::Registered
        };
        info!(
            "Cron {} {} with pattern '{}' for {}",
            name,
            if replaced { "replaced" } else { "registered" },
            pattern,
            spec.name
        );

        Ok(RegistrationResult {
            name: name.to_string(),
            status,
            pattern: Some(pattern),
        })
    }

    fn install(&self, timer: Arc<CronTimer>) -> QueueResult<()> {
        let mut timers = self.timers.lock();
        if timers.contains_key(timer.name()) {
            return Err(JobError::CronRegistrationConflict(timer.name().to_string()));
        }
        timer.start(self.producer.clone());
        timers.insert(timer.name().to_string(), timer);
        Ok(())
    }

    /// Stop and remove a timer.
    pub async fn unregister(&self, name: &str) -> RegistrationResult {
        let existing = self.timers.lock().remove(name);
        let Some(timer) = existing else {
            return RegistrationResult {
                name: name.to_string(),
                status: RegistrationStatus::NotFound,
                pattern: None,
            };
        };

        timer.stop();
        timer.stopped().await;
        info!("Cron {} removed", name);

        RegistrationResult {
            name: name.to_string(),
            status: RegistrationStatus::Removed,
            pattern: Some(timer.pattern().to_string()),
        }
    }

    /// All registrations, sorted by name.
    pub fn list_all(&self) -> Vec<CronRegistrationInfo> {
        let mut infos: Vec<CronRegistrationInfo> =
            self.timers.lock().values().map(|t| t.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn get(&self, name: &str) -> Option<CronRegistrationInfo> {
        self.timers.lock().get(name).map(|t| t.info())
    }

    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every timer and wait for all of them to exit.
    pub async fn stop_all(&self) {
        let timers: Vec<Arc<CronTimer>> = self.timers.lock().drain().map(|(_, t)| t).collect();
        if timers.is_empty() {
            return;
        }

        for timer in &timers {
            timer.stop();
        }
        futures::future::join_all(timers.iter().map(|t| t.stopped())).await;
        info!("Stopped {} cron jobs", timers.len());
    }
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
