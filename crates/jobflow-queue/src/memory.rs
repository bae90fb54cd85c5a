//! In-process queue backend.
//!
//! Keeps every job in one map behind a single mutex. Not durable. Honours
//! the [`QueueBackend`] contract closely enough to run flows end to end in a
//! single process and in tests.
//!
//! Finished jobs are dropped once nothing unfinished depends on them: at once
//! for completed jobs with `removeOnComplete`, and oldest first for the rest
//! when their number passes the retention limit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::{FailOutcome, QueueBackend};
use crate::error::{JobError, QueueResult};
use crate::job::{
    DeliveredJob, Dependency, JobId, JobOptions, JobResult, JobState, QueueCounts, QueueEntryNode,
};

struct StoredJob {
    seq: u64,
    /// Id of the root of the tree this job was submitted with.
    tree_id: JobId,
    parent_id: Option<JobId>,
    queue_name: String,
    name: String,
    data: Value,
    options: JobOptions,
    dependencies: Vec<Dependency>,
    state: JobState,
    ready_at: Option<Instant>,
    return_value: Option<Value>,
    failure_reason: Option<String>,
    attempts_made: u32,
    state_tx: watch::Sender<JobState>,
}

impl StoredJob {
    fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn priority_rank(&self) -> u32 {
        match self.options.priority {
            Some(p) if p > 0 => p,
            _ => u32::MAX,
        }
    }

    fn snapshot(&self, job_id: &str) -> JobResult {
        JobResult {
            job_id: job_id.to_string(),
            queue_name: self.queue_name.clone(),
            name: self.name.clone(),
            state: self.state,
            return_value: self.return_value.clone(),
            failure_reason: self.failure_reason.clone(),
            attempts_made: self.attempts_made,
        }
    }
}

/// Terminal jobs kept by [`MemoryBackend::new`].
pub const DEFAULT_TERMINAL_RETENTION: usize = 10_000;

struct State {
    jobs: HashMap<JobId, StoredJob>,
    paused: HashSet<String>,
    signals: HashMap<String, Arc<Notify>>,
    next_seq: u64,
    retention: usize,
}

impl State {
    fn new(retention: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            paused: HashSet::new(),
            signals: HashMap::new(),
            next_seq: 0,
            retention,
        }
    }

    /// Drop finished jobs that are no longer needed.
    fn sweep(&mut self) {
        let needed: HashSet<JobId> = self
            .jobs
            .values()
            .filter(|job| !job.state.is_terminal())
            .flat_map(|job| job.dependencies.iter().map(|dep| dep.job_id.clone()))
            .collect();

        let before = self.jobs.len();
        self.jobs.retain(|id, job| {
            needed.contains(id)
                || !(job.state == JobState::Completed && job.options.remove_on_complete == Some(true))
        });

        let mut finished: Vec<(u64, JobId)> = self
            .jobs
            .iter()
            .filter(|(id, job)| job.state.is_terminal() && !needed.contains(*id))
            .map(|(id, job)| (job.seq, id.clone()))
            .collect();
        if finished.len() > self.retention {
            finished.sort_unstable();
            let excess = finished.len() - self.retention;
            for (_, id) in finished.into_iter().take(excess) {
                self.jobs.remove(&id);
            }
        }

        let removed = before - self.jobs.len();
        if removed > 0 {
            debug!("Dropped {} finished jobs", removed);
        }
    }

    /// Move delayed jobs whose time has come to `waiting`.
    fn promote_due(&mut self, now: Instant) {
        for job in self.jobs.values_mut() {
            if job.state == JobState::Delayed && job.ready_at.is_none_or(|at| at <= now) {
                job.ready_at = None;
                job.set_state(JobState::Waiting);
            }
        }
    }

    /// Whether an in-tree dependency of `job` is still unfinished.
    fn blocked(&self, job: &StoredJob) -> bool {
        job.dependencies.iter().any(|dep| {
            self.jobs
                .get(&dep.job_id)
                .is_some_and(|upstream| upstream.tree_id == job.tree_id && !upstream.state.is_terminal())
        })
    }

    fn signal(&mut self, queue_name: &str) -> Arc<Notify> {
        self.signals
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn wake(&mut self, queue_name: &str) {
        self.signal(queue_name).notify_one();
    }

    fn wake_all(&self) {
        for signal in self.signals.values() {
            signal.notify_one();
        }
    }

    fn job_mut(&mut self, queue_name: &str, job_id: &str) -> QueueResult<&mut StoredJob> {
        match self.jobs.get_mut(job_id) {
            Some(job) if job.queue_name == queue_name => Ok(job),
            _ => Err(JobError::Backend(format!(
                "job {} not found in queue {}",
                job_id, queue_name
            ))),
        }
    }
}

/// A [`QueueBackend`] that lives in process memory.
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_TERMINAL_RETENTION)
    }

    /// Keep at most `limit` finished jobs that nothing still depends on.
    pub fn with_retention(limit: usize) -> Self {
        Self {
            state: Mutex::new(State::new(limit)),
        }
    }

    /// Total number of jobs held, across all queues.
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn submit_tree(&self, root: &QueueEntryNode) -> QueueResult<Vec<JobId>> {
        let nodes = root.iter();
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(existing) = nodes.iter().find(|n| state.jobs.contains_key(&n.id)) {
            return Err(JobError::Backend(format!(
                "job {} already exists",
                existing.id
            )));
        }

        let mut ids = Vec::with_capacity(nodes.len());
        let mut queues = HashSet::new();
        for node in nodes {
            let delay = node.options.delay.unwrap_or(0);
            let (job_state, ready_at) = if delay > 0 {
                (JobState::Delayed, Some(now + Duration::from_millis(delay)))
            } else {
                (JobState::Waiting, None)
            };

            let seq = state.next_seq;
            state.next_seq += 1;
            let (state_tx, _) = watch::channel(job_state);

            state.jobs.insert(
                node.id.clone(),
                StoredJob {
                    seq,
                    tree_id: root.id.clone(),
                    parent_id: node.parent_id.clone(),
                    queue_name: node.queue_name.clone(),
                    name: node.name.clone(),
                    data: node.data.clone(),
                    options: node.options.clone(),
                    dependencies: node.dependencies.clone(),
                    state: job_state,
                    ready_at,
                    return_value: None,
                    failure_reason: None,
                    attempts_made: 0,
                    state_tx,
                },
            );
            ids.push(node.id.clone());
            queues.insert(node.queue_name.clone());
        }

        for queue in &queues {
            state.wake(queue);
        }

        debug!("Stored tree {} with {} jobs", root.id, ids.len());
        Ok(ids)
    }

    async fn get_job(&self, queue_name: &str, job_id: &str) -> QueueResult<Option<JobResult>> {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        Ok(state
            .jobs
            .get(job_id)
            .filter(|job| job.queue_name == queue_name)
            .map(|job| job.snapshot(job_id)))
    }

    async fn watch(
        &self,
        queue_name: &str,
        job_id: &str,
    ) -> QueueResult<Option<watch::Receiver<JobState>>> {
        let state = self.state.lock();
        Ok(state
            .jobs
            .get(job_id)
            .filter(|job| job.queue_name == queue_name)
            .map(|job| job.state_tx.subscribe()))
    }

    async fn pause(&self, queue_name: &str) -> QueueResult<()> {
        self.state.lock().paused.insert(queue_name.to_string());
        Ok(())
    }

    async fn resume(&self, queue_name: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        if state.paused.remove(queue_name) {
            state.wake(queue_name);
        }
        Ok(())
    }

    async fn is_paused(&self, queue_name: &str) -> QueueResult<bool> {
        Ok(self.state.lock().paused.contains(queue_name))
    }

    async fn counts(&self, queue_name: &str) -> QueueResult<QueueCounts> {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());

        let mut counts = QueueCounts {
            paused: state.paused.contains(queue_name),
            ..QueueCounts::default()
        };
        for job in state.jobs.values().filter(|j| j.queue_name == queue_name) {
            match job.state {
                JobState::Waiting if state.blocked(job) => counts.waiting_children += 1,
                JobState::Waiting => {
                    counts.waiting += 1;
                    if job.options.priority.is_some_and(|p| p > 0) {
                        counts.prioritized += 1;
                    }
                }
                JobState::WaitingOnDependency => counts.waiting_children += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn next_ready(&self, queue_name: &str) -> QueueResult<Option<DeliveredJob>> {
        let mut state = self.state.lock();
        if state.paused.contains(queue_name) {
            return Ok(None);
        }
        state.promote_due(Instant::now());

        let next = state
            .jobs
            .iter()
            .filter(|(_, job)| {
                job.queue_name == queue_name && job.state == JobState::Waiting && !state.blocked(job)
            })
            .min_by_key(|(_, job)| (job.priority_rank(), job.seq))
            .map(|(id, _)| id.clone());

        let Some(job_id) = next else {
            return Ok(None);
        };
        let job = state.job_mut(queue_name, &job_id)?;
        job.attempts_made += 1;
        job.set_state(JobState::Active);

        Ok(Some(DeliveredJob {
            id: job_id,
            parent_id: job.parent_id.clone(),
            queue_name: job.queue_name.clone(),
            name: job.name.clone(),
            data: job.data.clone(),
            options: job.options.clone(),
            dependencies: job.dependencies.clone(),
            attempts_made: job.attempts_made,
        }))
    }

    async fn mark_waiting_on_dependency(&self, queue_name: &str, job_id: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        let job = state.job_mut(queue_name, job_id)?;
        if job.state == JobState::Active {
            job.set_state(JobState::WaitingOnDependency);
        }
        Ok(())
    }

    async fn mark_active(&self, queue_name: &str, job_id: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        let job = state.job_mut(queue_name, job_id)?;
        if job.state == JobState::WaitingOnDependency {
            job.set_state(JobState::Active);
        }
        Ok(())
    }

    async fn complete(&self, queue_name: &str, job_id: &str, value: Value) -> QueueResult<()> {
        let mut state = self.state.lock();
        let job = state.job_mut(queue_name, job_id)?;
        if job.state.is_terminal() {
            warn!("Job {} already {}, ignoring completion", job_id, job.state);
            return Ok(());
        }
        job.return_value = Some(value);
        job.failure_reason = None;
        job.set_state(JobState::Completed);

        state.sweep();
        state.wake_all();
        Ok(())
    }

    async fn fail(&self, queue_name: &str, job_id: &str, reason: &str) -> QueueResult<FailOutcome> {
        let mut state = self.state.lock();
        let job = state.job_mut(queue_name, job_id)?;
        if job.state.is_terminal() {
            warn!("Job {} already {}, ignoring failure", job_id, job.state);
            return Ok(FailOutcome::Failed);
        }

        let allowed = job.options.attempts.unwrap_or(1).max(1);
        let outcome = if job.attempts_made < allowed {
            let delay = job
                .options
                .backoff
                .as_ref()
                .map_or(0, |b| b.delay_ms(job.attempts_made));
            if delay > 0 {
                job.ready_at = Some(Instant::now() + Duration::from_millis(delay));
                job.set_state(JobState::Delayed);
            } else {
                job.set_state(JobState::Waiting);
            }
            FailOutcome::Retrying {
                attempt: job.attempts_made + 1,
            }
        } else {
            job.failure_reason = Some(reason.to_string());
            job.set_state(JobState::Failed);
            FailOutcome::Failed
        };

        if outcome == FailOutcome::Failed {
            state.sweep();
        }
        state.wake_all();
        Ok(outcome)
    }

    fn ready_signal(&self, queue_name: &str) -> Option<Arc<Notify>> {
        Some(self.state.lock().signal(queue_name))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
