//! Job specifications, queue entries and job state.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use jobflow_config::JobRecord;

use crate::error::{JobError, QueueResult};

/// Backend-assigned job identifier.
pub type JobId = String;

/// Payload field under which the upstream result appears in
/// [`JobInput::merged_payload`].
pub const DEPENDENCY_RESULT_FIELD: &str = "previousResult";

/// Retry backoff, either a fixed delay in milliseconds or a typed policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Backoff {
    Fixed(u64),
    Policy {
        #[serde(rename = "type")]
        kind: String,
        delay: u64,
    },
}

impl Backoff {
    /// Delay in milliseconds before retry number `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Policy { kind, delay } if kind == "exponential" => {
                delay.saturating_mul(1u64 << attempt.saturating_sub(1).min(32))
            }
            Backoff::Policy { delay, .. } => *delay,
        }
    }
}

/// Options passed through to the queue backend.
///
/// Keys the core does not know about are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Delay before the job becomes available, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// Priority, 1 is the highest. 0 or absent means no priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    /// Total number of attempts including the first one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_complete: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A declared dependency on another job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub queue_name: String,
    pub job_id: JobId,
}

impl Dependency {
    pub fn new(queue_name: impl Into<String>, job_id: impl Into<JobId>) -> Self {
        Self {
            queue_name: queue_name.into(),
            job_id: job_id.into(),
        }
    }
}

/// A validated job specification, possibly with nested children.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub queue_name: String,
    /// `namespace.method`. The format is checked at dispatch time.
    pub name: String,
    pub data: Value,
    pub options: JobOptions,
    pub child_jobs: Vec<JobSpec>,
    pub cron_pattern: Option<String>,
    /// Chain each sibling group so every child waits on the one before it.
    pub enable_chain_results: bool,
    /// Make the first child of every sibling group wait on its parent.
    /// `None` turns this on for trees that do not chain their siblings.
    pub depend_on_parent: Option<bool>,
    /// Explicit dependencies on jobs outside the tree.
    pub depends_on: Vec<Dependency>,
}

impl JobSpec {
    /// Create a spec without children or options.
    pub fn new(queue_name: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        Self {
            queue_name: queue_name.into(),
            name: name.into(),
            data,
            options: JobOptions::default(),
            child_jobs: Vec::new(),
            cron_pattern: None,
            enable_chain_results: false,
            depend_on_parent: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a child. A child without a queue name inherits this spec's.
    pub fn with_child(mut self, mut child: JobSpec) -> Self {
        if child.queue_name.is_empty() {
            child.queue_name = self.queue_name.clone();
        }
        self.child_jobs.push(child);
        self
    }

    pub fn with_chain_results(mut self, enabled: bool) -> Self {
        self.enable_chain_results = enabled;
        self
    }

    pub fn with_depend_on_parent(mut self, enabled: bool) -> Self {
        self.depend_on_parent = Some(enabled);
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.depends_on.push(dependency);
        self
    }

    pub fn with_cron_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.cron_pattern = Some(pattern.into());
        self
    }

    /// Convert a job-file record, rejecting it if required fields are missing
    /// anywhere in the tree.
    pub fn from_record(record: &JobRecord) -> QueueResult<Self> {
        Self::from_record_at(record, None, "root")
    }

    fn from_record_at(
        record: &JobRecord,
        inherited_queue: Option<&str>,
        path: &str,
    ) -> QueueResult<Self> {
        let mut record = record.clone();
        if record.queue_name.is_none() {
            record.queue_name = inherited_queue.map(str::to_string);
        }

        let missing = record.missing_fields();
        if !missing.is_empty() {
            return Err(JobError::InvalidJobSpec(format!(
                "{}: missing {}",
                path,
                missing.join(", ")
            )));
        }

        let queue_name = record.queue_name.clone().unwrap_or_default();
        let name = record.job_name().unwrap_or_default();
        let data = record.data.clone().unwrap_or(Value::Null);
        let options = match &record.options {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                JobError::InvalidJobSpec(format!("{}: invalid options: {}", path, e))
            })?,
            None => JobOptions::default(),
        };

        let mut child_jobs = Vec::with_capacity(record.child_jobs.len());
        for (index, child) in record.child_jobs.iter().enumerate() {
            let child_path = format!("{}.childJobs[{}]", path, index);
            child_jobs.push(Self::from_record_at(child, Some(&queue_name), &child_path)?);
        }

        // Older job files put the chaining flag inside `data`.
        let chain_in_data = data
            .get("enableChainResults")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            queue_name,
            name,
            options,
            child_jobs,
            cron_pattern: record.cron_pattern().map(str::to_string),
            enable_chain_results: record.enable_chain_results || chain_in_data,
            depend_on_parent: record.depend_on_parent,
            depends_on: record
                .depends_on
                .iter()
                .map(|d| Dependency::new(&d.queue_name, &d.job_id))
                .collect(),
            data,
        })
    }

    /// Check required fields on this spec and every descendant.
    pub fn validate(&self) -> QueueResult<()> {
        self.validate_at("root")
    }

    fn validate_at(&self, path: &str) -> QueueResult<()> {
        let mut missing = Vec::new();
        if self.queue_name.is_empty() {
            missing.push("queueName");
        }
        if self.name.is_empty() {
            missing.push("name");
        }
        if self.data.is_null() {
            missing.push("data");
        }
        if !missing.is_empty() {
            return Err(JobError::InvalidJobSpec(format!(
                "{}: missing {}",
                path,
                missing.join(", ")
            )));
        }
        for (index, child) in self.child_jobs.iter().enumerate() {
            child.validate_at(&format!("{}.childJobs[{}]", path, index))?;
        }
        Ok(())
    }

    /// Whether child 0 of each sibling group waits on its parent.
    pub fn first_child_depends_on_parent(&self) -> bool {
        self.depend_on_parent.unwrap_or(!self.enable_chain_results)
    }

    /// Total number of specs in this tree.
    pub fn node_count(&self) -> usize {
        1 + self.child_jobs.iter().map(JobSpec::node_count).sum::<usize>()
    }
}

/// A submission-ready node of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryNode {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    pub queue_name: String,
    pub name: String,
    pub data: Value,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub children: Vec<QueueEntryNode>,
}

impl QueueEntryNode {
    /// Nodes in submission (pre-)order.
    pub fn iter(&self) -> Vec<&QueueEntryNode> {
        let mut nodes = Vec::new();
        self.collect(&mut nodes);
        nodes
    }

    fn collect<'a>(&'a self, nodes: &mut Vec<&'a QueueEntryNode>) {
        nodes.push(self);
        for child in &self.children {
            child.collect(nodes);
        }
    }

    /// Ids in submission order.
    pub fn ids(&self) -> Vec<JobId> {
        self.iter().into_iter().map(|n| n.id.clone()).collect()
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(QueueEntryNode::node_count).sum::<usize>()
    }

    /// Find a node anywhere in the tree.
    pub fn find(&self, id: &str) -> Option<&QueueEntryNode> {
        self.iter().into_iter().find(|n| n.id == id)
    }
}

/// Job state as seen by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    WaitingOnDependency,
    Completed,
    Failed,
}

impl JobState {
    /// `completed` and `failed` end a job's life.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::WaitingOnDependency => "waiting-on-dependency",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a job held by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: JobId,
    pub queue_name: String,
    pub name: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub attempts_made: u32,
}

/// A job handed to a worker by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredJob {
    pub id: JobId,
    pub parent_id: Option<JobId>,
    pub queue_name: String,
    pub name: String,
    pub data: Value,
    pub options: JobOptions,
    pub dependencies: Vec<Dependency>,
    /// Attempts including the current one.
    pub attempts_made: u32,
}

/// A parsed `namespace.method` job name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobName {
    namespace: String,
    method: String,
}

impl JobName {
    /// Split on the single `.` separator. Both halves must be non-empty.
    pub fn parse(name: &str) -> QueueResult<Self> {
        let mut parts = name.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(method), None) if !namespace.is_empty() && !method.is_empty() => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    method: method.to_string(),
                })
            }
            _ => Err(JobError::InvalidJobName(name.to_string())),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.method)
    }
}

/// What a handler receives.
///
/// `data` is the payload exactly as submitted; the upstream result travels
/// separately in `previous_result`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    pub job_id: JobId,
    pub queue_name: String,
    pub data: Value,
    pub previous_result: Option<Value>,
    pub attempts_made: u32,
}

impl JobInput {
    /// A copy of the payload with the upstream result under
    /// [`DEPENDENCY_RESULT_FIELD`]. Non-object payloads are wrapped as
    /// `{"payload": <data>}` first.
    pub fn merged_payload(&self) -> Value {
        let Some(previous) = &self.previous_result else {
            return self.data.clone();
        };
        let mut object = match &self.data {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        object.insert(DEPENDENCY_RESULT_FIELD.to_string(), previous.clone());
        Value::Object(object)
    }
}

/// Per-queue job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
    /// Jobs held back by an unfinished dependency.
    pub waiting_children: u64,
    /// Waiting jobs that carry an explicit priority.
    pub prioritized: u64,
}

/// Queue status as reported to admin callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub name: String,
    pub counts: QueueCounts,
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
