//! Flow producer.
//!
//! Validates a spec, applies the job-type hints carried in `data.type`,
//! builds the tree and submits it to the backend in one call.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::QueueResult;
use crate::flow::{FlowBuilder, IdSequence};
use crate::handles::QueueHandleCache;
use crate::job::{JobId, JobSpec};

/// Delay used by a `DELAYED` hint without `data.delay`, in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 10_000;

/// Resume delay used by a `PAUSED` hint without `data.resumeAfter`, in
/// milliseconds.
pub const DEFAULT_RESUME_AFTER_MS: u64 = 60_000;

/// Job-type hint read from `data.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTypeHint {
    Prioritized,
    Delayed,
    Paused,
    WaitingChildren,
}

impl JobTypeHint {
    pub fn from_data(data: &Value) -> Option<Self> {
        match data.get("type")?.as_str()? {
            "PRIORITIZED" => Some(Self::Prioritized),
            "DELAYED" => Some(Self::Delayed),
            "PAUSED" => Some(Self::Paused),
            "WAITING_CHILDREN" => Some(Self::WaitingChildren),
            _ => None,
        }
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedFlow {
    pub root_id: JobId,
    pub queue_name: String,
    /// Every id of the tree in submission order.
    pub job_ids: Vec<JobId>,
}

/// Submits job specs as whole trees.
pub struct FlowProducer {
    handles: Arc<QueueHandleCache>,
}

impl FlowProducer {
    pub fn new(handles: Arc<QueueHandleCache>) -> Self {
        Self { handles }
    }

    pub fn handles(&self) -> &Arc<QueueHandleCache> {
        &self.handles
    }

    /// Build and submit a spec.
    pub async fn submit(&self, spec: &JobSpec) -> QueueResult<SubmittedFlow> {
        spec.validate()?;

        let mut spec = spec.clone();
        if let Some(hint) = JobTypeHint::from_data(&spec.data) {
            self.apply_hint(hint, &mut spec).await?;
        }

        let (root, ids) = FlowBuilder::build_with(&spec, IdSequence::new())?;
        let job_ids = self.handles.backend().submit_tree(&root).await?;

        debug!(
            "Flow {} issued {} ids for {}",
            ids.flow_id(),
            ids.issued(),
            spec.name
        );
        info!(
            "Submitted {} to queue {} as {} ({} jobs)",
            spec.name,
            spec.queue_name,
            root.id,
            job_ids.len()
        );

        Ok(SubmittedFlow {
            root_id: root.id,
            queue_name: spec.queue_name,
            job_ids,
        })
    }

    async fn apply_hint(&self, hint: JobTypeHint, spec: &mut JobSpec) -> QueueResult<()> {
        match hint {
            JobTypeHint::Prioritized => {
                spec.options.priority = Some(1);
            }
            JobTypeHint::Delayed => {
                let delay = spec
                    .data
                    .get("delay")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_DELAY_MS);
                spec.options.delay = Some(delay);
            }
            JobTypeHint::Paused => {
                let wants_pause = spec
                    .data
                    .get("pauseQueue")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if wants_pause {
                    let after = spec
                        .data
                        .get("resumeAfter")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_RESUME_AFTER_MS);
                    let handle = self.handles.get(&spec.queue_name);
                    // Only the submission that paused the queue arms the resume.
                    if handle.pause().await? {
                        handle.schedule_resume(Duration::from_millis(after));
                    }
                }
            }
            JobTypeHint::WaitingChildren => {}
        }
        Ok(())
    }
}
