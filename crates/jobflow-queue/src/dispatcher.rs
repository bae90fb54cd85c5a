//! Dynamic dispatch of delivered jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{JobError, QueueResult};
use crate::handles::QueueHandleCache;
use crate::job::{DeliveredJob, JobInput, JobName};
use crate::registry::{HandlerRegistry, JobHandler};
use crate::waiter::DependencyWaiter;

/// A job whose handler is resolved and whose dependency, if any, has
/// delivered its result. Only the handler call is left.
pub struct PreparedJob {
    handler: Arc<dyn JobHandler>,
    name: JobName,
    job_name: String,
    input: JobInput,
}

impl PreparedJob {
    pub fn job_id(&self) -> &str {
        &self.input.job_id
    }
}

/// Resolves a job's `namespace.method` name and runs it.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    waiter: Arc<DependencyWaiter>,
    handles: Arc<QueueHandleCache>,
    dependency_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        waiter: Arc<DependencyWaiter>,
        handles: Arc<QueueHandleCache>,
        dependency_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            waiter,
            handles,
            dependency_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Run one delivered job: [`prepare`](Self::prepare) then [`run`](Self::run).
    pub async fn dispatch(&self, job: &DeliveredJob) -> QueueResult<Value> {
        let prepared = self.prepare(job).await?;
        self.run(prepared).await
    }

    /// Resolve the handler and wait for the job's dependency.
    ///
    /// When the job declares dependencies, only the first one is awaited and
    /// its result is passed to the handler. A failed or timed-out dependency
    /// fails this job without calling the handler.
    pub async fn prepare(&self, job: &DeliveredJob) -> QueueResult<PreparedJob> {
        let name = JobName::parse(&job.name)?;
        let handler = self.registry.resolve_operation(&name)?;

        let previous_result = match job.dependencies.first() {
            Some(dependency) => {
                let handle = self.handles.get(&job.queue_name);
                handle.mark_waiting_on_dependency(&job.id).await?;

                let value = self
                    .waiter
                    .wait(dependency, self.dependency_timeout)
                    .await
                    .inspect_err(|e| warn!("Job {} not run: {}", job.id, e))?;

                handle.mark_active(&job.id).await?;
                Some(value)
            }
            None => None,
        };

        Ok(PreparedJob {
            handler,
            name,
            job_name: job.name.clone(),
            input: JobInput {
                job_id: job.id.clone(),
                queue_name: job.queue_name.clone(),
                data: job.data.clone(),
                previous_result,
                attempts_made: job.attempts_made,
            },
        })
    }

    /// Call the handler. A panic inside it is reported as a handler error.
    pub async fn run(&self, job: PreparedJob) -> QueueResult<Value> {
        let PreparedJob {
            handler,
            name,
            job_name,
            input,
        } = job;
        let job_id = input.job_id.clone();

        debug!("Dispatching job {} to {}", job_id, name);

        match AssertUnwindSafe(handler.invoke(name.method(), input))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(|e| JobError::HandlerException {
                name: job_name,
                message: format!("{:#}", e),
            }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Handler for job {} panicked: {}", job_id, message);
                Err(JobError::HandlerException {
                    name: job_name,
                    message: format!("handler panicked: {}", message),
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
