//! Demo handlers registered by the binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use jobflow_queue::{HandlerRegistry, JobHandler, JobInput, QueueResult};

const POST_OPERATIONS: [&str; 10] = [
    "latest",
    "active",
    "waiting",
    "parent",
    "priority",
    "completed",
    "failed",
    "delayed",
    "pausedQueue",
    "notify",
];

/// Handler for the `Post` namespace.
///
/// Each operation logs the job and echoes what it received, so flows can be
/// followed in the log.
pub(crate) struct PostHandler;

impl PostHandler {
    fn receipt(operation: &str, input: &JobInput) -> Value {
        json!({
            "operation": operation,
            "jobId": input.job_id,
            "queueName": input.queue_name,
            "attempt": input.attempts_made,
            "handledAt": Utc::now().to_rfc3339(),
        })
    }
}

#[async_trait]
impl JobHandler for PostHandler {
    fn namespace(&self) -> &str {
        "Post"
    }

    fn operations(&self) -> Vec<String> {
        POST_OPERATIONS.iter().map(|op| op.to_string()).collect()
    }

    async fn invoke(&self, method: &str, input: JobInput) -> anyhow::Result<Value> {
        info!("Post.{} running job {}", method, input.job_id);

        match method {
            "failed" => {
                let should_fail = input
                    .data
                    .get("shouldFail")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if should_fail {
                    anyhow::bail!("Job failed intentionally");
                }
                Ok(Self::receipt(method, &input))
            }
            "active" => {
                // Stay active long enough to show up in queue counts.
                let millis = input.data.get("durationMs").and_then(Value::as_u64).unwrap_or(1000);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(Self::receipt(method, &input))
            }
            "completed" | "notify" => {
                if let Some(previous) = &input.previous_result {
                    info!("Post.{} got upstream result {}", method, previous);
                }
                let mut receipt = Self::receipt(method, &input);
                receipt["payload"] = input.merged_payload();
                Ok(receipt)
            }
            _ => {
                let mut receipt = Self::receipt(method, &input);
                receipt["payload"] = input.data.clone();
                Ok(receipt)
            }
        }
    }
}

/// Register every demo handler.
pub(crate) fn register_handlers(registry: &HandlerRegistry) -> QueueResult<()> {
    registry.register(Arc::new(PostHandler))?;
    info!("Registered handlers: {:?}", registry.namespaces());
    Ok(())
}
