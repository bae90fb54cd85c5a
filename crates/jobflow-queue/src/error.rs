//! Job errors.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while building, submitting, dispatching or scheduling jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// A job spec lacks a required field or has broken dependency wiring.
    #[error("Invalid job spec: {0}")]
    InvalidJobSpec(String),

    /// A job name is not of the form `namespace.method`.
    #[error("Invalid job name '{0}': expected namespace.method")]
    InvalidJobName(String),

    /// No handler is registered for the namespace.
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    /// The handler exists but does not offer the method.
    #[error("Unknown method '{method}' on handler '{namespace}'")]
    UnknownMethod { namespace: String, method: String },

    /// The upstream job did not finish in time.
    #[error("Timed out after {timeout:?} waiting for job {job_id} in queue {queue_name}")]
    DependencyTimeout {
        queue_name: String,
        job_id: String,
        timeout: Duration,
    },

    /// The upstream job failed or does not exist.
    #[error("Dependency {job_id} in queue {queue_name} failed: {reason}")]
    DependencyFailed {
        queue_name: String,
        job_id: String,
        reason: String,
    },

    /// The handler itself returned an error.
    #[error("Handler {name} failed: {message}")]
    HandlerException { name: String, message: String },

    /// A cron name is already taken. Resolved internally by replacing the
    /// existing timer.
    #[error("Cron job '{0}' is already registered")]
    CronRegistrationConflict(String),

    /// The recurrence expression does not parse.
    #[error("Invalid cron pattern '{pattern}': {message}")]
    InvalidCronPattern { pattern: String, message: String },

    /// A handler namespace is registered twice.
    #[error("Handler already registered: {0}")]
    AlreadyRegistered(String),

    /// The queue backend rejected an operation.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl JobError {
    /// Stable name of the error kind, used in failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InvalidJobSpec(_) => "InvalidJobSpec",
            JobError::InvalidJobName(_) => "InvalidJobName",
            JobError::UnknownHandler(_) => "UnknownHandler",
            JobError::UnknownMethod { .. } => "UnknownMethod",
            JobError::DependencyTimeout { .. } => "DependencyTimeout",
            JobError::DependencyFailed { .. } => "DependencyFailed",
            JobError::HandlerException { .. } => "HandlerException",
            JobError::CronRegistrationConflict(_) => "CronRegistrationConflict",
            JobError::InvalidCronPattern { .. } => "InvalidCronPattern",
            JobError::AlreadyRegistered(_) => "AlreadyRegistered",
            JobError::Backend(_) => "Backend",
        }
    }

    /// `"<kind>: <message>"`, the form recorded as a job's failure reason.
    pub fn failure_reason(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Result type for job operations.
pub type QueueResult<T> = Result<T, JobError>;
