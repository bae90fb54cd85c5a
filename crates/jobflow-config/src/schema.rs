//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queues: QueuesConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Queue worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    /// Queues that get a worker at startup.
    #[serde(default = "default_queue_names")]
    pub names: Vec<String>,

    /// Maximum jobs dispatched concurrently per queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Upper bound on how long an idle worker sleeps before looking again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a job may wait on its upstream dependency.
    #[serde(default = "default_dependency_timeout_secs")]
    pub dependency_timeout_secs: u64,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            names: default_queue_names(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            dependency_timeout_secs: default_dependency_timeout_secs(),
        }
    }
}

fn default_queue_names() -> Vec<String> {
    vec!["posts".to_string(), "email".to_string()]
}

fn default_concurrency() -> u32 {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_dependency_timeout_secs() -> u64 {
    300
}

/// Job files loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write a daily-rotated log file in addition to the console.
    #[serde(default)]
    pub file_enabled: bool,

    /// Directory for log files. Defaults to `./logs`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_enabled: false,
            log_dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// Resolved log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs"))
    }
}
