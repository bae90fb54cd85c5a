//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::jobs::JobRecord;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Fold another result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the runtime configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_queues(config, &mut result);
        Self::validate_jobs(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    /// Validate job-file records.
    ///
    /// Records with missing required fields are reported as warnings: the
    /// runtime skips them and keeps loading the rest.
    pub fn validate_records(records: &[JobRecord]) -> ValidationResult {
        let mut result = ValidationResult::default();
        let mut cron_names = HashSet::new();

        for (index, record) in records.iter().enumerate() {
            let path = format!("jobs[{}]", index);
            Self::validate_record(record, &path, &mut result);

            if record.cron_pattern().is_some() {
                if let Some(name) = record.job_name() {
                    if !cron_names.insert(name.clone()) {
                        result.add_warning(ValidationWarning::new(
                            path.clone(),
                            format!(
                                "cron job '{}' is declared more than once; the last entry wins",
                                name
                            ),
                        ));
                    }
                }
            }
        }

        result
    }

    fn validate_record(record: &JobRecord, path: &str, result: &mut ValidationResult) {
        let missing = record.missing_fields();
        if !missing.is_empty() {
            result.add_warning(ValidationWarning::new(
                path,
                format!("missing {}; entry will be skipped", missing.join(", ")),
            ));
        }

        if let Some(name) = record.job_name() {
            if name.split('.').count() != 2 {
                result.add_warning(ValidationWarning::new(
                    format!("{}.name", path),
                    format!("'{}' is not in namespace.method form", name),
                ));
            }
        }

        if record.cron_pattern.is_some() && record.cron_pattern().is_none() {
            result.add_warning(ValidationWarning::new(
                format!("{}.cronPattern", path),
                "cron pattern is empty; the job will be submitted once",
            ));
        }

        if let Some(options) = &record.options {
            if !options.is_object() {
                result.add_error(ValidationError::new(
                    format!("{}.options", path),
                    "options must be an object",
                ));
            }
        }

        for (index, child) in record.child_jobs.iter().enumerate() {
            if child.cron_pattern().is_some() {
                result.add_warning(ValidationWarning::new(
                    format!("{}.childJobs[{}].cronPattern", path, index),
                    "cron patterns on child jobs are ignored",
                ));
            }
            let child_path = format!("{}.childJobs[{}]", path, index);
            // Children inherit the parent's queue.
            if child.queue_name.is_none() && record.queue_name.is_some() {
                let mut inherited = child.clone();
                inherited.queue_name = record.queue_name.clone();
                Self::validate_record(&inherited, &child_path, result);
            } else {
                Self::validate_record(child, &child_path, result);
            }
        }
    }

    fn validate_queues(config: &Config, result: &mut ValidationResult) {
        if config.queues.names.is_empty() {
            result.add_warning(ValidationWarning::new(
                "queues.names",
                "no queues configured, no workers will be started",
            ));
        }

        let mut seen = HashSet::new();
        for name in &config.queues.names {
            if name.trim().is_empty() {
                result.add_error(ValidationError::new(
                    "queues.names",
                    "queue name cannot be empty",
                ));
            } else if !seen.insert(name) {
                result.add_error(ValidationError::new(
                    "queues.names",
                    format!("queue '{}' is listed more than once", name),
                ));
            }
        }

        if config.queues.concurrency == 0 {
            result.add_error(ValidationError::new(
                "queues.concurrency",
                "concurrency must be greater than 0",
            ));
        }

        if config.queues.concurrency > 256 {
            result.add_warning(ValidationWarning::new(
                "queues.concurrency",
                "concurrency is very high (>256)",
            ));
        }

        if config.queues.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "queues.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }

        if config.queues.dependency_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "queues.dependency_timeout_secs",
                "dependency_timeout_secs must be greater than 0",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        for path in &config.jobs.files {
            if !path.exists() {
                result.add_warning(ValidationWarning::new(
                    "jobs.files",
                    format!("job file does not exist: {:?}", path),
                ));
            }
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_lowercase();
        // Full filter directives ("jobflow=debug,info") are passed through untouched.
        if !level.contains('=') && !level.contains(',') && !LOG_LEVELS.contains(&level.as_str()) {
            result.add_error(ValidationError::new(
                "logging.level",
                format!("unknown log level '{}', valid values: {:?}", level, LOG_LEVELS),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
