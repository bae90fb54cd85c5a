//! Configuration and job-file loaders.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::jobs::JobRecord;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        config.jobs.files = config
            .jobs
            .files
            .iter()
            .map(|p| PathBuf::from(Self::expand_path(&p.to_string_lossy())))
            .collect();
        config.logging.log_dir = config
            .logging
            .log_dir
            .map(|p| PathBuf::from(Self::expand_path(&p.to_string_lossy())));
        Ok(config)
    }

    /// Expand shell-style paths (e.g., `~/.config`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

/// Loader for JSON job files.
pub struct JobFileLoader;

impl JobFileLoader {
    /// Load all records from a job file.
    pub fn load(path: &Path) -> Result<Vec<JobRecord>, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Parse records from a JSON string. `${VAR}` references are expanded first.
    pub fn load_str(content: &str) -> Result<Vec<JobRecord>, ConfigError> {
        let expanded = expand_env_vars(content)?;
        let value: serde_json::Value = serde_json::from_str(&expanded)?;
        if !value.is_array() {
            return Err(ConfigError::InvalidFormat(
                "job file must contain a JSON array".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Load and concatenate several job files, in order.
    pub fn load_all(paths: &[PathBuf]) -> Result<Vec<JobRecord>, ConfigError> {
        let mut records = Vec::new();
        for path in paths {
            records.extend(Self::load(path)?);
        }
        Ok(records)
    }
}

/// Expand environment variables in the format `${VAR}`.
fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name)
            .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
