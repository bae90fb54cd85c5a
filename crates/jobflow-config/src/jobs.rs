//! Job-file records.
//!
//! A job file is a JSON array of records. Every field is optional at this
//! layer so that a malformed record can be reported and skipped instead of
//! failing the whole file.

use serde::{Deserialize, Serialize};

/// A job name, either already joined (`"Post.latest"`) or split into its
/// service and function parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobNameField {
    Joined(String),
    Parts {
        #[serde(rename = "serviceName")]
        service_name: String,
        #[serde(rename = "functionName")]
        function_name: String,
    },
}

impl JobNameField {
    /// The `service.function` form of the name.
    pub fn joined(&self) -> String {
        match self {
            JobNameField::Joined(name) => name.clone(),
            JobNameField::Parts {
                service_name,
                function_name,
            } => format!("{}.{}", service_name, function_name),
        }
    }
}

/// An explicit dependency on a job outside the submitted tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRecord {
    pub queue_name: String,
    pub job_id: String,
}

/// One job-file entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(default)]
    pub queue_name: Option<String>,

    #[serde(default)]
    pub name: Option<JobNameField>,

    #[serde(default)]
    pub data: Option<serde_json::Value>,

    #[serde(default)]
    pub options: Option<serde_json::Value>,

    #[serde(default, alias = "children")]
    pub child_jobs: Vec<JobRecord>,

    #[serde(default)]
    pub cron_pattern: Option<String>,

    #[serde(default)]
    pub enable_chain_results: bool,

    /// Absent means "on unless the tree chains its siblings".
    #[serde(default)]
    pub depend_on_parent: Option<bool>,

    #[serde(default)]
    pub depends_on: Vec<DependencyRecord>,
}

impl JobRecord {
    /// Joined job name, if present.
    pub fn job_name(&self) -> Option<String> {
        self.name.as_ref().map(JobNameField::joined)
    }

    /// The recurrence pattern, if one is set. A blank pattern counts as none.
    pub fn cron_pattern(&self) -> Option<&str> {
        self.cron_pattern
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Names of the required fields this record lacks.
    ///
    /// `data: null` counts as missing.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.queue_name.as_deref().map_or(true, str::is_empty) {
            missing.push("queueName");
        }
        if self.job_name().map_or(true, |n| n.is_empty()) {
            missing.push("name");
        }
        if self.data.as_ref().map_or(true, serde_json::Value::is_null) {
            missing.push("data");
        }
        missing
    }

    /// Total number of records in this subtree, including itself.
    pub fn node_count(&self) -> usize {
        1 + self.child_jobs.iter().map(JobRecord::node_count).sum::<usize>()
    }
}
