//! # jobflow Config
//!
//! Runtime configuration (TOML) and job-file records (JSON) for jobflow.

mod error;
mod jobs;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use jobs::{DependencyRecord, JobNameField, JobRecord};
pub use loader::{ConfigLoader, JobFileLoader};
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
