//! CLI definitions for jobflow.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// jobflow CLI.
#[derive(Parser)]
#[command(name = "jobflow")]
#[command(about = "Job flows with dependency hand-off and cron scheduling")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/jobflow.toml", global = true, env = "JOBFLOW_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start workers, load job files and run until Ctrl-C (default)
    Run {
        /// Queues to work on (defaults to the configured queues)
        #[arg(short, long = "queue")]
        queues: Vec<String>,

        /// Load the job files but do not start workers
        #[arg(long)]
        no_workers: bool,
    },

    /// Validate the configuration and job files
    Validate,
}
