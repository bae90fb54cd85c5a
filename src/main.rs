//! jobflow - job flows with dependency hand-off and cron scheduling
//!
//! Main entry point for the jobflow CLI.

mod cli;
mod handlers;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use jobflow_config::{
    Config, ConfigError, ConfigLoader, ConfigValidator, JobFileLoader, JobRecord, LoggingConfig,
    ValidationResult,
};
use jobflow_queue::{HandlerRegistry, JobRuntime, MemoryBackend, RuntimeOptions};

use cli::{Cli, Commands};

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = if logging.file_enabled {
        let log_dir = logging.log_dir();
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("jobflow")
            .filename_suffix("log")
            .max_log_files(14)
            .build(&log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The guard flushes buffered lines on drop; keep it for the whole run.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(file_layer)
        .init();

    Ok(())
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<(Config, bool), ConfigError> {
    match ConfigLoader::load(path) {
        Ok(config) => Ok((config, true)),
        Err(ConfigError::NotFound(_)) => Ok((Config::default(), false)),
        Err(e) => Err(e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, found) = load_config(&cli.config)?;
    init_tracing(&config.logging)?;
    if !found {
        warn!("Config file {} not found, using defaults", cli.config.display());
    }

    match cli.command {
        None => run(config, Vec::new(), false).await,
        Some(Commands::Run { queues, no_workers }) => run(config, queues, no_workers).await,
        Some(Commands::Validate) => validate(&config),
    }
}

/// Run workers and cron jobs until Ctrl-C.
async fn run(
    config: Config,
    queues: Vec<String>,
    no_workers: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting jobflow v{}", env!("CARGO_PKG_VERSION"));

    let validation = ConfigValidator::validate(&config)?;
    report_validation(&validation);
    if !validation.is_valid() {
        return Err("invalid configuration".into());
    }

    let registry = Arc::new(HandlerRegistry::new());
    handlers::register_handlers(&registry)?;

    let runtime = JobRuntime::new(
        Arc::new(MemoryBackend::new()),
        registry,
        RuntimeOptions::from(&config.queues),
    );

    if !no_workers {
        let queues = if queues.is_empty() {
            config.queues.names.clone()
        } else {
            queues
        };
        let started = runtime.start_workers(&queues);
        info!("Started {} workers for {:?}", started, queues);
    }

    let records = load_records(&config);
    report_validation(&ConfigValidator::validate_records(&records));
    runtime.load_jobs(&records).await;

    for cron in runtime.list_crons() {
        info!(
            "Cron {} -> {} on {} ({}), next at {:?}",
            cron.name, cron.job_name, cron.queue_name, cron.pattern, cron.next_fire
        );
    }

    info!("jobflow running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutdown signal received");
    for (queue, stats) in runtime.worker_stats() {
        info!(
            "Queue {}: {} processed, {} failed, {} retried",
            queue,
            stats.processed(),
            stats.failed(),
            stats.retried()
        );
    }
    runtime.shutdown().await?;

    Ok(())
}

/// Read every configured job file. A file that cannot be read is logged and
/// skipped so the others still load.
fn load_records(config: &Config) -> Vec<JobRecord> {
    let mut records = Vec::new();
    for path in &config.jobs.files {
        match JobFileLoader::load(path) {
            Ok(mut loaded) => {
                info!("Loaded {} job entries from {}", loaded.len(), path.display());
                records.append(&mut loaded);
            }
            Err(e) => error!("Failed to load job file {}: {}", path.display(), e),
        }
    }
    records
}

/// Validate the config and job files and print the findings.
fn validate(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut result = ConfigValidator::validate(config)?;

    for path in &config.jobs.files {
        match JobFileLoader::load(path) {
            Ok(records) => {
                println!("{}: {} entries", path.display(), records.len());
                result.merge(ConfigValidator::validate_records(&records));
            }
            Err(e) => println!("{}: {}", path.display(), e),
        }
    }

    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }

    if result.is_valid() {
        println!("Configuration is valid");
        Ok(())
    } else {
        Err(format!("{} validation errors", result.errors.len()).into())
    }
}

fn report_validation(result: &ValidationResult) {
    for warning in &result.warnings {
        warn!("{}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        error!("{}: {}", error.path, error.message);
    }
}
