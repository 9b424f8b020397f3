//! floe: incremental NDJSON ingestion with additive schema evolution.
//!
//! Watches a source directory (local, S3, GCS or Azure), infers and evolves
//! the table schema, and appends each new file exactly once using
//! checkpoint-gated commits.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use floe::config::Config;
use floe::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use floe::metrics;
use floe::pipeline::run_pipeline;

/// Incremental NDJSON ingestion into an append-only table.
#[derive(Parser, Debug)]
#[command(name = "floe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Clear checkpoint and schema state and drop the table before starting.
    #[arg(long)]
    reset: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("floe starting");

    let config = build_config(&args)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Table: {} at {}", config.table.name, config.table.path);
        info!("Source: {}", config.source.path);
        info!("Checkpoint: {}", config.checkpoint.path);
        info!("Schema: {}", config.schema.path);
        let hints = config.schema_hints().context(ConfigSnafu)?;
        for (name, column_type) in hints.iter() {
            info!("  - hint {}: {}", name, column_type);
        }
        info!(
            "Trigger: every {}s{}",
            config.trigger.interval_secs,
            if config.trigger.available_now {
                " (available now)"
            } else {
                ""
            }
        );
        if config.reset {
            info!("Reset is enabled");
        }
        info!("Configuration is valid");
        return Ok(());
    }

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let stats = run_pipeline(config).await?;

    info!("Pipeline stopped");
    info!("  Batches committed: {}", stats.batches_committed);
    info!("  Files processed: {}", stats.files_processed);
    info!("  Records written: {}", stats.records_written);
    info!("  Records rejected: {}", stats.records_rejected);
    info!("  Fields dropped: {}", stats.fields_dropped);
    if let Some(version) = stats.schema_version {
        info!("  Schema version: {}", version);
    }

    Ok(())
}

/// Build configuration from arguments.
fn build_config(args: &Args) -> Result<Config, PipelineError> {
    let mut config = Config::from_file(&args.config).context(ConfigSnafu)?;
    if args.reset {
        config.reset = true;
    }
    Ok(config)
}
