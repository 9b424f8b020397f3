//! floe: incremental NDJSON ingestion into an append-only table.
//!
//! This library watches an append-only directory of newline-delimited JSON
//! files, evolves a column schema additively as new fields appear and
//! appends every file exactly once to a log-structured table, with a
//! durable checkpoint gating each commit.
//!
//! # Example
//!
//! ```ignore
//! use floe::error::{ConfigSnafu, PipelineError};
//! use floe::{Config, run_pipeline};
//! use snafu::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("floe.yaml").context(ConfigSnafu)?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Committed {} batches", stats.batches_committed);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod dlq;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;
pub mod storage;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use storage::StorageProvider;
