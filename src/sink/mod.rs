//! Table sink.
//!
//! Conformed rows are appended to a log-structured table: one data file and
//! one manifest per committed batch. The manifest log is what readers trust;
//! a data file without a published manifest is invisible.

pub mod conform;
pub mod table;
pub mod writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::schema::SchemaVersion;

pub use conform::{ConformError, Conformed, Row, conform_record, conform_value};
pub use table::{AppendTable, TableScan};
pub use writer::{AppendWriter, StagedWrite};

/// Manifest describing one committed batch.
///
/// Stored in the checkpoint before it is published to the table log, so a
/// crash between the two can be rolled forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub batch_id: u64,
    /// Schema the batch was written with. `None` only for a batch that
    /// produced no rows before any schema existed.
    pub schema: Option<SchemaVersion>,
    /// Data file path relative to the table root.
    pub data_file: Option<String>,
    pub record_count: u64,
    pub source_files: Vec<String>,
    pub committed_at: DateTime<Utc>,
}

/// Result of publishing a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The manifest was added to the log.
    Published,
    /// A manifest for this batch was already in the log.
    AlreadyCommitted,
}

/// Trait for append-only table sinks.
///
/// Staging must be repeatable: staging the same batch id twice overwrites
/// the first attempt. Publishing must be idempotent.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Write the rows of a batch and return the manifest that would commit them.
    async fn stage(
        &self,
        batch_id: u64,
        schema: Option<&SchemaVersion>,
        rows: &[Row],
        source_files: Vec<String>,
    ) -> Result<BatchManifest, TableError>;

    /// Make a staged batch visible to readers.
    async fn publish(&self, manifest: &BatchManifest) -> Result<PublishOutcome, TableError>;

    /// Check whether the manifest for `batch_id` is in the log.
    async fn is_committed(&self, batch_id: u64) -> Result<bool, TableError>;

    /// The manifest for `batch_id` if it is in the log.
    async fn committed_manifest(&self, batch_id: u64)
    -> Result<Option<BatchManifest>, TableError>;

    /// Remove every data file and manifest. Returns how many objects went.
    async fn drop_table(&self) -> Result<usize, TableError>;

    /// Table name for logging and metrics.
    fn table_name(&self) -> &str;
}
