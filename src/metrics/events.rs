//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which records the
//! corresponding Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when the watcher finds new source files.
pub struct FilesDiscovered {
    pub target: String,
    pub count: usize,
}

impl InternalEvent for FilesDiscovered {
    fn emit(self) {
        trace!(table = %self.target, count = self.count, "Files discovered");
        counter!("floe_files_discovered_total", "target" => self.target)
            .increment(self.count as u64);
    }
}

/// Event emitted when compressed bytes are read from the source.
pub struct BytesRead {
    pub target: String,
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(table = %self.target, bytes = self.bytes, "Bytes read");
        counter!("floe_bytes_read_total", "target" => self.target).increment(self.bytes);
    }
}

/// Event emitted when conformed records are written to a batch.
pub struct RecordsWritten {
    pub target: String,
    pub count: u64,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(table = %self.target, count = self.count, "Records written");
        counter!("floe_records_written_total", "target" => self.target).increment(self.count);
    }
}

/// Stage at which a record or file was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectStage {
    Decompress,
    Parse,
    Conform,
}

impl RejectStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectStage::Decompress => "decompress",
            RejectStage::Parse => "parse",
            RejectStage::Conform => "conform",
        }
    }
}

/// Event emitted when records are routed to the rejected-records sink.
pub struct RecordsRejected {
    pub target: String,
    pub stage: RejectStage,
    pub count: u64,
}

impl InternalEvent for RecordsRejected {
    fn emit(self) {
        trace!(table = %self.target, stage = self.stage.as_str(), count = self.count, "Records rejected");
        counter!(
            "floe_records_rejected_total",
            "target" => self.target,
            "stage" => self.stage.as_str()
        )
        .increment(self.count);
    }
}

/// Event emitted when fields outside the schema are dropped.
pub struct FieldsDropped {
    pub target: String,
    pub count: u64,
}

impl InternalEvent for FieldsDropped {
    fn emit(self) {
        trace!(table = %self.target, count = self.count, "Unknown fields dropped");
        counter!("floe_fields_dropped_total", "target" => self.target).increment(self.count);
    }
}

/// Event emitted when a batch is committed.
pub struct BatchCommitted {
    pub target: String,
    pub batch_id: u64,
    pub files: usize,
}

impl InternalEvent for BatchCommitted {
    fn emit(self) {
        trace!(table = %self.target, batch_id = self.batch_id, files = self.files, "Batch committed");
        counter!("floe_batches_committed_total", "target" => self.target.clone()).increment(1);
        counter!("floe_files_processed_total", "target" => self.target.clone())
            .increment(self.files as u64);
        gauge!("floe_last_committed_batch", "target" => self.target).set(self.batch_id as f64);
    }
}

/// Event emitted when the active schema version changes.
pub struct SchemaEvolved {
    pub target: String,
    pub version: u64,
    pub added_columns: usize,
}

impl InternalEvent for SchemaEvolved {
    fn emit(self) {
        trace!(table = %self.target, version = self.version, added = self.added_columns, "Schema evolved");
        counter!("floe_schema_columns_added_total", "target" => self.target.clone())
            .increment(self.added_columns as u64);
        gauge!("floe_schema_version", "target" => self.target).set(self.version as f64);
    }
}

/// Event emitted when a cycle hits an incompatible schema change.
pub struct SchemaConflict {
    pub target: String,
}

impl InternalEvent for SchemaConflict {
    fn emit(self) {
        trace!(table = %self.target, "Schema conflict");
        counter!("floe_schema_conflicts_total", "target" => self.target).increment(1);
    }
}

/// Outcome of a single cycle.
#[derive(Debug, Clone, Copy)]
pub enum CycleOutcome {
    Committed,
    Idle,
    Retried,
    Aborted,
    Failed,
}

impl CycleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Committed => "committed",
            CycleOutcome::Idle => "idle",
            CycleOutcome::Retried => "retried",
            CycleOutcome::Aborted => "aborted",
            CycleOutcome::Failed => "failed",
        }
    }
}

/// Event emitted when a cycle finishes.
pub struct CycleCompleted {
    pub target: String,
    pub outcome: CycleOutcome,
    pub duration: Duration,
}

impl InternalEvent for CycleCompleted {
    fn emit(self) {
        trace!(
            table = %self.target,
            outcome = self.outcome.as_str(),
            duration_ms = self.duration.as_millis(),
            "Cycle completed"
        );
        counter!(
            "floe_cycles_total",
            "target" => self.target.clone(),
            "outcome" => self.outcome.as_str()
        )
        .increment(1);
        histogram!("floe_cycle_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when the checkpoint commit completes.
pub struct CheckpointCommitted {
    pub target: String,
    pub duration: Duration,
}

impl InternalEvent for CheckpointCommitted {
    fn emit(self) {
        trace!(table = %self.target, duration_ms = self.duration.as_millis(), "Checkpoint committed");
        histogram!("floe_checkpoint_commit_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Head,
    Put,
    List,
    Rename,
    Delete,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Head => "head",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
            StorageOperation::Rename => "rename",
            StorageOperation::Delete => "delete",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for each storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "floe_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the duration of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "floe_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
