//! Error types for floe using snafu.
//!
//! Each concern gets its own error enum with context selectors. The
//! pipeline aggregates them in [`PipelineError`], which also knows how the
//! run loop should react to each failure through [`ErrorDisposition`].

use snafu::prelude::*;

use crate::pipeline::CycleState;
use crate::schema::ColumnType;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// Cloud backend could not be configured from the URL and options.
    #[snafu(display("{backend} configuration error"))]
    BackendConfig {
        backend: &'static str,
        source: object_store::Error,
    },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Check if a conditional create lost against an existing object.
    pub fn is_already_exists(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::AlreadyExists { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source path is empty.
    #[snafu(display("Source path cannot be empty"))]
    EmptySourcePath,

    /// Table name is empty.
    #[snafu(display("Table name cannot be empty"))]
    EmptyTableName,

    /// Table path is empty.
    #[snafu(display("Table path cannot be empty"))]
    EmptyTablePath,

    /// Checkpoint path is empty.
    #[snafu(display("Checkpoint path cannot be empty"))]
    EmptyCheckpointPath,

    /// Schema path is empty.
    #[snafu(display("Schema path cannot be empty"))]
    EmptySchemaPath,

    /// Two locations that must be disjoint are equal or nested.
    #[snafu(display(
        "{first} ({first_path}) and {second} ({second_path}) must not overlap"
    ))]
    OverlappingLocations {
        first: &'static str,
        second: &'static str,
        first_path: String,
        second_path: String,
    },

    /// A location is neither a supported URL nor a filesystem path.
    #[snafu(display("Invalid location for {setting}"))]
    InvalidLocation {
        setting: &'static str,
        source: StorageError,
    },

    /// A numeric setting that must be positive is zero.
    #[snafu(display("{setting} must be greater than zero"))]
    ZeroSetting { setting: &'static str },

    /// Schema hints could not be parsed.
    #[snafu(display("Invalid schema hint '{hint}': {reason}"))]
    InvalidSchemaHint { hint: String, reason: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Source Errors ============

/// Errors raised while discovering or fetching source files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// The source location could not be listed or read.
    #[snafu(display("Source location unavailable: {location}"))]
    SourceUnavailable {
        location: String,
        source: StorageError,
    },

    /// A source file could not be decompressed.
    #[snafu(display("Failed to decompress {path}"))]
    Decompress {
        path: String,
        source: std::io::Error,
    },
}

// ============ Schema Errors ============

/// Errors raised by schema inference, evolution and persistence.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchemaError {
    /// An existing column was observed with a type it cannot hold.
    #[snafu(display(
        "Incompatible schema change for column '{column}': recorded as {recorded}, inferred as {inferred}"
    ))]
    IncompatibleSchemaChange {
        column: String,
        recorded: ColumnType,
        inferred: ColumnType,
    },

    /// The checkpoint names a schema version that is not in the store.
    #[snafu(display("Schema version {version} not found in schema store"))]
    MissingSchemaVersion { version: u64 },

    /// Schema store read or write failed.
    #[snafu(display("Schema store operation failed"))]
    SchemaStore { source: StorageError },

    /// Failed to serialize a schema version.
    #[snafu(display("Failed to serialize schema version"))]
    SchemaSerialize { source: serde_json::Error },

    /// Failed to parse a stored schema version.
    #[snafu(display("Failed to parse schema version at {path}"))]
    SchemaDeserialize {
        path: String,
        source: serde_json::Error,
    },
}

// ============ Table Errors ============

/// Errors raised by the append-only table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TableError {
    /// Writing a data file or manifest failed.
    #[snafu(display("Table write failed"))]
    TableWrite { source: StorageError },

    /// Reading a data file or manifest failed.
    #[snafu(display("Table read failed"))]
    TableRead { source: StorageError },

    /// Failed to serialize a manifest or row.
    #[snafu(display("Failed to serialize table entry"))]
    ManifestSerialize { source: serde_json::Error },

    /// Failed to parse a manifest.
    #[snafu(display("Failed to parse manifest {path}"))]
    ManifestDeserialize {
        path: String,
        source: serde_json::Error,
    },

    /// Failed to compress a data file.
    #[snafu(display("Failed to encode data file"))]
    DataEncode { source: std::io::Error },

    /// Failed to decompress a data file.
    #[snafu(display("Failed to decode data file {path}"))]
    DataDecode {
        path: String,
        source: std::io::Error,
    },

    /// The batch id is already in the table log for other source files.
    #[snafu(display("Batch {batch_id} is already committed with other source files"))]
    BatchConflict { batch_id: u64 },

    /// A row in a committed data file is not valid JSON.
    #[snafu(display("Corrupt row at {path}:{line}"))]
    CorruptRow {
        path: String,
        line: usize,
        source: serde_json::Error,
    },
}

// ============ Checkpoint Errors ============

/// Errors raised by the checkpoint store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CheckpointError {
    /// The atomic checkpoint write failed; the prior checkpoint is intact.
    #[snafu(display("Checkpoint commit failed"))]
    CommitFailure { source: StorageError },

    /// The durable checkpoint moved since it was read.
    #[snafu(display(
        "Checkpoint conflict: expected last batch {expected:?}, found {found:?}"
    ))]
    CommitConflict {
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// Reading the checkpoint failed.
    #[snafu(display("Failed to load checkpoint"))]
    CheckpointLoad { source: StorageError },

    /// Removing checkpoint state failed.
    #[snafu(display("Failed to clear checkpoint"))]
    CheckpointClear { source: StorageError },

    /// Failed to serialize the checkpoint.
    #[snafu(display("Failed to serialize checkpoint"))]
    CheckpointSerialize { source: serde_json::Error },

    /// Failed to parse the stored checkpoint.
    #[snafu(display("Failed to parse checkpoint"))]
    CheckpointDeserialize { source: serde_json::Error },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ DLQ Errors ============

/// Errors that can occur while writing rejected records.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix avoids selector clashes with the other enums in this module
#[allow(clippy::enum_variant_names)]
pub enum DlqError {
    /// Failed to write to the rejected-records sink.
    #[snafu(display("Failed to write to DLQ"))]
    DlqWrite { source: StorageError },

    /// Failed to serialize a rejected record.
    #[snafu(display("Failed to serialize DLQ record"))]
    DlqSerialize { source: serde_json::Error },

    /// Failed to create DLQ storage provider.
    #[snafu(display("Failed to create DLQ storage"))]
    DlqStorage { source: StorageError },
}

// ============ Pipeline Error (top-level) ============

/// How the run loop reacts to a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Transient: back off and retry the cycle.
    Retry,
    /// Abort the cycle and wait for the next trigger.
    Abort,
    /// Stop the pipeline and surface the error to an operator.
    Fatal,
}

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Source error.
    #[snafu(display("Source error"))]
    Source { source: SourceError },

    /// Schema error.
    #[snafu(display("Schema error"))]
    Schema { source: SchemaError },

    /// Table error.
    #[snafu(display("Table error"))]
    Table { source: TableError },

    /// Checkpoint error.
    #[snafu(display("Checkpoint error"))]
    Checkpoint { source: CheckpointError },

    /// DLQ error.
    #[snafu(display("DLQ error"))]
    Dlq { source: DlqError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// A batch rejected more records than allowed.
    #[snafu(display("Batch {batch_id} rejected {count} records (limit {limit})"))]
    TooManyRejected {
        batch_id: u64,
        count: usize,
        limit: usize,
    },

    /// The cycle state machine was driven out of order.
    #[snafu(display("Invalid cycle transition from {from} to {to}"))]
    InvalidTransition { from: CycleState, to: CycleState },

    /// A transient failure persisted past the retry limit.
    #[snafu(display("Giving up after {attempts} attempts"))]
    RetriesExhausted {
        attempts: usize,
        #[snafu(source(from(PipelineError, Box::new)))]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::PipelineStorage { source } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is an incompatible schema change.
    pub fn is_incompatible_schema_change(&self) -> bool {
        matches!(
            self,
            PipelineError::Schema {
                source: SchemaError::IncompatibleSchemaChange { .. }
            }
        )
    }

    /// Classify this error for the run loop.
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            PipelineError::Source {
                source: SourceError::SourceUnavailable { .. },
            } => ErrorDisposition::Retry,
            PipelineError::Checkpoint {
                source: CheckpointError::CheckpointLoad { .. },
            } => ErrorDisposition::Retry,
            PipelineError::Schema {
                source:
                    SchemaError::IncompatibleSchemaChange { .. }
                    | SchemaError::MissingSchemaVersion { .. }
                    | SchemaError::SchemaDeserialize { .. },
            } => ErrorDisposition::Fatal,
            PipelineError::Checkpoint {
                source:
                    CheckpointError::CommitConflict { .. }
                    | CheckpointError::CheckpointDeserialize { .. },
            } => ErrorDisposition::Fatal,
            PipelineError::Table {
                source: TableError::BatchConflict { .. },
            } => ErrorDisposition::Fatal,
            PipelineError::Config { .. }
            | PipelineError::Metrics { .. }
            | PipelineError::AddressParse { .. }
            | PipelineError::InvalidTransition { .. }
            | PipelineError::RetriesExhausted { .. } => ErrorDisposition::Fatal,
            PipelineError::PipelineStorage { .. }
            | PipelineError::Source { .. }
            | PipelineError::Schema { .. }
            | PipelineError::Table { .. }
            | PipelineError::Checkpoint { .. }
            | PipelineError::Dlq { .. }
            | PipelineError::TooManyRejected { .. } => ErrorDisposition::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> PipelineError {
        PipelineError::Source {
            source: SourceError::SourceUnavailable {
                location: "file:///landing".to_string(),
                source: StorageError::InvalidUrl {
                    url: "file:///landing".to_string(),
                },
            },
        }
    }

    #[test]
    fn test_source_unavailable_is_retried() {
        assert_eq!(unavailable().disposition(), ErrorDisposition::Retry);
    }

    #[test]
    fn test_incompatible_schema_change_is_fatal() {
        let err = PipelineError::Schema {
            source: SchemaError::IncompatibleSchemaChange {
                column: "Amount".to_string(),
                recorded: ColumnType::Double,
                inferred: ColumnType::String,
            },
        };
        assert!(err.is_incompatible_schema_change());
        assert_eq!(err.disposition(), ErrorDisposition::Fatal);
        assert!(
            snafu::Report::from_error(err)
                .to_string()
                .contains("recorded as double, inferred as string")
        );
    }

    #[test]
    fn test_commit_failure_aborts_cycle() {
        let err = PipelineError::Checkpoint {
            source: CheckpointError::CommitFailure {
                source: StorageError::InvalidUrl {
                    url: "x".to_string(),
                },
            },
        };
        assert_eq!(err.disposition(), ErrorDisposition::Abort);
        assert!(!err.is_incompatible_schema_change());
    }

    #[test]
    fn test_exhausted_retries_are_fatal() {
        let err = PipelineError::RetriesExhausted {
            attempts: 3,
            source: Box::new(unavailable()),
        };
        assert_eq!(err.disposition(), ErrorDisposition::Fatal);
    }
}
