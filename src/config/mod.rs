//! Pipeline configuration.
//!
//! Configuration is read from a YAML file after environment variable
//! interpolation, then validated before any storage is touched.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyCheckpointPathSnafu, EmptySchemaPathSnafu, EmptySourcePathSnafu,
    EmptyTableNameSnafu, EmptyTablePathSnafu, EnvInterpolationSnafu, InvalidLocationSnafu,
    OverlappingLocationsSnafu, ReadFileSnafu, YamlParseSnafu, ZeroSettingSnafu,
};
use crate::schema::SchemaHints;
use crate::source::CompressionFormat;
use crate::storage::BackendConfig;

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub table: TableConfig,
    pub checkpoint: LocationConfig,
    pub schema: SchemaConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Clear checkpoint and schema state, and drop the table, before starting.
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
}

/// A storage location and the options needed to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// URL or local path. Examples: "s3://bucket/_checkpoints/sales", "/data/_checkpoints/sales"
    pub path: String,
    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Source directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Append-only directory of NDJSON files.
    pub path: String,

    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Upper bound on files taken into a single batch (default: 1000).
    #[serde(default = "default_max_files_per_trigger")]
    pub max_files_per_trigger: usize,

    /// Maximum number of files downloaded concurrently (default: 4).
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
}

fn default_max_files_per_trigger() -> usize {
    1000
}

fn default_max_concurrent_files() -> usize {
    4
}

/// Target table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name, used in logs and metric labels.
    pub name: String,
    /// Table root location.
    pub path: String,
    /// Compression for data files written to the table (default: none).
    #[serde(default)]
    pub compression: CompressionFormat,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Schema tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Where schema versions are persisted.
    pub path: String,

    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Column type hints, e.g. "CustomerID int, Amount double".
    #[serde(default)]
    pub hints: Option<String>,

    /// Infer typed columns; when false every column is a string (default: true).
    #[serde(default = "default_infer_column_types")]
    pub infer_column_types: bool,

    /// Files sampled per batch for inference (default: 50).
    #[serde(default = "default_sample_files")]
    pub sample_files: usize,

    /// Records read per sampled file (default: 1000).
    #[serde(default = "default_sample_records_per_file")]
    pub sample_records_per_file: usize,

    /// Column collecting fields that are not part of the schema.
    #[serde(default)]
    pub rescued_data_column: Option<String>,
}

fn default_infer_column_types() -> bool {
    true
}

fn default_sample_files() -> usize {
    50
}

fn default_sample_records_per_file() -> usize {
    1000
}

/// Cycle trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Seconds between cycles (default: 10).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Process everything currently available, then exit.
    #[serde(default)]
    pub available_now: bool,

    /// Random extra delay added to each wait, in seconds (default: 0).
    #[serde(default)]
    pub jitter_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            available_now: false,
            jitter_secs: 0,
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}

impl TriggerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Backoff settings for transient source failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Consecutive attempts before giving up (0 = unlimited).
    #[serde(default)]
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            max_attempts: 0,
        }
    }
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_secs() -> u64 {
    60
}

/// Rejected-records handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Maximum rejected records per batch before the cycle aborts (0 = unlimited).
    #[serde(default)]
    pub max_rejected_per_batch: usize,
    /// Where rejected records are written. Without it they are only logged.
    #[serde(default)]
    pub rejected_path: Option<String>,
    #[serde(default)]
    pub rejected_storage_options: HashMap<String, String>,
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            vars::interpolate(content).map_err(|errors| {
                EnvInterpolationSnafu {
                    message: errors.join("\n"),
                }
                .build()
            })?
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.path.is_empty(), EmptySourcePathSnafu);
        ensure!(!self.table.name.is_empty(), EmptyTableNameSnafu);
        ensure!(!self.table.path.is_empty(), EmptyTablePathSnafu);
        ensure!(!self.checkpoint.path.is_empty(), EmptyCheckpointPathSnafu);
        ensure!(!self.schema.path.is_empty(), EmptySchemaPathSnafu);

        self.validate_locations()?;

        for (setting, value) in [
            ("source.max_files_per_trigger", self.source.max_files_per_trigger),
            ("source.max_concurrent_files", self.source.max_concurrent_files),
            ("schema.sample_files", self.schema.sample_files),
            (
                "schema.sample_records_per_file",
                self.schema.sample_records_per_file,
            ),
        ] {
            ensure!(value > 0, ZeroSettingSnafu { setting });
        }
        ensure!(
            self.trigger.interval_secs > 0 || self.trigger.available_now,
            ZeroSettingSnafu {
                setting: "trigger.interval_secs"
            }
        );

        self.schema_hints()?;
        Ok(())
    }

    /// Every location floe reads or clears must be disjoint from the others.
    fn validate_locations(&self) -> Result<(), ConfigError> {
        let mut locations = vec![
            ("source.path", &self.source.path),
            ("table.path", &self.table.path),
            ("checkpoint.path", &self.checkpoint.path),
            ("schema.path", &self.schema.path),
        ];
        if let Some(rejected) = &self.error_handling.rejected_path {
            locations.push(("error_handling.rejected_path", rejected));
        }

        let parsed = locations
            .iter()
            .map(|(setting, path)| {
                BackendConfig::parse_url(path).context(InvalidLocationSnafu { setting: *setting })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (i, first) in parsed.iter().enumerate() {
            for (j, second) in parsed.iter().enumerate().skip(i + 1) {
                ensure!(
                    !first.overlaps(second),
                    OverlappingLocationsSnafu {
                        first: locations[i].0,
                        second: locations[j].0,
                        first_path: locations[i].1.clone(),
                        second_path: locations[j].1.clone(),
                    }
                );
            }
        }
        Ok(())
    }

    /// Parse the configured schema hints.
    pub fn schema_hints(&self) -> Result<SchemaHints, ConfigError> {
        match &self.schema.hints {
            Some(hints) => SchemaHints::parse(hints),
            None => Ok(SchemaHints::default()),
        }
    }

    /// Build a minimal configuration for the given locations.
    ///
    /// Every other setting takes its default, with metrics disabled.
    pub fn for_locations(
        table_name: impl Into<String>,
        source: impl Into<String>,
        table: impl Into<String>,
        checkpoint: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            source: SourceConfig {
                path: source.into(),
                storage_options: HashMap::new(),
                max_files_per_trigger: default_max_files_per_trigger(),
                max_concurrent_files: default_max_concurrent_files(),
            },
            table: TableConfig {
                name: table_name.into(),
                path: table.into(),
                compression: CompressionFormat::default(),
                storage_options: HashMap::new(),
            },
            checkpoint: LocationConfig {
                path: checkpoint.into(),
                storage_options: HashMap::new(),
            },
            schema: SchemaConfig {
                path: schema.into(),
                storage_options: HashMap::new(),
                hints: None,
                infer_column_types: default_infer_column_types(),
                sample_files: default_sample_files(),
                sample_records_per_file: default_sample_records_per_file(),
                rescued_data_column: None,
            },
            trigger: TriggerConfig::default(),
            retry: RetryConfig::default(),
            reset: false,
            metrics: MetricsConfig {
                enabled: false,
                address: default_metrics_address(),
            },
            error_handling: ErrorHandlingConfig::default(),
        }
    }
}
