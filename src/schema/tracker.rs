//! Schema tracker.
//!
//! Holds the active schema version, samples candidate batches and proposes
//! additive changes. A proposal only becomes active once the batch that
//! needed it has committed, so an aborted cycle leaves the tracker as it was.

use tracing::{debug, info, warn};

use crate::config::SchemaConfig;
use crate::error::SchemaError;
use crate::source::FileRecords;

use super::evolution::{SchemaChange, candidate_columns, merge_schema};
use super::inference::ColumnObservations;
use super::{SchemaHints, SchemaStore, SchemaVersion};

/// Sampling and inference settings.
#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub infer_column_types: bool,
    pub sample_files: usize,
    pub sample_records_per_file: usize,
    pub rescued_data_column: Option<String>,
}

impl From<&SchemaConfig> for InferenceSettings {
    fn from(config: &SchemaConfig) -> Self {
        Self {
            infer_column_types: config.infer_column_types,
            sample_files: config.sample_files,
            sample_records_per_file: config.sample_records_per_file,
            rescued_data_column: config.rescued_data_column.clone(),
        }
    }
}

/// Tracks the evolving schema of one table.
pub struct SchemaTracker {
    store: SchemaStore,
    hints: SchemaHints,
    settings: InferenceSettings,
    active: Option<SchemaVersion>,
    target: String,
}

impl SchemaTracker {
    /// Open the tracker at the version recorded by the checkpoint.
    ///
    /// Versions above `version` are orphans of a cycle that never committed
    /// and are ignored.
    pub async fn open(
        store: SchemaStore,
        hints: SchemaHints,
        settings: InferenceSettings,
        version: Option<u64>,
        target: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        let target = target.into();
        let active = match version {
            Some(version) => Some(store.load(version).await?),
            None => None,
        };

        if let Some(schema) = &active {
            debug!(
                table = %target,
                "Restored schema version {} with {} columns",
                schema.version,
                schema.len()
            );
        }

        Ok(Self {
            store,
            hints,
            settings,
            active,
            target,
        })
    }

    /// The schema version of the last committed batch.
    pub fn active(&self) -> Option<&SchemaVersion> {
        self.active.as_ref()
    }

    /// Observe a bounded sample of the batch: the first `sample_files` files
    /// and the first `sample_records_per_file` records of each.
    pub fn sample(&self, files: &[FileRecords]) -> ColumnObservations {
        let mut observations = ColumnObservations::new();
        for file in files.iter().take(self.settings.sample_files) {
            for record in file.records.iter().take(self.settings.sample_records_per_file) {
                observations.observe(&record.fields, self.settings.infer_column_types);
            }
        }
        debug!(
            table = %self.target,
            "Sampled {} records from {} files",
            observations.records(),
            files.len().min(self.settings.sample_files)
        );
        observations
    }

    /// Merge sampled observations into the active schema.
    ///
    /// Pure: the active version is untouched until [`SchemaTracker::adopt`].
    pub fn merge(&self, observations: &ColumnObservations) -> Result<SchemaChange, SchemaError> {
        let candidates = candidate_columns(
            &observations.resolve(),
            &self.hints,
            self.settings.rescued_data_column.as_deref(),
        );

        let change = merge_schema(self.active.as_ref(), &candidates);
        match &change {
            Ok(SchemaChange::Initial(schema)) => info!(
                table = %self.target,
                "Inferred initial schema: {}",
                describe(schema)
            ),
            Ok(SchemaChange::Evolved { schema, added }) => info!(
                table = %self.target,
                "Schema evolving to version {}: adding {}",
                schema.version,
                added.join(", ")
            ),
            Ok(SchemaChange::Unchanged) => {}
            Err(e) => warn!(table = %self.target, "Schema merge rejected: {}", e),
        }
        change
    }

    /// Persist a proposed version ahead of the commit that adopts it.
    pub async fn stage(&self, schema: &SchemaVersion) -> Result<(), SchemaError> {
        self.store.save(schema).await
    }

    /// Make a committed version the active one.
    pub fn adopt(&mut self, schema: SchemaVersion) {
        debug_assert!(
            self.active
                .as_ref()
                .is_none_or(|current| schema.is_superset_of(current)),
            "schema versions only grow"
        );
        self.active = Some(schema);
    }
}

fn describe(schema: &SchemaVersion) -> String {
    schema
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.column_type))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;
    use crate::source::read_ndjson;
    use crate::storage::StorageProvider;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn settings() -> InferenceSettings {
        InferenceSettings {
            infer_column_types: true,
            sample_files: 1,
            sample_records_per_file: 2,
            rescued_data_column: None,
        }
    }

    async fn tracker(dir: &TempDir, hints: &str, version: Option<u64>) -> SchemaTracker {
        let storage =
            StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap();
        SchemaTracker::open(
            SchemaStore::new(storage),
            SchemaHints::parse(hints).unwrap(),
            settings(),
            version,
            "sales",
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_sample_is_bounded() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir, "", None).await;

        let files = vec![
            read_ndjson("a.json", b"{\"a\":1}\n{\"b\":1}\n{\"c\":1}\n").unwrap(),
            read_ndjson("b.json", b"{\"d\":1}\n").unwrap(),
        ];
        let observations = tracker.sample(&files);
        let names: Vec<_> = observations.resolve().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_hints_override_inference() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir, "CustomerID int, Amount double", None).await;

        let files = vec![read_ndjson("a.json", b"{\"CustomerID\":7,\"Amount\":3}\n").unwrap()];
        let change = tracker.merge(&tracker.sample(&files)).unwrap();

        let schema = change.proposed().unwrap();
        assert_eq!(schema.columns[0].column_type, ColumnType::Int);
        assert_eq!(schema.columns[1].column_type, ColumnType::Double);
    }

    #[tokio::test]
    async fn test_merge_does_not_adopt() {
        let dir = TempDir::new().unwrap();
        let mut tracker = tracker(&dir, "", None).await;

        let files = vec![read_ndjson("a.json", b"{\"a\":1}\n").unwrap()];
        let change = tracker.merge(&tracker.sample(&files)).unwrap();
        assert!(tracker.active().is_none());

        let schema = change.proposed().unwrap().clone();
        tracker.stage(&schema).await.unwrap();
        tracker.adopt(schema);
        assert_eq!(tracker.active().unwrap().version, 1);

        let reopened = super::tests::tracker(&dir, "", Some(1)).await;
        assert_eq!(reopened.active().unwrap().columns[0].name, "a");
    }
}
