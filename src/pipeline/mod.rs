//! Main ingestion pipeline.
//!
//! Connects the watcher, schema tracker, append writer and checkpoint store
//! into a triggered cycle:
//!
//! ```text
//! Idle → Discovering → SchemaMerging → Writing → Committing → Idle
//! ```
//!
//! # Commit protocol
//!
//! 1. `Writing` stages the batch's data file and, when the schema evolved,
//!    the new schema version. Neither is visible yet.
//! 2. `Committing` writes the checkpoint, which carries the batch manifest.
//!    This is the commit point.
//! 3. The manifest is then published to the table log.
//!
//! Every cycle starts by rolling forward: a checkpointed manifest missing
//! from the table log is published before anything new is discovered. A
//! crash anywhere before step 2 replays the batch under the same id onto
//! the same staged paths.

mod backoff;
mod polling;
mod signal;
mod state;

pub use backoff::Backoff;
pub use polling::{IterationResult, PollingProcessor, run_polling_loop};
pub use signal::shutdown_signal;
pub use state::CycleState;

use async_trait::async_trait;
use snafu::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore, StorageCheckpointStore};
use crate::config::Config;
use crate::dlq::{RejectedRecord, RejectedRecordSink, RejectionTracker};
use crate::emit;
use crate::error::{
    CheckpointSnafu, ConfigSnafu, DlqSnafu, InvalidTransitionSnafu, PipelineError,
    PipelineStorageSnafu, SchemaSnafu, SourceError, SourceSnafu, TableSnafu,
};
use crate::metrics::events::{
    BatchCommitted, FieldsDropped, RecordsWritten, SchemaConflict, SchemaEvolved,
};
use crate::schema::{InferenceSettings, SchemaChange, SchemaStore, SchemaTracker, SchemaVersion};
use crate::sink::{AppendTable, AppendWriter, PublishOutcome, TableSink};
use crate::source::{Batch, DirectoryWatcher, FileRecords, read_ndjson};
use crate::storage::StorageProvider;

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub batches_committed: usize,
    pub files_processed: usize,
    pub records_written: u64,
    pub records_rejected: usize,
    pub fields_dropped: u64,
    pub schema_version: Option<u64>,
}

/// A discovered batch with its parsed files and merged schema.
#[derive(Debug)]
pub struct PreparedBatch {
    pub batch: Batch,
    files: Vec<FileRecords>,
    /// Files that could not be decompressed.
    undecodable: Vec<RejectedRecord>,
    change: SchemaChange,
}

impl PreparedBatch {
    pub fn schema_change(&self) -> &SchemaChange {
        &self.change
    }
}

/// A batch staged in the table and ready to commit.
#[derive(Debug)]
pub struct StagedBatch {
    batch: Batch,
    checkpoint: Checkpoint,
    change: SchemaChange,
    rejected: usize,
    fields_dropped: u64,
}

impl StagedBatch {
    pub fn batch_id(&self) -> u64 {
        self.batch.id
    }

    /// The checkpoint that commits this batch.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }
}

/// Main ingestion pipeline for one table.
pub struct Pipeline {
    target: String,
    watcher: DirectoryWatcher,
    tracker: SchemaTracker,
    writer: AppendWriter,
    table: Arc<AppendTable>,
    checkpoints: Arc<dyn CheckpointStore>,
    rejections: RejectionTracker,
    /// Last durable checkpoint.
    checkpoint: Checkpoint,
    /// Whether the checkpoint's manifest is known to be in the table log.
    manifest_published: bool,
    state: CycleState,
    stats: PipelineStats,
}

impl Pipeline {
    /// Open the pipeline from configuration.
    ///
    /// With `reset` set, checkpoint, schema, table and rejected-record state
    /// are removed first. The durable checkpoint is then loaded and the schema tracker
    /// restored at the version it names.
    pub async fn open(config: &Config) -> Result<Self, PipelineError> {
        config.validate().context(ConfigSnafu)?;
        let target = config.table.name.clone();

        let table_storage = StorageProvider::for_url_with_options(
            &config.table.path,
            config.table.storage_options.clone(),
        )
        .await
        .context(PipelineStorageSnafu)?;
        let checkpoint_storage = StorageProvider::for_url_with_options(
            &config.checkpoint.path,
            config.checkpoint.storage_options.clone(),
        )
        .await
        .context(PipelineStorageSnafu)?;
        let schema_storage = StorageProvider::for_url_with_options(
            &config.schema.path,
            config.schema.storage_options.clone(),
        )
        .await
        .context(PipelineStorageSnafu)?;

        let table = Arc::new(AppendTable::new(
            table_storage,
            config.table.compression,
            target.clone(),
        ));
        let checkpoints: Arc<dyn CheckpointStore> =
            Arc::new(StorageCheckpointStore::new(checkpoint_storage, target.clone()));
        let schema_store = SchemaStore::new(schema_storage);

        let sink = RejectedRecordSink::from_config(&config.error_handling)
            .await
            .context(DlqSnafu)?;

        if config.reset {
            warn!(
                table = %target,
                "Reset requested: clearing checkpoint, schema, table and rejected records"
            );
            checkpoints.clear().await.context(CheckpointSnafu)?;
            schema_store.clear().await.context(SchemaSnafu)?;
            let dropped = table.drop_table().await.context(TableSnafu)?;
            info!(table = %target, "Dropped table ({} objects)", dropped);
            if let Some(sink) = &sink {
                let removed = sink.clear().await.context(DlqSnafu)?;
                info!(table = %target, "Removed {} rejected record files", removed);
            }
        }

        let checkpoint = checkpoints.load().await.context(CheckpointSnafu)?;
        let hints = config.schema_hints().context(ConfigSnafu)?;
        let tracker = SchemaTracker::open(
            schema_store,
            hints,
            InferenceSettings::from(&config.schema),
            checkpoint.schema_version,
            target.clone(),
        )
        .await
        .context(SchemaSnafu)?;

        let rejections = RejectionTracker::new(
            sink,
            config.error_handling.max_rejected_per_batch,
            target.clone(),
        );

        let writer = AppendWriter::new(table.clone(), config.schema.rescued_data_column.clone());

        info!(
            table = %target,
            "Opened pipeline at batch {:?}, schema version {:?}, {} files processed",
            checkpoint.last_batch_id,
            checkpoint.schema_version,
            checkpoint.processed.len()
        );

        let stats = PipelineStats {
            schema_version: checkpoint.schema_version,
            ..Default::default()
        };

        Ok(Self {
            watcher: DirectoryWatcher::new(&config.source, target.clone()),
            target,
            tracker,
            writer,
            table,
            checkpoints,
            rejections,
            checkpoint,
            manifest_published: false,
            state: CycleState::Idle,
            stats,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// The last durable checkpoint.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// The schema version of the last committed batch.
    pub fn active_schema(&self) -> Option<&SchemaVersion> {
        self.tracker.active()
    }

    pub fn table(&self) -> &AppendTable {
        &self.table
    }

    fn transition(&mut self, next: CycleState) -> Result<(), PipelineError> {
        ensure!(
            self.state.can_transition_to(next),
            InvalidTransitionSnafu {
                from: self.state,
                to: next,
            }
        );
        debug!(table = %self.target, "Cycle state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Return to `Idle` after a failed phase. Nothing staged is visible.
    fn abort_cycle(&mut self) {
        if self.state != CycleState::Idle {
            debug!(table = %self.target, "Cycle aborted in state {}", self.state);
            self.state = CycleState::Idle;
        }
    }

    /// Publish the checkpointed manifest if the table log lacks it.
    pub async fn roll_forward(&mut self) -> Result<Option<PublishOutcome>, PipelineError> {
        if self.manifest_published {
            return Ok(None);
        }
        let Some(manifest) = &self.checkpoint.last_manifest else {
            self.manifest_published = true;
            return Ok(None);
        };

        let outcome = self.writer.publish(manifest).await.context(TableSnafu)?;
        if outcome == PublishOutcome::Published {
            info!(
                table = %self.target,
                "Rolled forward batch {} from the checkpoint",
                manifest.batch_id
            );
        }
        self.manifest_published = true;
        Ok(Some(outcome))
    }

    /// Find new source files and form the next batch.
    ///
    /// Returns `None`, back in `Idle`, when nothing new was found.
    pub async fn discover(&mut self) -> Result<Option<Batch>, PipelineError> {
        self.transition(CycleState::Discovering)?;

        let files = self
            .watcher
            .discover(&self.checkpoint.processed)
            .await
            .context(SourceSnafu)?;

        if files.is_empty() {
            self.transition(CycleState::Idle)?;
            return Ok(None);
        }

        let batch = Batch {
            id: self.checkpoint.next_batch_id(),
            files,
        };
        info!(
            table = %self.target,
            "Batch {}: {} new files from {}",
            batch.id,
            batch.len(),
            self.watcher.location()
        );
        Ok(Some(batch))
    }

    /// Fetch and parse the batch, then merge its sampled columns into the
    /// active schema.
    pub async fn merge_schema(&mut self, batch: Batch) -> Result<PreparedBatch, PipelineError> {
        self.transition(CycleState::SchemaMerging)?;

        let contents = self
            .watcher
            .fetch(&batch.files)
            .await
            .context(SourceSnafu)?;

        let mut files = Vec::with_capacity(contents.len());
        let mut undecodable = Vec::new();
        for (file, bytes) in batch.files.iter().zip(contents) {
            match read_ndjson(&file.path, &bytes) {
                Ok(records) => files.push(records),
                Err(e @ SourceError::Decompress { .. }) => {
                    warn!(table = %self.target, "Rejecting undecodable file {}: {}", file.path, e);
                    undecodable.push(RejectedRecord::file(
                        &file.path,
                        snafu::Report::from_error(&e).to_string(),
                        batch.id,
                    ));
                }
                Err(e) => return Err(e).context(SourceSnafu),
            }
        }

        let observations = self.tracker.sample(&files);
        let change = match self.tracker.merge(&observations) {
            Ok(change) => change,
            Err(e) => {
                emit!(SchemaConflict {
                    target: self.target.clone(),
                });
                return Err(e).context(SchemaSnafu);
            }
        };

        Ok(PreparedBatch {
            batch,
            files,
            undecodable,
            change,
        })
    }

    /// Stage the batch: schema version, data file and rejected records.
    pub async fn write(&mut self, prepared: PreparedBatch) -> Result<StagedBatch, PipelineError> {
        self.transition(CycleState::Writing)?;

        let PreparedBatch {
            batch,
            files,
            mut undecodable,
            change,
        } = prepared;

        if let Some(proposed) = change.proposed() {
            self.tracker.stage(proposed).await.context(SchemaSnafu)?;
        }
        let schema = change.proposed().or(self.tracker.active());

        let staged = self
            .writer
            .write(&batch, schema, &files)
            .await
            .context(TableSnafu)?;

        // A batch already in the table log keeps the rejections of its first run.
        let rejected = if staged.already_committed {
            0
        } else {
            undecodable.extend(staged.rejected);
            self.rejections
                .record_batch(batch.id, &undecodable)
                .await?
                .total()
        };

        let checkpoint = self.checkpoint.advance(staged.manifest, &batch.files);
        Ok(StagedBatch {
            batch,
            checkpoint,
            change,
            rejected,
            fields_dropped: staged.fields_dropped,
        })
    }

    /// Commit the staged batch and publish its manifest.
    pub async fn commit(&mut self, staged: StagedBatch) -> Result<(), PipelineError> {
        self.transition(CycleState::Committing)?;

        let StagedBatch {
            batch,
            checkpoint,
            change,
            rejected,
            fields_dropped,
        } = staged;

        self.checkpoints
            .commit(&checkpoint)
            .await
            .context(CheckpointSnafu)?;

        // Committed: adopt the new state before publishing.
        self.checkpoint = checkpoint;
        self.manifest_published = false;
        match change {
            SchemaChange::Unchanged => {}
            SchemaChange::Initial(schema) => self.adopt_schema(schema, None),
            SchemaChange::Evolved { schema, added } => self.adopt_schema(schema, Some(added)),
        }

        let record_count = self
            .checkpoint
            .last_manifest
            .as_ref()
            .map_or(0, |m| m.record_count);
        self.stats.batches_committed += 1;
        self.stats.files_processed += batch.len();
        self.stats.records_written += record_count;
        self.stats.records_rejected += rejected;
        self.stats.fields_dropped += fields_dropped;

        emit!(BatchCommitted {
            target: self.target.clone(),
            batch_id: batch.id,
            files: batch.len(),
        });
        emit!(RecordsWritten {
            target: self.target.clone(),
            count: record_count,
        });
        if fields_dropped > 0 {
            emit!(FieldsDropped {
                target: self.target.clone(),
                count: fields_dropped,
            });
        }

        info!(
            table = %self.target,
            "Committed batch {}: {} files, {} records, {} rejected",
            batch.id,
            batch.len(),
            record_count,
            rejected
        );

        self.roll_forward().await?;
        self.transition(CycleState::Idle)
    }

    fn adopt_schema(&mut self, schema: SchemaVersion, added: Option<Vec<String>>) {
        emit!(SchemaEvolved {
            target: self.target.clone(),
            version: schema.version,
            added_columns: added.as_ref().map_or(schema.len(), Vec::len),
        });
        self.stats.schema_version = Some(schema.version);
        self.tracker.adopt(schema);
    }

    /// Roll forward, then discover and merge. `None` when idle.
    async fn prepare_cycle(&mut self) -> Result<Option<PreparedBatch>, PipelineError> {
        self.roll_forward().await?;
        match self.discover().await? {
            Some(batch) => Ok(Some(self.merge_schema(batch).await?)),
            None => Ok(None),
        }
    }

    async fn process_cycle(&mut self, prepared: PreparedBatch) -> Result<(), PipelineError> {
        let staged = self.write(prepared).await?;
        self.commit(staged).await
    }

    /// Run one full cycle. Returns whether a batch was committed.
    pub async fn run_once(&mut self) -> Result<bool, PipelineError> {
        let prepared = match self.prepare_cycle().await {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return Ok(false),
            Err(e) => {
                self.abort_cycle();
                return Err(e);
            }
        };
        match self.process_cycle(prepared).await {
            Ok(()) => Ok(true),
            Err(e) => {
                self.abort_cycle();
                Err(e)
            }
        }
    }

    /// Run cycles until idle. Returns the number of batches committed.
    pub async fn run_until_idle(&mut self) -> Result<usize, PipelineError> {
        let mut committed = 0;
        while self.run_once().await? {
            committed += 1;
        }
        Ok(committed)
    }

    /// Run the triggered loop until shutdown or a fatal error.
    pub async fn run(
        &mut self,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<PipelineStats, PipelineError> {
        info!(table = %self.target, "Starting pipeline");
        run_polling_loop(self, &config.trigger, &config.retry, shutdown).await?;
        info!(table = %self.target, "Pipeline stopped: {:?}", self.stats);
        Ok(self.stats.clone())
    }
}

#[async_trait]
impl PollingProcessor for Pipeline {
    type State = PreparedBatch;

    async fn prepare(&mut self, cold_start: bool) -> Result<Option<PreparedBatch>, PipelineError> {
        if cold_start {
            debug!(table = %self.target, "First cycle since start");
        }
        let result = self.prepare_cycle().await;
        if result.is_err() {
            self.abort_cycle();
        }
        result
    }

    async fn process(&mut self, prepared: PreparedBatch) -> Result<IterationResult, PipelineError> {
        match self.process_cycle(prepared).await {
            Ok(()) => Ok(IterationResult::ProcessedItems),
            Err(e) => {
                self.abort_cycle();
                Err(e)
            }
        }
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// Run the pipeline with the given configuration until shutdown.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    let shutdown = CancellationToken::new();

    // Set up signal handler for graceful shutdown
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let mut pipeline = Pipeline::open(&config).await?;
    pipeline.run(&config, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct Dirs {
        root: TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            std::fs::create_dir_all(root.path().join("source")).unwrap();
            Self { root }
        }

        fn path(&self, name: &str) -> String {
            self.root.path().join(name).to_str().unwrap().to_string()
        }

        fn write_source(&self, name: &str, content: &str) {
            std::fs::write(self.root.path().join("source").join(name), content).unwrap();
        }

        fn config(&self) -> Config {
            Config::for_locations(
                "sales",
                self.path("source"),
                self.path("table"),
                self.path("checkpoint"),
                self.path("schema"),
            )
        }
    }

    #[tokio::test]
    async fn test_idle_cycle_stays_idle() {
        let dirs = Dirs::new();
        let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();

        assert!(!pipeline.run_once().await.unwrap());
        assert_eq!(pipeline.state(), CycleState::Idle);
        assert!(pipeline.checkpoint().last_batch_id.is_none());
    }

    #[tokio::test]
    async fn test_single_cycle_commits_batch() {
        let dirs = Dirs::new();
        dirs.write_source("a.json", "{\"id\":1,\"name\":\"x\"}\n{\"id\":2}\n");
        let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();

        assert!(pipeline.run_once().await.unwrap());
        assert_eq!(pipeline.state(), CycleState::Idle);
        assert_eq!(pipeline.checkpoint().last_batch_id, Some(1));
        assert_eq!(pipeline.stats().records_written, 2);
        assert_eq!(pipeline.stats().schema_version, Some(1));

        let scan = pipeline.table().scan().await.unwrap();
        assert_eq!(scan.column("name"), [&json!("x"), &serde_json::Value::Null]);

        assert!(!pipeline.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_phases_out_of_order_are_rejected() {
        let dirs = Dirs::new();
        dirs.write_source("a.json", "{\"id\":1}\n");
        let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();

        let batch = pipeline.discover().await.unwrap().unwrap();
        let err = pipeline.discover().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: CycleState::Discovering,
                to: CycleState::Discovering
            }
        ));

        let prepared = pipeline.merge_schema(batch).await.unwrap();
        assert!(matches!(prepared.schema_change(), SchemaChange::Initial(_)));
    }
}
