//! Crash recovery tests for the checkpoint-gated commit.
//!
//! Each test stops the cycle at a phase boundary by driving the pipeline's
//! phases by hand and dropping it, then reopens from the same locations and
//! checks that the table ends up exactly as an uninterrupted run leaves it.

use floe::checkpoint::{CheckpointStore, StorageCheckpointStore};
use floe::config::Config;
use floe::error::{CheckpointError, ErrorDisposition, PipelineError};
use floe::sink::PublishOutcome;
use floe::{Pipeline, StorageProvider};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

struct Dirs {
    _temp: TempDir,
    root: PathBuf,
}

impl Dirs {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        std::fs::create_dir_all(root.join("source")).unwrap();
        Self { _temp: temp, root }
    }

    fn path(&self, name: &str) -> String {
        self.root.join(name).to_str().unwrap().to_string()
    }

    fn config(&self) -> Config {
        let mut config = Config::for_locations(
            "orders",
            self.path("source"),
            self.path("table"),
            self.path("checkpoint"),
            self.path("schema"),
        );
        config.error_handling.rejected_path = Some(self.path("rejected"));
        config
    }

    fn write_source(&self, name: &str, lines: &[&str]) {
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(self.root.join("source").join(name), content).unwrap();
    }

    fn write_orders(&self) {
        self.write_source(
            "001.json",
            &[
                r#"{"order": 1, "total": 9.5}"#,
                r#"{"order": 2, "total": 3.0, "note": "gift"}"#,
            ],
        );
        self.write_source("002.json", &[r#"{"order": 3, "total": 12.0}"#, "not json"]);
    }

    async fn checkpoint_store(&self) -> StorageCheckpointStore {
        let storage = StorageProvider::for_url_with_options(&self.path("checkpoint"), HashMap::new())
            .await
            .unwrap();
        StorageCheckpointStore::new(storage, "orders")
    }

    fn rejected_lines(&self, batch_id: u64) -> usize {
        let path = self
            .root
            .join("rejected")
            .join(format!("batch-{batch_id:020}.ndjson"));
        std::fs::read_to_string(path).unwrap().lines().count()
    }
}

/// Table rows after an uninterrupted run over the standard orders.
async fn uninterrupted_rows() -> Vec<floe::sink::Row> {
    let dirs = Dirs::new();
    dirs.write_orders();
    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    pipeline.run_until_idle().await.unwrap();
    pipeline.table().scan().await.unwrap().rows
}

/// A crash after the data file is staged but before the checkpoint commit
/// leaves nothing visible; the replay reuses the batch id and produces the
/// same table.
#[tokio::test]
async fn test_crash_before_checkpoint_commit() {
    let dirs = Dirs::new();
    dirs.write_orders();

    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    let batch = pipeline.discover().await.unwrap().unwrap();
    assert_eq!(batch.id, 1);
    let prepared = pipeline.merge_schema(batch).await.unwrap();
    let staged = pipeline.write(prepared).await.unwrap();
    assert_eq!(staged.batch_id(), 1);
    drop(staged);
    drop(pipeline);

    let store = dirs.checkpoint_store().await;
    assert_eq!(store.load().await.unwrap().last_batch_id, None);

    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    assert!(pipeline.active_schema().is_none());
    assert!(pipeline.table().scan().await.unwrap().rows.is_empty());

    assert_eq!(pipeline.run_until_idle().await.unwrap(), 1);
    assert_eq!(pipeline.checkpoint().last_batch_id, Some(1));

    let rows = pipeline.table().scan().await.unwrap().rows;
    assert_eq!(rows, uninterrupted_rows().await);
    assert_eq!(rows.len(), 3);

    // The replay replaced the rejected records of the first attempt.
    assert_eq!(dirs.rejected_lines(1), 1);
}

/// A crash after the checkpoint commit but before the manifest is published
/// is rolled forward on restart, exactly once.
#[tokio::test]
async fn test_crash_after_checkpoint_commit() {
    let dirs = Dirs::new();
    dirs.write_orders();

    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    let batch = pipeline.discover().await.unwrap().unwrap();
    let prepared = pipeline.merge_schema(batch).await.unwrap();
    let staged = pipeline.write(prepared).await.unwrap();

    let store = dirs.checkpoint_store().await;
    store.commit(staged.checkpoint()).await.unwrap();
    drop(staged);
    drop(pipeline);

    // Committed but not yet visible.
    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    assert_eq!(pipeline.checkpoint().last_batch_id, Some(1));
    assert_eq!(pipeline.active_schema().unwrap().version, 1);
    assert!(pipeline.table().manifests().await.unwrap().is_empty());

    assert_eq!(
        pipeline.roll_forward().await.unwrap(),
        Some(PublishOutcome::Published)
    );
    assert_eq!(pipeline.roll_forward().await.unwrap(), None);

    // Both files are already processed; nothing is appended twice.
    assert_eq!(pipeline.run_until_idle().await.unwrap(), 0);
    let rows = pipeline.table().scan().await.unwrap().rows;
    assert_eq!(rows, uninterrupted_rows().await);
    assert_eq!(pipeline.table().manifests().await.unwrap().len(), 1);

    // A second restart finds the manifest already in the log.
    drop(pipeline);
    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    assert_eq!(
        pipeline.roll_forward().await.unwrap(),
        Some(PublishOutcome::AlreadyCommitted)
    );

    dirs.write_source("003.json", &[r#"{"order": 4, "total": 1.0}"#]);
    assert_eq!(pipeline.run_until_idle().await.unwrap(), 1);
    let manifests = pipeline.table().manifests().await.unwrap();
    let ids: Vec<u64> = manifests.iter().map(|m| m.batch_id).collect();
    assert_eq!(ids, vec![1, 2]);
}

/// A schema version staged by a cycle that never committed is ignored on
/// restart and rewritten by the replay.
#[tokio::test]
async fn test_orphan_schema_version_is_ignored() {
    let dirs = Dirs::new();
    dirs.write_source("001.json", &[r#"{"order": 1}"#]);

    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    pipeline.run_until_idle().await.unwrap();

    dirs.write_source("002.json", &[r#"{"order": 2, "coupon": "SPRING"}"#]);
    let batch = pipeline.discover().await.unwrap().unwrap();
    let prepared = pipeline.merge_schema(batch).await.unwrap();
    assert_eq!(prepared.schema_change().proposed().unwrap().version, 2);
    pipeline.write(prepared).await.unwrap();
    drop(pipeline);

    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    assert_eq!(pipeline.active_schema().unwrap().version, 1);
    assert!(!pipeline.active_schema().unwrap().contains("coupon"));

    assert_eq!(pipeline.run_until_idle().await.unwrap(), 1);
    let schema = pipeline.active_schema().unwrap();
    assert_eq!(schema.version, 2);
    assert_eq!(schema.column("coupon").unwrap().added_in, 2);

    let scan = pipeline.table().scan().await.unwrap();
    assert_eq!(scan.column("coupon"), vec![&Value::Null, &json!("SPRING")]);
}

/// A writer holding a stale checkpoint cannot commit over a newer one.
#[tokio::test]
async fn test_stale_writer_is_rejected() {
    let dirs = Dirs::new();
    dirs.write_orders();

    let mut first = Pipeline::open(&dirs.config()).await.unwrap();
    let mut second = Pipeline::open(&dirs.config()).await.unwrap();

    assert_eq!(first.run_until_idle().await.unwrap(), 1);

    let err = second.run_once().await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Checkpoint {
            source: CheckpointError::CommitConflict {
                expected: None,
                found: Some(1)
            }
        }
    ));
    assert_eq!(err.disposition(), ErrorDisposition::Fatal);

    let store = dirs.checkpoint_store().await;
    assert_eq!(store.load().await.unwrap(), first.checkpoint().clone());
    assert_eq!(first.table().manifests().await.unwrap().len(), 1);
}

/// A checkpoint that cannot be parsed stops the pipeline at open.
#[tokio::test]
async fn test_corrupt_checkpoint_is_fatal() {
    let dirs = Dirs::new();
    dirs.write_orders();

    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    pipeline.run_until_idle().await.unwrap();
    drop(pipeline);

    std::fs::write(
        dirs.root.join("checkpoint").join("checkpoint.json"),
        b"{ truncated",
    )
    .unwrap();

    let err = Pipeline::open(&dirs.config()).await.err().unwrap();
    assert_eq!(err.disposition(), ErrorDisposition::Fatal);
}

/// The checkpoint is the single record of which files were processed.
#[tokio::test]
async fn test_checkpoint_tracks_processed_files() {
    let dirs = Dirs::new();
    dirs.write_orders();

    let mut pipeline = Pipeline::open(&dirs.config()).await.unwrap();
    pipeline.run_until_idle().await.unwrap();

    let checkpoint = dirs.checkpoint_store().await.load().await.unwrap();
    assert_eq!(checkpoint.last_batch_id, Some(1));
    assert_eq!(checkpoint.schema_version, Some(1));
    assert!(checkpoint.processed.is_processed("001.json"));
    assert!(checkpoint.processed.is_processed("002.json"));

    let manifest = checkpoint.last_manifest.as_ref().unwrap();
    assert_eq!(manifest.batch_id, 1);
    assert_eq!(manifest.record_count, 3);
    assert_eq!(manifest.source_files, vec!["001.json", "002.json"]);
    assert_eq!(&pipeline.table().manifests().await.unwrap()[0], manifest);
}
