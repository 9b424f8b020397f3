//! Checkpoint store for exactly-once processing.
//!
//! # Checkpoint-gated commits
//!
//! The checkpoint is the sole source of restart truth. A batch is committed
//! the moment its checkpoint is durable; the table manifest it carries is
//! published afterwards and re-published on restart if missing.
//!
//! The checkpoint lives in `checkpoint.json` under the checkpoint location
//! and is replaced with a temp-file + rename, so a failed commit leaves the
//! prior checkpoint intact.

pub mod state;

pub use state::Checkpoint;

use async_trait::async_trait;
use object_store::path::Path;
use snafu::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

use crate::emit;
use crate::error::{
    CheckpointClearSnafu, CheckpointDeserializeSnafu, CheckpointError, CheckpointLoadSnafu,
    CheckpointSerializeSnafu, CommitConflictSnafu, CommitFailureSnafu,
};
use crate::metrics::events::CheckpointCommitted;
use crate::storage::StorageProvider;

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Trait for durable checkpoint storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the durable checkpoint. A missing checkpoint loads as empty.
    async fn load(&self) -> Result<Checkpoint, CheckpointError>;

    /// Atomically replace the durable checkpoint.
    ///
    /// Fails with `CommitConflict` unless the durable checkpoint is the one
    /// `checkpoint` was derived from.
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Remove all checkpoint state.
    async fn clear(&self) -> Result<usize, CheckpointError>;
}

/// Checkpoint store backed by a storage location.
pub struct StorageCheckpointStore {
    storage: StorageProvider,
    target: String,
}

impl StorageCheckpointStore {
    pub fn new(storage: StorageProvider, target: impl Into<String>) -> Self {
        Self {
            storage,
            target: target.into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for StorageCheckpointStore {
    async fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let bytes = match self.storage.get(&Path::from(CHECKPOINT_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!(table = %self.target, "No checkpoint found, starting fresh");
                return Ok(Checkpoint::default());
            }
            Err(e) => return Err(e).context(CheckpointLoadSnafu),
        };

        serde_json::from_slice(&bytes).context(CheckpointDeserializeSnafu)
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let start = Instant::now();

        let durable = self.load().await?;
        let expected = checkpoint.parent_batch_id();
        ensure!(
            durable.last_batch_id == expected,
            CommitConflictSnafu {
                expected,
                found: durable.last_batch_id,
            }
        );

        let content = serde_json::to_vec_pretty(checkpoint).context(CheckpointSerializeSnafu)?;
        self.storage
            .atomic_write(&Path::from(CHECKPOINT_FILE), content)
            .await
            .context(CommitFailureSnafu)?;

        emit!(CheckpointCommitted {
            target: self.target.clone(),
            duration: start.elapsed(),
        });
        debug!(
            table = %self.target,
            "Checkpoint committed at batch {:?} ({} files processed)",
            checkpoint.last_batch_id,
            checkpoint.processed.len()
        );
        Ok(())
    }

    async fn clear(&self) -> Result<usize, CheckpointError> {
        let removed = self.storage.delete_all().await.context(CheckpointClearSnafu)?;
        info!(table = %self.target, "Cleared checkpoint state ({} objects)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BatchManifest;
    use crate::source::SourceFile;
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> StorageCheckpointStore {
        let storage =
            StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap();
        StorageCheckpointStore::new(storage, "sales")
    }

    fn manifest(batch_id: u64) -> BatchManifest {
        BatchManifest {
            batch_id,
            schema: None,
            data_file: None,
            record_count: 0,
            source_files: vec![],
            committed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_checkpoint_loads_empty() {
        let dir = TempDir::new().unwrap();
        let checkpoint = store(&dir).await.load().await.unwrap();
        assert_eq!(checkpoint, Checkpoint::default());
    }

    #[tokio::test]
    async fn test_commit_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let first = Checkpoint::default()
            .advance(manifest(1), &[SourceFile::new("a.json", 3, Utc::now())]);
        store.commit(&first).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, first);
        assert!(dir.path().join("checkpoint.json").exists());
        assert!(!dir.path().join("checkpoint.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_parent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let first = Checkpoint::default().advance(manifest(1), &[]);
        store.commit(&first).await.unwrap();

        // A second writer derived batch 1 from the same empty checkpoint.
        let stale = Checkpoint::default().advance(manifest(1), &[]);
        let err = store.commit(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::CommitConflict {
                expected: None,
                found: Some(1)
            }
        ));

        let second = first.advance(manifest(2), &[]);
        store.commit(&second).await.unwrap();
        assert_eq!(store.load().await.unwrap().last_batch_id, Some(2));
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store
            .commit(&Checkpoint::default().advance(manifest(1), &[]))
            .await
            .unwrap();

        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.load().await.unwrap(), Checkpoint::default());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("checkpoint.json"), b"{not json").unwrap();

        let err = store(&dir).await.load().await.unwrap_err();
        assert!(matches!(err, CheckpointError::CheckpointDeserialize { .. }));
    }
}
