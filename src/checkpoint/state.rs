//! Checkpoint state serialization.
//!
//! Defines the checkpoint structure that captures all information needed
//! to resume after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sink::BatchManifest;
use crate::source::{ProcessedFiles, SourceFile};

/// Format version for forward compatibility.
fn default_format_version() -> u32 {
    1
}

/// Durable record of ingestion progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Id of the last committed batch.
    pub last_batch_id: Option<u64>,
    /// Schema version active after the last committed batch.
    pub schema_version: Option<u64>,
    /// Every source file committed so far.
    #[serde(default)]
    pub processed: ProcessedFiles,
    /// Manifest of the last committed batch, published to the table log
    /// after this checkpoint is durable.
    #[serde(default)]
    pub last_manifest: Option<BatchManifest>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            format_version: default_format_version(),
            last_batch_id: None,
            schema_version: None,
            processed: ProcessedFiles::new(),
            last_manifest: None,
            committed_at: None,
        }
    }
}

impl Checkpoint {
    /// Id for the next batch. A replay after a crash reuses the same id.
    pub fn next_batch_id(&self) -> u64 {
        self.last_batch_id.map_or(1, |id| id + 1)
    }

    /// The batch id this checkpoint was derived from.
    pub fn parent_batch_id(&self) -> Option<u64> {
        self.last_batch_id.and_then(|id| id.checked_sub(1)).filter(|&id| id > 0)
    }

    /// Build the checkpoint that commits `manifest`.
    pub fn advance(&self, manifest: BatchManifest, files: &[SourceFile]) -> Checkpoint {
        let mut processed = self.processed.clone();
        for file in files {
            processed.mark_processed(file, manifest.batch_id);
        }

        Checkpoint {
            format_version: self.format_version,
            last_batch_id: Some(manifest.batch_id),
            schema_version: manifest
                .schema
                .as_ref()
                .map(|s| s.version)
                .or(self.schema_version),
            processed,
            last_manifest: Some(manifest),
            committed_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_checkpoint_default() {
        let checkpoint = Checkpoint::default();
        assert_eq!(checkpoint.format_version, 1);
        assert_eq!(checkpoint.next_batch_id(), 1);
        assert!(checkpoint.processed.is_empty());
        assert!(checkpoint.last_manifest.is_none());
    }

    #[test]
    fn test_advance_marks_files_and_keeps_schema() {
        let base = Checkpoint {
            schema_version: Some(3),
            ..Default::default()
        };
        let files = [SourceFile::new("a.json", 10, Utc::now())];
        let next = base.advance(manifest(1), &files);

        assert_eq!(next.last_batch_id, Some(1));
        assert_eq!(next.schema_version, Some(3));
        assert_eq!(next.parent_batch_id(), None);
        assert_eq!(next.processed.get("a.json").unwrap().batch_id, 1);
        assert!(!base.processed.is_processed("a.json"));

        let after = next.advance(manifest(2), &[]);
        assert_eq!(after.parent_batch_id(), Some(1));
        assert_eq!(after.next_batch_id(), 3);
    }

    #[test]
    fn test_checkpoint_serialization() {
        let checkpoint = Checkpoint::default().advance(
            manifest(1),
            &[SourceFile::new("2024/01/a.ndjson.gz", 42, Utc::now())],
        );

        let json = serde_json::to_string(&checkpoint).unwrap();
        let restored: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, checkpoint);

        let legacy: Checkpoint =
            serde_json::from_str(r#"{"last_batch_id":4,"schema_version":2,"committed_at":null}"#)
                .unwrap();
        assert_eq!(legacy.format_version, 1);
        assert_eq!(legacy.next_batch_id(), 5);
    }
}
