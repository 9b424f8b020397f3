//! Directory watcher.
//!
//! Lists the source directory, drops everything already in the processed
//! set and returns the rest as a bounded, sorted candidate batch. Any
//! failure to reach the source is reported as `SourceUnavailable` so the
//! caller can back off and retry.

use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::HashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::SourceConfig;
use crate::emit;
use crate::error::{SourceError, SourceUnavailableSnafu};
use crate::metrics::events::{BytesRead, FilesDiscovered};
use crate::storage::StorageProvider;

use super::{ProcessedFiles, SourceFile};

const NDJSON_EXTENSIONS: [&str; 3] = [".json", ".ndjson", ".jsonl"];
const COMPRESSION_SUFFIXES: [&str; 3] = ["", ".gz", ".zst"];

/// Check whether a listed path is an ingestible NDJSON file.
///
/// Hidden files and anything under a directory starting with `_` or `.`
/// are skipped.
pub fn is_candidate(path: &str) -> bool {
    if path
        .split('/')
        .any(|part| part.starts_with('_') || part.starts_with('.'))
    {
        return false;
    }
    COMPRESSION_SUFFIXES.iter().any(|suffix| {
        let Some(stem) = path.strip_suffix(suffix) else {
            return false;
        };
        NDJSON_EXTENSIONS.iter().any(|ext| stem.ends_with(ext))
    })
}

/// Watches one append-only source directory.
pub struct DirectoryWatcher {
    url: String,
    storage_options: HashMap<String, String>,
    storage: OnceCell<StorageProvider>,
    max_files_per_trigger: usize,
    max_concurrent_files: usize,
    target: String,
}

impl DirectoryWatcher {
    pub fn new(config: &SourceConfig, target: impl Into<String>) -> Self {
        Self {
            url: config.path.clone(),
            storage_options: config.storage_options.clone(),
            storage: OnceCell::new(),
            max_files_per_trigger: config.max_files_per_trigger,
            max_concurrent_files: config.max_concurrent_files,
            target: target.into(),
        }
    }

    /// Source location, for logging.
    pub fn location(&self) -> &str {
        &self.url
    }

    /// Connect to the source on first use; a failed connection is retried
    /// on the next call.
    async fn storage(&self) -> Result<&StorageProvider, SourceError> {
        self.storage
            .get_or_try_init(|| async {
                StorageProvider::for_existing_url(&self.url, self.storage_options.clone())
                    .await
                    .context(SourceUnavailableSnafu {
                        location: self.url.as_str(),
                    })
            })
            .await
    }

    /// List files not yet in `processed`, sorted by path and capped at
    /// `max_files_per_trigger`.
    pub async fn discover(
        &self,
        processed: &ProcessedFiles,
    ) -> Result<Vec<SourceFile>, SourceError> {
        let storage = self.storage().await?;
        let listed = storage
            .list_all(None)
            .await
            .context(SourceUnavailableSnafu {
                location: self.url.as_str(),
            })?;

        let total_listed = listed.len();
        let discovered_at = Utc::now();
        let mut files: Vec<SourceFile> = listed
            .into_iter()
            .filter(|meta| {
                let path = meta.location.as_ref();
                is_candidate(path) && !processed.is_processed(path)
            })
            .map(|meta| SourceFile::new(meta.location.to_string(), meta.size, discovered_at))
            .collect();

        files.sort_by(|a, b| a.path.cmp(&b.path));
        let pending = files.len();
        files.truncate(self.max_files_per_trigger);

        debug!(
            table = %self.target,
            "Listed {} objects, {} pending, {} taken into the batch",
            total_listed,
            pending,
            files.len()
        );
        if !files.is_empty() {
            emit!(FilesDiscovered {
                target: self.target.clone(),
                count: files.len(),
            });
        }

        Ok(files)
    }

    /// Download the given files with bounded concurrency, preserving order.
    pub async fn fetch(&self, files: &[SourceFile]) -> Result<Vec<Bytes>, SourceError> {
        let storage = self.storage().await?;
        let requests: Vec<(Path, String)> = files
            .iter()
            .map(|file| {
                (
                    Path::from(file.path.as_str()),
                    format!("{}/{}", self.url, file.path),
                )
            })
            .collect();

        futures::stream::iter(requests)
            .map(|(path, location)| {
                let storage = storage.clone();
                let target = self.target.clone();
                async move {
                    let bytes = storage
                        .get(&path)
                        .await
                        .context(SourceUnavailableSnafu { location })?;
                    emit!(BytesRead {
                        target,
                        bytes: bytes.len() as u64,
                    });
                    Ok::<_, SourceError>(bytes)
                }
            })
            .buffered(self.max_concurrent_files)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_config(path: &str, max_files: usize) -> SourceConfig {
        SourceConfig {
            path: path.to_string(),
            storage_options: HashMap::new(),
            max_files_per_trigger: max_files,
            max_concurrent_files: 2,
        }
    }

    #[test]
    fn test_candidate_filter() {
        assert!(is_candidate("sales-2024-01-01.json"));
        assert!(is_candidate("2024/01/part-0.ndjson.gz"));
        assert!(is_candidate("events.jsonl.zst"));

        assert!(!is_candidate("notes.txt"));
        assert!(!is_candidate("data.json.tmp"));
        assert!(!is_candidate(".hidden.json"));
        assert!(!is_candidate("_checkpoint/state.json"));
        assert!(!is_candidate("data.parquet"));
    }

    #[tokio::test]
    async fn test_discover_skips_processed_and_caps_batch() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["c.json", "a.json", "b.json", "ignored.csv"] {
            std::fs::write(temp_dir.path().join(name), b"{}\n").unwrap();
        }

        let watcher =
            DirectoryWatcher::new(&source_config(temp_dir.path().to_str().unwrap(), 1), "t");

        let mut processed = ProcessedFiles::new();
        processed.mark_processed(&SourceFile::new("a.json", 3, Utc::now()), 1);

        let files = watcher.discover(&processed).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "b.json");
        assert_eq!(files[0].size, 3);

        let bytes = watcher.fetch(&files).await.unwrap();
        assert_eq!(bytes[0].as_ref(), b"{}\n");
    }

    #[tokio::test]
    async fn test_missing_source_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("not-yet-mounted");
        let watcher = DirectoryWatcher::new(&source_config(missing.to_str().unwrap(), 10), "t");

        let err = watcher.discover(&ProcessedFiles::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::SourceUnavailable { .. }));

        std::fs::create_dir_all(&missing).unwrap();
        std::fs::write(missing.join("late.json"), b"{}\n").unwrap();
        let files = watcher.discover(&ProcessedFiles::new()).await.unwrap();
        assert_eq!(files.len(), 1);
    }
}
