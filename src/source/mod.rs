//! Source side: discovering, fetching and parsing NDJSON files.

pub mod compression;
pub mod reader;
pub mod state;
pub mod watcher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use compression::{CompressionCodec, CompressionFormat};
pub use reader::{FileRecords, MalformedLine, Record, read_ndjson};
pub use state::{ProcessedFile, ProcessedFiles};
pub use watcher::DirectoryWatcher;

/// A pending file found in the source directory.
///
/// A file counts as processed once the checkpoint records it in
/// [`ProcessedFiles`]; discovery never returns such a file again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the source root.
    pub path: String,
    pub size: u64,
    pub discovered_at: DateTime<Utc>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, size: u64, discovered_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            discovered_at,
        }
    }
}

/// Files processed together under one batch id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: u64,
    pub files: Vec<SourceFile>,
}

impl Batch {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
