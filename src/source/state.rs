//! The set of source files already committed to the table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::SourceFile;

/// Where and when a processed file was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub batch_id: u64,
    pub size: u64,
    pub discovered_at: DateTime<Utc>,
}

/// Processed source files keyed by path relative to the source root.
///
/// Entries are never removed: a file recorded here is immutable and is
/// never offered to a batch again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessedFiles {
    files: BTreeMap<String, ProcessedFile>,
}

impl ProcessedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file as committed in `batch_id`.
    pub fn mark_processed(&mut self, file: &SourceFile, batch_id: u64) {
        self.files.insert(
            file.path.clone(),
            ProcessedFile {
                batch_id,
                size: file.size,
                discovered_at: file.discovered_at,
            },
        );
    }

    pub fn is_processed(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&ProcessedFile> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> SourceFile {
        SourceFile::new(path, 10, Utc::now())
    }

    #[test]
    fn test_mark_and_query() {
        let mut processed = ProcessedFiles::new();
        assert!(processed.is_empty());

        processed.mark_processed(&file("2024/01/a.json"), 1);
        assert!(processed.is_processed("2024/01/a.json"));
        assert!(!processed.is_processed("2024/01/b.json"));
        assert_eq!(processed.get("2024/01/a.json").unwrap().batch_id, 1);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut processed = ProcessedFiles::new();
        processed.mark_processed(&file("a.json"), 3);

        let json = serde_json::to_value(&processed).unwrap();
        assert_eq!(json["a.json"]["batch_id"], 3);

        let back: ProcessedFiles = serde_json::from_value(json).unwrap();
        assert_eq!(back, processed);
    }
}
