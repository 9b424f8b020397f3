//! Rejected record types.
//!
//! Contains the record written for every rejected line or file and the
//! per-stage counters aggregated over a batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::events::RejectStage;

/// A line or whole file that could not be written to the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Source file the data came from.
    pub path: String,
    /// 1-based line number; absent when the whole file was rejected.
    pub line: Option<usize>,
    /// Raw line content, when there is one.
    pub raw: Option<String>,
    pub reason: String,
    pub stage: RejectStage,
    pub batch_id: u64,
    pub rejected_at: DateTime<Utc>,
}

impl RejectedRecord {
    /// A whole file that failed to decompress.
    pub fn file(path: impl Into<String>, reason: impl Into<String>, batch_id: u64) -> Self {
        Self {
            path: path.into(),
            line: None,
            raw: None,
            reason: reason.into(),
            stage: RejectStage::Decompress,
            batch_id,
            rejected_at: Utc::now(),
        }
    }

    /// A single line rejected at `stage`.
    pub fn line(
        path: impl Into<String>,
        line: usize,
        raw: impl Into<String>,
        reason: impl Into<String>,
        stage: RejectStage,
        batch_id: u64,
    ) -> Self {
        Self {
            path: path.into(),
            line: Some(line),
            raw: Some(raw.into()),
            reason: reason.into(),
            stage,
            batch_id,
            rejected_at: Utc::now(),
        }
    }
}

/// Rejection counts by stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectStats {
    pub decompress: usize,
    pub parse: usize,
    pub conform: usize,
}

impl RejectStats {
    pub fn increment(&mut self, stage: RejectStage) {
        match stage {
            RejectStage::Decompress => self.decompress += 1,
            RejectStage::Parse => self.parse += 1,
            RejectStage::Conform => self.conform += 1,
        }
    }

    pub fn get(&self, stage: RejectStage) -> usize {
        match stage {
            RejectStage::Decompress => self.decompress,
            RejectStage::Parse => self.parse,
            RejectStage::Conform => self.conform,
        }
    }

    pub fn total(&self) -> usize {
        self.decompress + self.parse + self.conform
    }
}

impl<'a> FromIterator<&'a RejectedRecord> for RejectStats {
    fn from_iter<I: IntoIterator<Item = &'a RejectedRecord>>(iter: I) -> Self {
        let mut stats = Self::default();
        for record in iter {
            stats.increment(record.stage);
        }
        stats
    }
}
