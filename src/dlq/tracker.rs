//! Rejection tracking with sink integration.
//!
//! Collects the rejections of a batch, emits metrics, writes them to the
//! sink when one is configured and enforces the per-batch limit.

use snafu::prelude::*;
use tracing::warn;

use crate::emit;
use crate::error::{DlqSnafu, PipelineError, TooManyRejectedSnafu};
use crate::metrics::events::{RecordsRejected, RejectStage};

use super::{RejectStats, RejectedRecord, RejectedRecordSink};

/// Records rejections per batch and enforces `max_rejected_per_batch`.
pub struct RejectionTracker {
    sink: Option<RejectedRecordSink>,
    max_rejected_per_batch: usize,
    target: String,
}

impl RejectionTracker {
    /// Create a tracker.
    ///
    /// # Arguments
    /// * `sink` - Optional sink for rejected records
    /// * `max_rejected_per_batch` - Limit per batch (0 = unlimited)
    /// * `target` - Table name for metrics labeling
    pub fn new(
        sink: Option<RejectedRecordSink>,
        max_rejected_per_batch: usize,
        target: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            max_rejected_per_batch,
            target: target.into(),
        }
    }

    /// Record the rejections of one batch.
    ///
    /// The records are written before the limit is checked so an aborted
    /// batch can still be inspected.
    pub async fn record_batch(
        &self,
        batch_id: u64,
        records: &[RejectedRecord],
    ) -> Result<RejectStats, PipelineError> {
        let stats: RejectStats = records.iter().collect();

        for stage in [RejectStage::Decompress, RejectStage::Parse, RejectStage::Conform] {
            let count = stats.get(stage);
            if count > 0 {
                emit!(RecordsRejected {
                    target: self.target.clone(),
                    stage,
                    count: count as u64,
                });
            }
        }

        match &self.sink {
            Some(sink) => sink.write_batch(batch_id, records).await.context(DlqSnafu)?,
            None => {
                for record in records {
                    warn!(
                        table = %self.target,
                        "Rejected {}{} at {} stage: {}",
                        record.path,
                        record.line.map(|l| format!(":{l}")).unwrap_or_default(),
                        record.stage.as_str(),
                        record.reason
                    );
                }
            }
        }

        if stats.total() > 0 {
            warn!(
                table = %self.target,
                "Batch {} rejected {} records (decompress={}, parse={}, conform={})",
                batch_id,
                stats.total(),
                stats.decompress,
                stats.parse,
                stats.conform
            );
        }

        ensure!(
            self.max_rejected_per_batch == 0 || stats.total() <= self.max_rejected_per_batch,
            TooManyRejectedSnafu {
                batch_id,
                count: stats.total(),
                limit: self.max_rejected_per_batch,
            }
        );

        Ok(stats)
    }
}
