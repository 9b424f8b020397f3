//! Rejected-records sink.
//!
//! Writes the rejections of each batch as one NDJSON file named after the
//! batch id. A replayed batch overwrites its own file, so the sink never
//! accumulates duplicates across crashes.

use bytes::Bytes;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::config::ErrorHandlingConfig;
use crate::error::{DlqError, DlqSerializeSnafu, DlqStorageSnafu, DlqWriteSnafu};
use crate::storage::StorageProvider;

use super::types::RejectedRecord;

fn batch_file(batch_id: u64) -> Path {
    Path::from(format!("batch-{batch_id:020}.ndjson"))
}

/// Storage-backed sink for rejected records.
pub struct RejectedRecordSink {
    storage: StorageProvider,
}

impl RejectedRecordSink {
    /// Create the sink from configuration.
    ///
    /// Returns `None` if no rejected path is configured.
    pub async fn from_config(config: &ErrorHandlingConfig) -> Result<Option<Self>, DlqError> {
        let Some(path) = &config.rejected_path else {
            return Ok(None);
        };

        let storage =
            StorageProvider::for_url_with_options(path, config.rejected_storage_options.clone())
                .await
                .context(DlqStorageSnafu)?;

        info!("Rejected records will be written to {}", path);
        Ok(Some(Self { storage }))
    }

    /// Write the rejections of one batch, replacing any earlier attempt.
    ///
    /// An empty set removes a file left by an earlier attempt.
    pub async fn write_batch(
        &self,
        batch_id: u64,
        records: &[RejectedRecord],
    ) -> Result<(), DlqError> {
        let path = batch_file(batch_id);
        if records.is_empty() {
            return self.storage.delete(&path).await.context(DlqWriteSnafu);
        }

        let mut ndjson = Vec::new();
        for record in records {
            serde_json::to_writer(&mut ndjson, record).context(DlqSerializeSnafu)?;
            ndjson.push(b'\n');
        }

        self.storage
            .put_payload(&path, PutPayload::from(Bytes::from(ndjson)))
            .await
            .context(DlqWriteSnafu)?;

        debug!("Wrote {} rejected records to {}", records.len(), path);
        Ok(())
    }

    /// Remove every rejection file. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, DlqError> {
        self.storage.delete_all().await.context(DlqWriteSnafu)
    }
}
