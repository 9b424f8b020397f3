//! Log-structured append-only table.
//!
//! Layout under the table root:
//!
//! ```text
//! data/part-{batch:020}.ndjson[.gz|.zst]   rows of one batch
//! _floe_log/{batch:020}.json               manifest of one committed batch
//! ```
//!
//! Data files are staged with plain overwrites, so a replayed batch lands
//! on the same path. Manifests are created with a conditional put and never
//! rewritten; a batch is committed exactly when its manifest exists.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::PutPayload;
use object_store::path::Path;
use serde_json::{Map, Value};
use snafu::prelude::*;
use tracing::{debug, info};

use crate::error::{
    CorruptRowSnafu, DataDecodeSnafu, DataEncodeSnafu, ManifestDeserializeSnafu,
    ManifestSerializeSnafu, TableError, TableReadSnafu, TableWriteSnafu,
};
use crate::schema::SchemaVersion;
use crate::source::CompressionFormat;
use crate::source::compression::decompress_for_path;
use crate::storage::StorageProvider;

use super::{BatchManifest, PublishOutcome, Row, TableSink};

const DATA_DIR: &str = "data";
const LOG_DIR: &str = "_floe_log";

fn manifest_path(batch_id: u64) -> Path {
    Path::from(format!("{LOG_DIR}/{batch_id:020}.json"))
}

fn data_file_name(batch_id: u64, compression: CompressionFormat) -> String {
    format!(
        "{DATA_DIR}/part-{batch_id:020}.ndjson{}",
        compression.codec().extension()
    )
}

/// Rows of the table projected onto its current schema.
#[derive(Debug, Clone, Default)]
pub struct TableScan {
    /// Schema of the latest committed batch.
    pub schema: Option<SchemaVersion>,
    pub rows: Vec<Row>,
}

impl TableScan {
    /// Values of one column, in commit order.
    pub fn column(&self, name: &str) -> Vec<&Value> {
        self.rows.iter().filter_map(|row| row.get(name)).collect()
    }
}

/// Append-only table on object storage.
pub struct AppendTable {
    storage: StorageProvider,
    compression: CompressionFormat,
    name: String,
}

impl AppendTable {
    pub fn new(
        storage: StorageProvider,
        compression: CompressionFormat,
        name: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            compression,
            name: name.into(),
        }
    }

    /// Committed manifests in batch order.
    pub async fn manifests(&self) -> Result<Vec<BatchManifest>, TableError> {
        let mut paths: Vec<Path> = self
            .storage
            .list(Some(LOG_DIR))
            .try_filter_map(|meta| async move {
                Ok(meta
                    .location
                    .filename()
                    .is_some_and(|name| name.ends_with(".json"))
                    .then_some(meta.location))
            })
            .try_collect()
            .await
            .context(TableReadSnafu)?;
        paths.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));

        let mut manifests = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = self.storage.get(&path).await.context(TableReadSnafu)?;
            let manifest: BatchManifest =
                serde_json::from_slice(&bytes).context(ManifestDeserializeSnafu {
                    path: path.to_string(),
                })?;
            manifests.push(manifest);
        }
        Ok(manifests)
    }

    /// Read every committed row, projected onto the current schema.
    ///
    /// Columns added after a row was written read as null.
    pub async fn scan(&self) -> Result<TableScan, TableError> {
        let manifests = self.manifests().await?;
        let schema = manifests.iter().rev().find_map(|m| m.schema.clone());

        let mut rows = Vec::new();
        for manifest in &manifests {
            let Some(data_file) = &manifest.data_file else {
                continue;
            };
            for stored in self.read_data_file(data_file).await? {
                rows.push(project(stored, schema.as_ref()));
            }
        }

        Ok(TableScan { schema, rows })
    }

    async fn read_data_file(&self, data_file: &str) -> Result<Vec<Map<String, Value>>, TableError> {
        let bytes = self
            .storage
            .get(&Path::from(data_file))
            .await
            .context(TableReadSnafu)?;
        let content = decompress_for_path(data_file, &bytes).context(DataDecodeSnafu {
            path: data_file,
        })?;

        content
            .split(|b| *b == b'\n')
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .map(|(index, line)| {
                serde_json::from_slice(line).context(CorruptRowSnafu {
                    path: data_file,
                    line: index + 1,
                })
            })
            .collect()
    }
}

fn project(mut stored: Map<String, Value>, schema: Option<&SchemaVersion>) -> Row {
    match schema {
        Some(schema) => schema
            .columns
            .iter()
            .map(|c| (c.name.clone(), stored.remove(&c.name).unwrap_or(Value::Null)))
            .collect(),
        None => stored.into_iter().collect(),
    }
}

#[async_trait]
impl TableSink for AppendTable {
    async fn stage(
        &self,
        batch_id: u64,
        schema: Option<&SchemaVersion>,
        rows: &[Row],
        source_files: Vec<String>,
    ) -> Result<BatchManifest, TableError> {
        let data_file = if rows.is_empty() {
            None
        } else {
            let mut content = Vec::new();
            for row in rows {
                serde_json::to_writer(&mut content, row).context(ManifestSerializeSnafu)?;
                content.push(b'\n');
            }
            let encoded = self
                .compression
                .codec()
                .compress(&content)
                .context(DataEncodeSnafu)?;

            let name = data_file_name(batch_id, self.compression);
            self.storage
                .put_payload(&Path::from(name.as_str()), PutPayload::from(Bytes::from(encoded)))
                .await
                .context(TableWriteSnafu)?;
            debug!(
                table = %self.name,
                "Staged {} rows for batch {} in {}",
                rows.len(),
                batch_id,
                name
            );
            Some(name)
        };

        Ok(BatchManifest {
            batch_id,
            schema: schema.cloned(),
            data_file,
            record_count: rows.len() as u64,
            source_files,
            committed_at: Utc::now(),
        })
    }

    async fn publish(&self, manifest: &BatchManifest) -> Result<PublishOutcome, TableError> {
        let content = serde_json::to_vec_pretty(manifest).context(ManifestSerializeSnafu)?;
        let path = manifest_path(manifest.batch_id);

        match self
            .storage
            .put_if_absent(&path, PutPayload::from(Bytes::from(content)))
            .await
        {
            Ok(()) => {
                info!(
                    table = %self.name,
                    "Published batch {} ({} records)",
                    manifest.batch_id,
                    manifest.record_count
                );
                Ok(PublishOutcome::Published)
            }
            Err(e) if e.is_already_exists() => {
                debug!(
                    table = %self.name,
                    "Batch {} already in the table log",
                    manifest.batch_id
                );
                Ok(PublishOutcome::AlreadyCommitted)
            }
            Err(e) => Err(e).context(TableWriteSnafu),
        }
    }

    async fn is_committed(&self, batch_id: u64) -> Result<bool, TableError> {
        self.storage
            .exists(&manifest_path(batch_id))
            .await
            .context(TableReadSnafu)
    }

    async fn committed_manifest(
        &self,
        batch_id: u64,
    ) -> Result<Option<BatchManifest>, TableError> {
        let path = manifest_path(batch_id);
        let bytes = match self.storage.get(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e).context(TableReadSnafu),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .context(ManifestDeserializeSnafu {
                path: path.to_string(),
            })
    }

    async fn drop_table(&self) -> Result<usize, TableError> {
        self.storage.delete_all().await.context(TableWriteSnafu)
    }

    fn table_name(&self) -> &str {
        &self.name
    }
}
