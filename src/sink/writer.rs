//! Append writer.
//!
//! Turns the parsed files of a batch into schema-conformed rows, stages
//! them in the table and collects every line that could not be written.

use snafu::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dlq::RejectedRecord;
use crate::error::{BatchConflictSnafu, TableError};
use crate::metrics::events::RejectStage;
use crate::schema::SchemaVersion;
use crate::source::{Batch, FileRecords};

use super::{BatchManifest, PublishOutcome, Row, TableSink, conform_record};

/// A batch staged in the table but not yet committed.
#[derive(Debug, Clone)]
pub struct StagedWrite {
    pub manifest: BatchManifest,
    /// Parse and conform rejections.
    pub rejected: Vec<RejectedRecord>,
    /// Fields dropped because they are not in the schema.
    pub fields_dropped: u64,
    /// The batch was already in the table log and nothing was staged.
    pub already_committed: bool,
}

/// Rows and rejections of one batch.
#[derive(Debug, Default)]
struct ConformedBatch {
    rows: Vec<Row>,
    rejected: Vec<RejectedRecord>,
    fields_dropped: u64,
}

/// Conforms records to the active schema and appends them to a table.
pub struct AppendWriter {
    table: Arc<dyn TableSink>,
    rescued_data_column: Option<String>,
}

impl AppendWriter {
    pub fn new(table: Arc<dyn TableSink>, rescued_data_column: Option<String>) -> Self {
        Self {
            table,
            rescued_data_column,
        }
    }

    fn conform(
        &self,
        batch_id: u64,
        schema: Option<&SchemaVersion>,
        files: &[FileRecords],
    ) -> ConformedBatch {
        let mut out = ConformedBatch::default();

        for file in files {
            for malformed in &file.malformed {
                out.rejected.push(RejectedRecord::line(
                    &file.path,
                    malformed.line,
                    &malformed.raw,
                    &malformed.reason,
                    RejectStage::Parse,
                    batch_id,
                ));
            }

            // Without a schema no record has any field to write.
            let Some(schema) = schema else {
                continue;
            };

            for record in &file.records {
                match conform_record(&record.fields, schema, self.rescued_data_column.as_deref()) {
                    Ok(conformed) => {
                        out.fields_dropped += conformed.dropped_fields as u64;
                        out.rows.push(conformed.row);
                    }
                    Err(e) => out.rejected.push(RejectedRecord::line(
                        &file.path,
                        record.line,
                        serde_json::Value::Object(record.fields.clone()).to_string(),
                        e.to_string(),
                        RejectStage::Conform,
                        batch_id,
                    )),
                }
            }
        }

        out
    }

    /// Conform and stage a batch.
    ///
    /// Staging the same batch again overwrites the earlier attempt, until
    /// the batch is committed. A committed batch is left untouched and its
    /// manifest returned, provided it covers the same source files.
    pub async fn write(
        &self,
        batch: &Batch,
        schema: Option<&SchemaVersion>,
        files: &[FileRecords],
    ) -> Result<StagedWrite, TableError> {
        if let Some(manifest) = self.table.committed_manifest(batch.id).await? {
            ensure!(
                manifest.source_files.iter().map(String::as_str).eq(batch.paths()),
                BatchConflictSnafu { batch_id: batch.id }
            );
            warn!(
                table = %self.table.table_name(),
                "Batch {} is already committed, keeping its data",
                batch.id
            );
            return Ok(StagedWrite {
                manifest,
                rejected: Vec::new(),
                fields_dropped: 0,
                already_committed: true,
            });
        }

        let conformed = self.conform(batch.id, schema, files);

        let manifest = self
            .table
            .stage(
                batch.id,
                schema,
                &conformed.rows,
                batch.paths().map(String::from).collect(),
            )
            .await?;

        debug!(
            table = %self.table.table_name(),
            "Batch {}: {} rows staged, {} rejected, {} fields dropped",
            batch.id,
            manifest.record_count,
            conformed.rejected.len(),
            conformed.fields_dropped
        );

        Ok(StagedWrite {
            manifest,
            rejected: conformed.rejected,
            fields_dropped: conformed.fields_dropped,
            already_committed: false,
        })
    }

    /// Publish a committed manifest to the table log.
    pub async fn publish(&self, manifest: &BatchManifest) -> Result<PublishOutcome, TableError> {
        self.table.publish(manifest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};
    use crate::sink::AppendTable;
    use crate::source::{CompressionFormat, SourceFile, read_ndjson};
    use crate::storage::StorageProvider;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn writer(dir: &TempDir, rescued: Option<&str>) -> (AppendWriter, Arc<AppendTable>) {
        let storage =
            StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap();
        let table = Arc::new(AppendTable::new(storage, CompressionFormat::None, "sales"));
        (
            AppendWriter::new(table.clone(), rescued.map(String::from)),
            table,
        )
    }

    fn schema() -> SchemaVersion {
        SchemaVersion {
            version: 1,
            columns: vec![
                Column {
                    name: "CustomerID".into(),
                    column_type: ColumnType::Int,
                    added_in: 1,
                },
                Column {
                    name: "Amount".into(),
                    column_type: ColumnType::Double,
                    added_in: 1,
                },
            ],
            created_at: Utc::now(),
        }
    }

    fn batch(paths: &[&str]) -> Batch {
        Batch {
            id: 1,
            files: paths
                .iter()
                .map(|p| SourceFile::new(*p, 0, Utc::now()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_bad_lines_are_rejected_and_rest_staged() {
        let dir = TempDir::new().unwrap();
        let (writer, table) = writer(&dir, None).await;

        let files = vec![
            read_ndjson(
                "a.json",
                b"{\"CustomerID\":1,\"Amount\":2.5}\nnot json\n{\"CustomerID\":\"x\"}\n{\"CustomerID\":2,\"Extra\":1}\n",
            )
            .unwrap(),
        ];
        let staged = writer
            .write(&batch(&["a.json"]), Some(&schema()), &files)
            .await
            .unwrap();

        assert_eq!(staged.manifest.record_count, 2);
        assert_eq!(staged.manifest.source_files, ["a.json"]);
        assert_eq!(staged.fields_dropped, 1);

        let stages: Vec<_> = staged.rejected.iter().map(|r| (r.line, r.stage)).collect();
        assert_eq!(
            stages,
            [(Some(2), RejectStage::Parse), (Some(3), RejectStage::Conform)]
        );

        writer.publish(&staged.manifest).await.unwrap();
        let scan = table.scan().await.unwrap();
        assert_eq!(scan.column("Amount"), [&json!(2.5), &serde_json::Value::Null]);
    }

    #[tokio::test]
    async fn test_no_schema_stages_empty_batch() {
        let dir = TempDir::new().unwrap();
        let (writer, _) = writer(&dir, None).await;

        let files = vec![read_ndjson("a.json", b"{}\n").unwrap()];
        let staged = writer.write(&batch(&["a.json"]), None, &files).await.unwrap();
        assert_eq!(staged.manifest.record_count, 0);
        assert!(staged.manifest.data_file.is_none());
    }

    #[tokio::test]
    async fn test_committed_batch_is_not_restaged() {
        let dir = TempDir::new().unwrap();
        let (writer, table) = writer(&dir, None).await;

        let first = vec![read_ndjson("a.json", b"{\"CustomerID\":1,\"Amount\":2.5}\n").unwrap()];
        let staged = writer
            .write(&batch(&["a.json"]), Some(&schema()), &first)
            .await
            .unwrap();
        assert!(!staged.already_committed);
        writer.publish(&staged.manifest).await.unwrap();

        let replay = vec![
            read_ndjson(
                "a.json",
                b"{\"CustomerID\":7,\"Amount\":0.5}\n{\"CustomerID\":8}\nnot json\n",
            )
            .unwrap(),
        ];
        let again = writer
            .write(&batch(&["a.json"]), Some(&schema()), &replay)
            .await
            .unwrap();
        assert!(again.already_committed);
        assert!(again.rejected.is_empty());
        assert_eq!(again.manifest, staged.manifest);

        let scan = table.scan().await.unwrap();
        assert_eq!(scan.column("CustomerID"), [&json!(1)]);
        assert_eq!(scan.column("Amount"), [&json!(2.5)]);
    }

    #[tokio::test]
    async fn test_committed_batch_with_other_files_conflicts() {
        let dir = TempDir::new().unwrap();
        let (writer, _) = writer(&dir, None).await;

        let files = vec![read_ndjson("a.json", b"{\"CustomerID\":1}\n").unwrap()];
        let staged = writer
            .write(&batch(&["a.json"]), Some(&schema()), &files)
            .await
            .unwrap();
        writer.publish(&staged.manifest).await.unwrap();

        let other = vec![read_ndjson("b.json", b"{\"CustomerID\":2}\n").unwrap()];
        let err = writer
            .write(&batch(&["b.json"]), Some(&schema()), &other)
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::BatchConflict { batch_id: 1 }));
    }
}
