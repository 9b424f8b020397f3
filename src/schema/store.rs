//! Persistence of schema versions.
//!
//! Each version is written once to `_schemas/{version:020}.json` under the
//! schema location. A version left behind by a crashed cycle is simply
//! overwritten when the same version number is proposed again.

use futures::TryStreamExt;
use object_store::path::Path;
use snafu::prelude::*;

use crate::error::{
    MissingSchemaVersionSnafu, SchemaDeserializeSnafu, SchemaError, SchemaSerializeSnafu,
    SchemaStoreSnafu,
};
use crate::storage::StorageProvider;

use super::SchemaVersion;

const SCHEMA_DIR: &str = "_schemas";

fn version_path(version: u64) -> Path {
    Path::from(format!("{SCHEMA_DIR}/{version:020}.json"))
}

/// Versioned schema storage.
pub struct SchemaStore {
    storage: StorageProvider,
}

impl SchemaStore {
    pub fn new(storage: StorageProvider) -> Self {
        Self { storage }
    }

    /// Load a specific schema version.
    pub async fn load(&self, version: u64) -> Result<SchemaVersion, SchemaError> {
        let path = version_path(version);
        let bytes = match self.storage.get(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return MissingSchemaVersionSnafu { version }.fail(),
            Err(e) => return Err(e).context(SchemaStoreSnafu),
        };
        serde_json::from_slice(&bytes).context(SchemaDeserializeSnafu {
            path: path.to_string(),
        })
    }

    /// Persist a schema version.
    pub async fn save(&self, schema: &SchemaVersion) -> Result<(), SchemaError> {
        let content = serde_json::to_vec_pretty(schema).context(SchemaSerializeSnafu)?;
        self.storage
            .atomic_write(&version_path(schema.version), content)
            .await
            .context(SchemaStoreSnafu)
    }

    /// Versions present in the store, ascending.
    pub async fn versions(&self) -> Result<Vec<u64>, SchemaError> {
        let mut versions: Vec<u64> = self
            .storage
            .list(Some(SCHEMA_DIR))
            .try_filter_map(|meta| async move {
                Ok(meta
                    .location
                    .filename()
                    .and_then(|name| name.strip_suffix(".json"))
                    .and_then(|stem| stem.parse::<u64>().ok()))
            })
            .try_collect()
            .await
            .context(SchemaStoreSnafu)?;
        versions.sort_unstable();
        Ok(versions)
    }

    /// Remove every stored version.
    pub async fn clear(&self) -> Result<usize, SchemaError> {
        self.storage.delete_all().await.context(SchemaStoreSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> SchemaStore {
        SchemaStore::new(
            StorageProvider::for_url_with_options(dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap(),
        )
    }

    fn schema(version: u64) -> SchemaVersion {
        SchemaVersion {
            version,
            columns: vec![Column {
                name: "CustomerID".to_string(),
                column_type: ColumnType::Int,
                added_in: 1,
            }],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let v2 = schema(2);
        store.save(&schema(1)).await.unwrap();
        store.save(&v2).await.unwrap();

        assert_eq!(store.load(2).await.unwrap(), v2);
        assert_eq!(store.versions().await.unwrap(), [1, 2]);
        assert!(dir.path().join("_schemas/00000000000000000001.json").exists());
    }

    #[tokio::test]
    async fn test_missing_version() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let err = store.load(7).await.unwrap_err();
        assert!(matches!(err, SchemaError::MissingSchemaVersion { version: 7 }));
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store.save(&schema(1)).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.versions().await.unwrap().is_empty());
    }
}
