//! Storage abstraction over `object_store`.
//!
//! Every location floe touches (source directory, table, checkpoint,
//! schema store, rejected records) is a [`StorageProvider`] rooted at a URL.
//! Callers always pass paths relative to that root.

mod backends;

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, future::ready};
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

pub use backends::{AzureConfig, GcsConfig, LocalConfig, S3Config};

/// Storage provider rooted at a single location.
#[derive(Clone)]
pub struct StorageProvider {
    config: BackendConfig,
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+?))?/?$";
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+?))?/?$";
const ABFS_URL: &str = r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.+?))?/?$";
const AZURE_URL: &str = r"^az://(?P<container>[a-z0-9\-]+)(/(?P<key>.+?))?/?$";
const FILE_URI: &str = r"^file://(?P<path>/.*)$";

static S3_MATCHER: LazyLock<Regex> = LazyLock::new(|| Regex::new(S3_URL).unwrap());
static GCS_MATCHER: LazyLock<Regex> = LazyLock::new(|| Regex::new(GCS_URL).unwrap());
static ABFS_MATCHER: LazyLock<Regex> = LazyLock::new(|| Regex::new(ABFS_URL).unwrap());
static AZURE_MATCHER: LazyLock<Regex> = LazyLock::new(|| Regex::new(AZURE_URL).unwrap());
static FILE_MATCHER: LazyLock<Regex> = LazyLock::new(|| Regex::new(FILE_URI).unwrap());

/// Backend configuration parsed from a location URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL or filesystem path into a backend configuration.
    ///
    /// Anything without a recognised scheme is treated as a local path;
    /// relative paths resolve against the working directory.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let key = |caps: &regex::Captures| caps.name("key").map(|k| Path::from(k.as_str()));

        if let Some(caps) = S3_MATCHER.captures(url) {
            return Ok(BackendConfig::S3(S3Config {
                bucket: caps["bucket"].to_string(),
                key: key(&caps),
            }));
        }
        if let Some(caps) = GCS_MATCHER.captures(url) {
            return Ok(BackendConfig::Gcs(GcsConfig {
                bucket: caps["bucket"].to_string(),
                key: key(&caps),
            }));
        }
        if let Some(caps) = ABFS_MATCHER.captures(url) {
            return Ok(BackendConfig::Azure(AzureConfig {
                account: Some(caps["account"].to_string()),
                container: caps["container"].to_string(),
                key: key(&caps),
            }));
        }
        if let Some(caps) = AZURE_MATCHER.captures(url) {
            return Ok(BackendConfig::Azure(AzureConfig {
                account: None,
                container: caps["container"].to_string(),
                key: key(&caps),
            }));
        }

        let path = match FILE_MATCHER.captures(url) {
            Some(caps) => caps["path"].to_string(),
            None if url.contains("://") || url.is_empty() => {
                return InvalidUrlSnafu { url }.fail();
            }
            None => url.to_string(),
        };

        let mut path = std::path::PathBuf::from(path);
        if path.is_relative() {
            let cwd = std::env::current_dir().context(crate::error::IoSnafu)?;
            path = cwd.join(path);
        }

        match path.to_str() {
            Some(p) => Ok(BackendConfig::Local(LocalConfig {
                path: p.trim_end_matches('/').to_string(),
            })),
            None => InvalidUrlSnafu { url }.fail(),
        }
    }

    /// Key prefix inside the bucket/container, if any.
    fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Azure(azure) => azure.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }

    /// Check whether two locations are the same or one lies inside the other.
    ///
    /// Keys and local paths compare by whole components, so `/data/in` and
    /// `/data/inbox` do not overlap. An Azure URL without an account matches
    /// any account.
    pub fn overlaps(&self, other: &BackendConfig) -> bool {
        let same_root = match (self, other) {
            (BackendConfig::S3(a), BackendConfig::S3(b)) => a.bucket == b.bucket,
            (BackendConfig::Gcs(a), BackendConfig::Gcs(b)) => a.bucket == b.bucket,
            (BackendConfig::Azure(a), BackendConfig::Azure(b)) => {
                a.container == b.container
                    && match (&a.account, &b.account) {
                        (Some(x), Some(y)) => x == y,
                        _ => true,
                    }
            }
            (BackendConfig::Local(a), BackendConfig::Local(b)) => {
                let (a, b) = (std::path::Path::new(&a.path), std::path::Path::new(&b.path));
                return a.starts_with(b) || b.starts_with(a);
            }
            _ => false,
        };

        same_root
            && match (self.key(), other.key()) {
                (Some(a), Some(b)) => a.prefix_matches(b) || b.prefix_matches(a),
                _ => true,
            }
    }
}

impl StorageProvider {
    /// Create a storage provider for a location floe writes to.
    ///
    /// Local directories are created if missing.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::construct(url, options, true).await
    }

    /// Create a storage provider for a location that must already exist.
    ///
    /// Used for the source directory, where a missing local directory is an
    /// unavailable source rather than something to create.
    pub async fn for_existing_url(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::construct(url, options, false).await
    }

    async fn construct(
        url: &str,
        options: HashMap<String, String>,
        create: bool,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options),
            BackendConfig::Gcs(config) => Self::construct_gcs(config, options),
            BackendConfig::Azure(config) => Self::construct_azure(config, options),
            BackendConfig::Local(config) => Self::construct_local(config, create).await,
        }
    }

    /// The canonical URL of this location, for logging.
    pub fn url(&self) -> &str {
        &self.canonical_url
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List objects under `prefix` (relative to the root), recursively.
    ///
    /// Returned metadata carries locations relative to the root, matching
    /// the contract of `get`/`put`/`delete`.
    pub fn list(
        &self,
        prefix: Option<&str>,
    ) -> impl Stream<Item = Result<ObjectMeta, StorageError>> + '_ {
        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::Success,
        });

        let full_prefix: Option<Path> = match (self.config.key(), prefix) {
            (Some(key), Some(p)) => Some(key.parts().chain(Path::from(p).parts()).collect()),
            (Some(key), None) => Some(key.clone()),
            (None, Some(p)) => Some(Path::from(p)),
            (None, None) => None,
        };
        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        self.object_store
            .list(full_prefix.as_ref())
            .map(move |meta| -> Result<ObjectMeta, StorageError> {
                let mut meta = meta.context(ObjectStoreSnafu)?;
                meta.location = meta.location.parts().skip(key_part_count).collect();
                Ok(meta)
            })
    }

    /// List every object under `prefix`, collected into a vector.
    pub async fn list_all(&self, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, StorageError> {
        self.list(prefix).try_collect().await
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = match self.object_store.get(&path).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        record(StorageOperation::Get, result.is_ok(), start);
        result.context(ObjectStoreSnafu)
    }

    /// Check whether a file exists.
    pub async fn exists(&self, path: &Path) -> Result<bool, StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.head(&path).await;
        record(StorageOperation::Head, result.is_ok(), start);
        match result {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }

    /// Put a payload to a path, overwriting any existing object.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.put(&path, payload).await;
        record(StorageOperation::Put, result.is_ok(), start);
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Create an object only if nothing exists at the path yet.
    ///
    /// Fails with an `AlreadyExists` storage error (see
    /// [`StorageError::is_already_exists`]) when the path is taken.
    pub async fn put_if_absent(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let options = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        let result = self.object_store.put_opts(&path, payload, options).await;
        record(StorageOperation::Put, result.is_ok(), start);
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Atomically write content to a path using temp file + rename.
    ///
    /// The target is never partially written: if the write or rename fails,
    /// the original file (if any) is unchanged.
    pub async fn atomic_write(&self, path: &Path, content: Vec<u8>) -> Result<(), StorageError> {
        let temp_path = Path::from(format!("{path}.tmp"));
        self.put_payload(&temp_path, PutPayload::from(Bytes::from(content)))
            .await?;
        self.rename(&temp_path, path).await
    }

    /// Server-side rename (move) operation.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        let from = self.qualify_path(from);
        let to = self.qualify_path(to);
        let start = Instant::now();
        let result = self.object_store.rename(&from, &to).await;
        record(StorageOperation::Rename, result.is_ok(), start);
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete a file. Deleting a missing file is not an error.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.delete(&path).await;
        record(StorageOperation::Delete, result.is_ok(), start);
        match result {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }

    /// Delete every object under this location. Returns how many were removed.
    pub async fn delete_all(&self) -> Result<usize, StorageError> {
        let objects = self.list_all(None).await?;
        let count = objects.len();
        futures::stream::iter(objects)
            .map(|meta| async move { self.delete(&meta.location).await })
            .buffer_unordered(8)
            .try_for_each(|_| ready(Ok(())))
            .await?;
        Ok(count)
    }
}

fn record(operation: StorageOperation, ok: bool, start: Instant) {
    emit!(StorageRequest {
        operation,
        status: if ok {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        },
    });
    emit!(crate::metrics::events::StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_s3_url_parsing() {
        let config = BackendConfig::parse_url("s3://landing-bucket/sales/raw/").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "landing-bucket");
                assert_eq!(s3.key, Some(Path::from("sales/raw")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_overlapping_locations() {
        let parse = |url: &str| BackendConfig::parse_url(url).unwrap();

        assert!(parse("s3://lake/sales").overlaps(&parse("s3://lake/sales/_checkpoints/")));
        assert!(parse("s3a://lake").overlaps(&parse("s3://lake/sales")));
        assert!(!parse("s3://lake/sales").overlaps(&parse("s3://lake/sales_bronze")));
        assert!(!parse("s3://lake/sales").overlaps(&parse("gs://lake/sales")));

        assert!(parse("az://raw/sales").overlaps(&parse(
            "abfss://raw@lakeacct.dfs.core.windows.net/sales/tables"
        )));
        assert!(!parse("az://raw/sales").overlaps(&parse("az://curated/sales")));

        assert!(parse("/data/in").overlaps(&parse("file:///data/in/")));
        assert!(parse("/data").overlaps(&parse("/data/in/tables")));
        assert!(!parse("/data/in").overlaps(&parse("/data/inbox")));
    }

    #[test]
    fn test_gcs_and_azure_url_parsing() {
        match BackendConfig::parse_url("gs://lake/checkpoints").unwrap() {
            BackendConfig::Gcs(gcs) => {
                assert_eq!(gcs.bucket, "lake");
                assert_eq!(gcs.key, Some(Path::from("checkpoints")));
            }
            _ => panic!("Expected Gcs config"),
        }

        match BackendConfig::parse_url("abfss://raw@lakeacct.dfs.core.windows.net/sales").unwrap() {
            BackendConfig::Azure(azure) => {
                assert_eq!(azure.account.as_deref(), Some("lakeacct"));
                assert_eq!(azure.container, "raw");
                assert_eq!(azure.key, Some(Path::from("sales")));
            }
            _ => panic!("Expected Azure config"),
        }
    }

    #[test]
    fn test_local_url_parsing() {
        let config = BackendConfig::parse_url("file:///data/landing/").unwrap();
        assert_eq!(
            config,
            BackendConfig::Local(LocalConfig {
                path: "/data/landing".to_string()
            })
        );

        let config = BackendConfig::parse_url("/data/landing").unwrap();
        assert!(matches!(config, BackendConfig::Local(_)));

        assert!(BackendConfig::parse_url("ftp://nope").is_err());
    }

    #[tokio::test]
    async fn test_missing_local_source_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("does-not-exist");

        let result =
            StorageProvider::for_existing_url(missing.to_str().unwrap(), HashMap::new()).await;
        assert!(result.is_err());
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_list_returns_relative_paths() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("landing/2024/01");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("a.json"), b"{}").unwrap();

        let url = format!("{}/landing", temp_dir.path().display());
        let storage = StorageProvider::for_url_with_options(&url, HashMap::new())
            .await
            .unwrap();

        let listed = storage.list_all(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].location.as_ref(), "2024/01/a.json");

        let content = storage.get(&listed[0].location).await.unwrap();
        assert_eq!(content.as_ref(), b"{}");
    }

    #[tokio::test]
    async fn test_put_if_absent_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let storage =
            StorageProvider::for_url_with_options(temp_dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap();

        let path = Path::from("_log/00000000000000000001.json");
        storage
            .put_if_absent(&path, PutPayload::from(Bytes::from_static(b"first")))
            .await
            .unwrap();

        let err = storage
            .put_if_absent(&path, PutPayload::from(Bytes::from_static(b"second")))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(storage.get(&path).await.unwrap().as_ref(), b"first");
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let storage =
            StorageProvider::for_url_with_options(temp_dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap();

        let path = Path::from("checkpoint.json");
        storage.atomic_write(&path, b"old".to_vec()).await.unwrap();
        storage.atomic_write(&path, b"new".to_vec()).await.unwrap();

        assert_eq!(storage.get(&path).await.unwrap().as_ref(), b"new");
        assert!(!temp_dir.path().join("checkpoint.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete_all_and_missing_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage =
            StorageProvider::for_url_with_options(temp_dir.path().to_str().unwrap(), HashMap::new())
                .await
                .unwrap();

        storage
            .put_payload(&Path::from("a/1.json"), PutPayload::from(Bytes::from_static(b"1")))
            .await
            .unwrap();
        storage
            .put_payload(&Path::from("b.json"), PutPayload::from(Bytes::from_static(b"2")))
            .await
            .unwrap();

        assert_eq!(storage.delete_all().await.unwrap(), 2);
        assert!(storage.list_all(None).await.unwrap().is_empty());
        storage.delete(&Path::from("b.json")).await.unwrap();
    }
}
