//! Backend constructors for local filesystem, S3, GCS and Azure.

use object_store::ObjectStore;
use object_store::RetryConfig;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{BackendConfigSnafu, IoSnafu, ObjectStoreSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// Local filesystem configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub path: String,
}

/// S3 storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub key: Option<Path>,
}

/// Google Cloud Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsConfig {
    pub bucket: String,
    pub key: Option<Path>,
}

/// Azure Blob Storage configuration.
///
/// The account comes from the URL for `abfss://` locations and from the
/// environment or storage options for `az://` ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub account: Option<String>,
    pub container: String,
    pub key: Option<Path>,
}

fn with_key(base: String, key: Option<&Path>) -> String {
    match key {
        Some(key) => format!("{base}/{key}"),
        None => base,
    }
}

impl StorageProvider {
    pub(super) async fn construct_local(
        config: LocalConfig,
        create: bool,
    ) -> Result<Self, StorageError> {
        if create {
            tokio::fs::create_dir_all(&config.path)
                .await
                .context(IoSnafu)?;
        }

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(LocalFileSystem::new_with_prefix(&config.path).context(ObjectStoreSnafu)?);
        let canonical_url = format!("file://{}", config.path);

        Ok(Self {
            config: BackendConfig::Local(config),
            object_store,
            canonical_url,
        })
    }

    pub(super) fn construct_s3(
        config: S3Config,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig::default());
        for (key, value) in options {
            let key = key.parse().context(BackendConfigSnafu { backend: "S3" })?;
            builder = builder.with_config(key, value);
        }

        let object_store: Arc<dyn ObjectStore> = Arc::new(
            builder
                .build()
                .context(BackendConfigSnafu { backend: "S3" })?,
        );
        let canonical_url = with_key(format!("s3://{}", config.bucket), config.key.as_ref());

        Ok(Self {
            config: BackendConfig::S3(config),
            object_store,
            canonical_url,
        })
    }

    pub(super) fn construct_gcs(
        config: GcsConfig,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig::default());
        if let Ok(service_account_key) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            debug!("Constructing GCS builder with service account key");
            builder = builder.with_service_account_key(&service_account_key);
        }
        for (key, value) in options {
            let key = key.parse().context(BackendConfigSnafu { backend: "GCS" })?;
            builder = builder.with_config(key, value);
        }

        let object_store: Arc<dyn ObjectStore> = Arc::new(
            builder
                .build()
                .context(BackendConfigSnafu { backend: "GCS" })?,
        );
        let canonical_url = with_key(format!("gs://{}", config.bucket), config.key.as_ref());

        Ok(Self {
            config: BackendConfig::Gcs(config),
            object_store,
            canonical_url,
        })
    }

    pub(super) fn construct_azure(
        config: AzureConfig,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let mut builder = MicrosoftAzureBuilder::from_env()
            .with_container_name(&config.container)
            .with_retry(RetryConfig::default());
        if let Some(account) = &config.account {
            builder = builder.with_account(account);
        }
        for (key, value) in options {
            let key = key.parse().context(BackendConfigSnafu { backend: "Azure" })?;
            builder = builder.with_config(key, value);
        }

        let object_store: Arc<dyn ObjectStore> = Arc::new(
            builder
                .build()
                .context(BackendConfigSnafu { backend: "Azure" })?,
        );
        let canonical_url = with_key(format!("az://{}", config.container), config.key.as_ref());

        Ok(Self {
            config: BackendConfig::Azure(config),
            object_store,
            canonical_url,
        })
    }
}
