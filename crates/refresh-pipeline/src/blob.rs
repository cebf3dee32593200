//! Blob store for staged content, backed by `object_store`.

use std::path::Path as FsPath;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use thiserror::Error;
use tracing::info;

use refresh_types::{BlobBackend, Settings};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl BlobError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BlobError::ObjectStore(object_store::Error::Generic { .. })
        )
    }
}

/// Key/value blob store with list-by-prefix.
///
/// Keys are `/`-separated strings relative to the store prefix.
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    description: String,
}

impl BlobStore {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            prefix: String::new(),
            description: "memory".to_string(),
        }
    }

    pub fn local(root: &FsPath) -> Result<Self, BlobError> {
        std::fs::create_dir_all(root)?;
        let canonical = std::fs::canonicalize(root)?;
        let store = LocalFileSystem::new_with_prefix(&canonical)?;
        info!("Blob store: local backend at {}", canonical.display());
        Ok(Self {
            store: Arc::new(store),
            prefix: String::new(),
            description: format!("file://{}", canonical.display()),
        })
    }

    pub fn s3(bucket: &str, region: &str, prefix: &str) -> Result<Self, BlobError> {
        let store = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket)
            .build()?;
        let prefix = prefix.trim_matches('/').to_string();
        info!("Blob store: S3 backend s3://{}/{} (region: {})", bucket, prefix, region);
        Ok(Self {
            store: Arc::new(store),
            description: format!("s3://{bucket}/{prefix}"),
            prefix,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, BlobError> {
        let blob = &settings.blob;
        let mut store = match blob.backend {
            BlobBackend::Memory => Self::in_memory(),
            BlobBackend::Local => Self::local(&settings.expanded_local_root())?,
            BlobBackend::S3 => {
                let bucket = blob
                    .bucket
                    .as_deref()
                    .ok_or_else(|| BlobError::NotConfigured("blob.bucket not set".into()))?;
                return Self::s3(bucket, &blob.region, &blob.prefix);
            }
        };
        store.prefix = blob.prefix.trim_matches('/').to_string();
        Ok(store)
    }

    pub fn describe(&self) -> &str {
        &self.description
    }

    fn path(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }

    fn relative(&self, location: &Path) -> String {
        let full = location.as_ref();
        if self.prefix.is_empty() {
            return full.to_string();
        }
        full.strip_prefix(&self.prefix)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .unwrap_or_else(|| full.to_string())
    }

    /// Write `data` under `key`, replacing any existing object.
    pub async fn put(&self, key: &str, data: impl Into<Bytes>) -> Result<(), BlobError> {
        self.store
            .put(&self.path(key), PutPayload::from(data.into()))
            .await?;
        Ok(())
    }

    /// Read `key`, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        match self.store.get(&self.path(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys under `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let path = self.path(prefix.trim_end_matches('/'));
        let mut keys = Vec::new();
        let mut stream = self.store.list(Some(&path));
        loop {
            match stream.try_next().await {
                Ok(Some(meta)) => keys.push(self.relative(&meta.location)),
                Ok(None) => break,
                Err(object_store::Error::NotFound { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<(), BlobError> {
        match self.store.delete(&self.path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
