//! Raw upload storage. The original bytes are kept so a resume can be re-parsed or
//! downloaded later; keys are opaque to callers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::errors::ErrorKind;

const MAX_EXTENSION_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("stored file not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    ObjectStore(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Persists the bytes and returns the key they can be loaded back with.
    async fn save(&self, original_name: &str, bytes: Bytes) -> Result<String, StorageError>;

    async fn load(&self, key: &str) -> Result<Bytes, StorageError>;
}

/// Builds a fresh key that keeps the (sanitized) extension of the uploaded name.
fn storage_key(original_name: &str) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            e.chars()
                .filter(char::is_ascii_alphanumeric)
                .take(MAX_EXTENSION_LEN)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|e| !e.is_empty());

    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !key.starts_with('.')
        && !key.contains("..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Local filesystem
// ────────────────────────────────────────────────────────────────────────────

pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn save(&self, original_name: &str, bytes: Bytes) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let key = storage_key(original_name);
        let path = self.root.join(&key);
        tokio::fs::write(&path, &bytes).await?;

        info!(key = %key, size_bytes = bytes.len(), "Stored upload at {}", path.display());
        Ok(key)
    }

    async fn load(&self, key: &str) -> Result<Bytes, StorageError> {
        validate_key(key)?;
        match tokio::fs::read(self.root.join(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// S3 / MinIO
// ────────────────────────────────────────────────────────────────────────────

pub struct S3FileStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3FileStorage {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn object_key(key: &str) -> String {
        format!("resumes/{key}")
    }
}

#[async_trait]
impl FileStorage for S3FileStorage {
    async fn save(&self, original_name: &str, bytes: Bytes) -> Result<String, StorageError> {
        let key = storage_key(original_name);
        let object_key = Self::object_key(&key);
        let size_bytes = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::ObjectStore(format!("S3 upload failed: {e}")))?;

        info!(size_bytes, "Uploaded resume to s3://{}/{}", self.bucket, object_key);
        Ok(key)
    }

    async fn load(&self, key: &str) -> Result<Bytes, StorageError> {
        validate_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::object_key(key))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::ObjectStore(format!("S3 download failed: {e}"))
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ObjectStore(format!("S3 body read failed: {e}")))?;
        Ok(data.into_bytes())
    }
}
