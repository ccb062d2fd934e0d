use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::PathBuf;
use uuid::Uuid;

const ARTIFACT_CONTENT_TYPE: &str = "image/jpeg";

/// Destination for transformed artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persist `bytes` and return the location they can be read back from.
    async fn put(&self, bytes: &[u8]) -> Result<String, StoreError>;
}

/// Writes artifacts as `<root>/<uuid>.jpg` on the local filesystem.
pub struct LocalDirSink {
    root: PathBuf,
}

impl LocalDirSink {
    /// Create the sink, making sure the directory exists.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }
}

#[async_trait]
impl ArtifactSink for LocalDirSink {
    async fn put(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let path = self.root.join(format!("{}.jpg", Uuid::new_v4()));
        tokio::fs::write(&path, bytes).await?;
        Ok(path.display().to_string())
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    public_base: String,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StoreError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StoreError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base: format!("{}/{}", endpoint.trim_end_matches('/'), bucket_name),
        })
    }

    /// Upload bytes under `key`.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StoreError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;

        let code = response.status_code();
        if !(200..300).contains(&code) {
            return Err(StoreError::Rejected(code));
        }
        Ok(())
    }

    /// Download an object.
    pub async fn download(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.bucket.get_object(key).await?;
        Ok(response.to_vec())
    }
}

#[async_trait]
impl ArtifactSink for R2Client {
    async fn put(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let key = format!("artifacts/{}.jpg", Uuid::new_v4());
        self.upload(&key, bytes, ARTIFACT_CONTENT_TYPE).await?;
        Ok(format!("{}/{}", self.public_base, key))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object store rejected write with status {0}")]
    Rejected(u16),

    #[error("Filesystem write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Write failures are transient from the pipeline's point of view;
    /// only misconfiguration is hopeless.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
