//! Blob store adapter for uploaded images.
//!
//! Images are written under generated `image-{uuid}` keys inside one fixed
//! bucket. The key doubles as the request id on the bus and in the results
//! collection, so a stored result can always be correlated back to its bytes.

use crate::config::BlobConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Errors raised by the blob store adapter
#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("Failed to store blob {key}: {message}")]
    PutFailed { key: String, message: String },
}

/// Seam for writing image bytes to durable storage
#[async_trait]
pub trait BlobWriter: Send + Sync {
    /// Generate a fresh blob key, unique per ingestion
    fn generate_key(&self) -> String;

    /// The bucket blobs are written into
    fn bucket(&self) -> &str;

    /// Write `data` under `key`, overwriting nothing (keys are unique)
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobStoreError>;
}

/// S3-compatible blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new blob store against the configured bucket
    pub async fn new(config: &BlobConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl BlobWriter for S3BlobStore {
    fn generate_key(&self) -> String {
        format!("image-{}", Uuid::new_v4())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobStoreError> {
        debug!("Writing blob");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| BlobStoreError::PutFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}
