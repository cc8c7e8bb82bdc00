// S3-compatible blob store backed by rust-s3

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tracing::{debug, info};

use super::signed_fetch::SignedUrlFetcher;
use super::{BlobDownload, BlobStore, StorageError, StorageResult};
use crate::config::StorageConfig;

/// Longest presigned URL lifetime S3 accepts (7 days).
const MAX_PRESIGN_SECS: u64 = 7 * 24 * 60 * 60;

pub struct S3BlobStore {
    bucket: Bucket,
    fetcher: SignedUrlFetcher,
}

impl S3BlobStore {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let credentials = Credentials::new(
            config.s3_access_key_id.as_deref(),
            config.s3_secret_access_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(format!("invalid S3 credentials: {}", e)))?;

        let region = match &config.s3_endpoint {
            Some(endpoint) => Region::Custom {
                region: config.s3_region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .s3_region
                .parse()
                .map_err(|e| StorageError::Backend(format!("invalid S3 region: {}", e)))?,
        };

        let mut bucket = Bucket::new(&config.s3_bucket, region, credentials)
            .map_err(map_s3_error)?;
        if config.s3_endpoint.is_some() {
            // MinIO and most self-hosted gateways only speak path-style.
            bucket = bucket.with_path_style();
        }

        let fetcher = SignedUrlFetcher::new(config.timeout())?;

        info!(bucket = %config.s3_bucket, region = %config.s3_region, "S3 blob store configured");
        Ok(Self { bucket, fetcher })
    }
}

fn map_s3_error(error: S3Error) -> StorageError {
    match error {
        S3Error::HttpFailWithBody(404, body) => StorageError::NotFound(body),
        S3Error::HttpFailWithBody(code, body) => {
            StorageError::Backend(format!("S3 returned {}: {}", code, body))
        }
        other => StorageError::Transport(other.to_string()),
    }
}

fn ensure_success(operation: &str, status: u16) -> StorageResult<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else if status == 404 {
        Err(StorageError::NotFound(operation.to_string()))
    } else {
        Err(StorageError::Backend(format!("{} returned status {}", operation, status)))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        debug!(key, size = data.len(), "Uploading object to S3");
        // A single PUT is atomic on S3: the object is visible in full or not at all.
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(map_s3_error)?;
        ensure_success("put_object", response.status_code())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!(key, "Deleting object from S3");
        match self.bucket.delete_object(key).await {
            Ok(response) => match ensure_success("delete_object", response.status_code()) {
                Err(StorageError::NotFound(_)) => Ok(()),
                other => other,
            },
            Err(e) => match map_s3_error(e) {
                StorageError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let secs = ttl.as_secs().clamp(1, MAX_PRESIGN_SECS) as u32;
        self.bucket
            .presign_get(key, secs, None)
            .await
            .map_err(map_s3_error)
    }

    async fn fetch_signed(&self, url: &str) -> StorageResult<BlobDownload> {
        self.fetcher.fetch(url).await
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
