// Opens presigned HTTP(S) URLs and exposes the body as a stream

use std::time::Duration;

use futures::TryStreamExt;
use reqwest::{header, Client, StatusCode};
use tracing::debug;

use super::{BlobDownload, StorageError, StorageResult};

/// HTTP client used to read blobs through their signed URLs.
#[derive(Clone)]
pub struct SignedUrlFetcher {
    client: Client,
}

impl SignedUrlFetcher {
    /// `connect_timeout` bounds connection setup only; the body is streamed
    /// for as long as the caller keeps reading it.
    pub fn new(connect_timeout: Duration) -> StorageResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| StorageError::Transport(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> StorageResult<BlobDownload> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(%status, "Signed url responded");
        match status {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StorageError::NotFound("signed url target".to_string()))
            }
            StatusCode::FORBIDDEN => {
                return Err(StorageError::InvalidSignature(format!(
                    "upstream refused signed url ({})",
                    status
                )))
            }
            s => {
                return Err(StorageError::Backend(format!(
                    "upstream returned {} for signed url",
                    s
                )))
            }
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        let body = response
            .bytes_stream()
            .map_err(|e| StorageError::Transport(e.to_string()));

        Ok(BlobDownload {
            content_type,
            content_length,
            body: Box::pin(body),
        })
    }
}
