use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::counters::CounterStore;
use crate::db::RecordIndex;
use crate::middleware::RateLimiter;
use crate::notify::Notifier;
use crate::services::{DownloadGateway, UploadPipeline};
use crate::storage::BlobStore;

/// Long-lived backend clients, created once at startup and shared by every request.
#[derive(Clone)]
pub struct Backends {
    pub blobs: Arc<dyn BlobStore>,
    pub records: Arc<dyn RecordIndex>,
    pub counters: Arc<dyn CounterStore>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub uploads: Arc<UploadPipeline>,
    pub downloads: Arc<DownloadGateway>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, backends: &Backends) -> Self {
        let storage_timeout = config.storage.timeout();

        let uploads = UploadPipeline::new(
            backends.blobs.clone(),
            backends.records.clone(),
            backends.notifier.clone(),
            config.lifecycle.clone(),
            storage_timeout,
        );
        let downloads = DownloadGateway::new(
            backends.blobs.clone(),
            backends.records.clone(),
            config.lifecycle.signed_url_ttl(),
            storage_timeout,
        );
        let rate_limiter = RateLimiter::new(
            backends.counters.clone(),
            config.rate_limit.clone(),
            storage_timeout,
        );

        Self {
            config,
            uploads: Arc::new(uploads),
            downloads: Arc::new(downloads),
            rate_limiter: Arc::new(rate_limiter),
        }
    }
}

/// Lifecycle metadata for one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub id: Uuid,
    pub storage_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub recipient_email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileRecord {
    /// New record created now, expiring after `ttl`.
    pub fn new(
        storage_key: String,
        original_name: String,
        content_type: String,
        size_bytes: usize,
        recipient_email: String,
        ttl: Duration,
    ) -> Self {
        // Postgres keeps microseconds; truncate so the stored pair stays exact.
        let created_at = Utc::now().trunc_subsecs(6);
        Self::with_creation_time(
            created_at,
            storage_key,
            original_name,
            content_type,
            size_bytes,
            recipient_email,
            ttl,
        )
    }

    pub fn with_creation_time(
        created_at: DateTime<Utc>,
        storage_key: String,
        original_name: String,
        content_type: String,
        size_bytes: usize,
        recipient_email: String,
        ttl: Duration,
    ) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::new_v4(),
            storage_key,
            original_name,
            content_type,
            size_bytes: i64::try_from(size_bytes).unwrap_or(i64::MAX),
            recipient_email,
            created_at,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A validated upload as handed to the pipeline.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub data: bytes::Bytes,
    pub content_type: Option<String>,
    pub original_name: String,
    pub recipient_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationStatus {
    Sent,
    Failed(String),
}

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub record: FileRecord,
    pub download_url: String,
    pub notification: NotificationStatus,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<UploadReceipt> for UploadResponse {
    fn from(receipt: UploadReceipt) -> Self {
        match receipt.notification {
            NotificationStatus::Sent => Self {
                message: "File uploaded and email sent successfully".to_string(),
                download_url: receipt.download_url,
                expires_at: receipt.record.expires_at,
                warning: None,
            },
            NotificationStatus::Failed(_) => Self {
                message: "File uploaded successfully".to_string(),
                download_url: receipt.download_url,
                expires_at: receipt.record.expires_at,
                warning: Some("The notification email could not be sent".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_exactly_ttl_after_creation() {
        let record = FileRecord::new(
            "files/x-hello.txt".to_string(),
            "hello.txt".to_string(),
            "text/plain".to_string(),
            12,
            "a@example.com".to_string(),
            Duration::from_secs(7 * 24 * 60 * 60),
        );
        assert_eq!(record.expires_at - record.created_at, chrono::Duration::days(7));
        assert!(record.expires_at > record.created_at);
        assert_eq!(record.created_at.timestamp_subsec_nanos() % 1000, 0);
    }

    #[test]
    fn test_is_expired_at_boundary() {
        let created = Utc::now().trunc_subsecs(6);
        let record = FileRecord::with_creation_time(
            created,
            "files/k".to_string(),
            "k".to_string(),
            "text/plain".to_string(),
            1,
            "a@example.com".to_string(),
            Duration::from_secs(60),
        );
        assert!(!record.is_expired_at(created));
        assert!(record.is_expired_at(record.expires_at));
        assert!(record.is_expired_at(record.expires_at + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_upload_response_uses_camel_case() {
        let response = UploadResponse {
            message: "ok".to_string(),
            download_url: "https://host/download/1".to_string(),
            expires_at: Utc::now(),
            warning: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("downloadUrl").is_some());
        assert!(json.get("expiresAt").is_some());
        assert!(json.get("warning").is_none());
    }
}
