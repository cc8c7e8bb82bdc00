use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use validator::ValidateEmail;

use crate::config::LifecycleConfig;
use crate::db::RecordIndex;
use crate::models::{FileRecord, NotificationStatus, UploadReceipt, UploadRequest};
use crate::notify::{Notifier, UploadNotice};
use crate::storage::{generate_storage_key, BlobStore};
use crate::types::{AppError, AppResult};
use crate::utils::with_deadline;

/// Stores a file, indexes it and tells the recipient where to fetch it.
pub struct UploadPipeline {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordIndex>,
    notifier: Arc<dyn Notifier>,
    lifecycle: LifecycleConfig,
    storage_timeout: Duration,
}

impl UploadPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordIndex>,
        notifier: Arc<dyn Notifier>,
        lifecycle: LifecycleConfig,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            blobs,
            records,
            notifier,
            lifecycle,
            storage_timeout,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.lifecycle.max_upload_bytes
    }

    /// Blob write, then record write, then a best-effort notification.
    /// `public_base` is the scheme and authority the download link is built on.
    pub async fn handle_upload(&self, request: UploadRequest, public_base: &str) -> AppResult<UploadReceipt> {
        let recipient = request.recipient_email.trim().to_string();
        validate_request(&request.original_name, &recipient)?;

        if request.data.len() > self.lifecycle.max_upload_bytes {
            return Err(AppError::PayloadTooLarge {
                limit: self.lifecycle.max_upload_bytes,
            });
        }

        // Unparsable client-supplied types are replaced rather than echoed on download.
        let content_type = request
            .content_type
            .filter(|ct| ct.parse::<mime::Mime>().is_ok())
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
        let storage_key = generate_storage_key(&request.original_name);
        let size = request.data.len();

        let written = with_deadline("blob write", self.storage_timeout, async {
            self.blobs
                .put(&storage_key, request.data, &content_type)
                .await
                .map_err(|e| AppError::StorageWrite(e.to_string()))
        })
        .await;
        // A write that failed or timed out on our side may still land upstream.
        if let Err(err) = written {
            self.discard_orphan(&storage_key).await;
            return Err(err);
        }

        let record = FileRecord::new(
            storage_key,
            request.original_name,
            content_type,
            size,
            recipient,
            self.lifecycle.record_ttl(),
        );

        let indexed = with_deadline("record write", self.storage_timeout, async {
            self.records
                .insert(&record)
                .await
                .map_err(|e| AppError::StorageWrite(e.to_string()))
        })
        .await;
        if let Err(err) = indexed {
            self.discard_orphan(&record.storage_key).await;
            return Err(err);
        }

        info!(
            record_id = %record.id,
            storage_key = %record.storage_key,
            size_bytes = record.size_bytes,
            "File stored"
        );

        let download_url = format!("{}/download/{}", public_base.trim_end_matches('/'), record.id);
        let notification = self.send_notice(&record, &download_url).await;

        Ok(UploadReceipt {
            record,
            download_url,
            notification,
        })
    }

    /// Compensating delete for a blob that has no record to go with it.
    async fn discard_orphan(&self, storage_key: &str) {
        let deleted = with_deadline("blob delete", self.storage_timeout, async {
            self.blobs
                .delete(storage_key)
                .await
                .map_err(|e| AppError::StorageWrite(e.to_string()))
        })
        .await;

        match deleted {
            Ok(()) => warn!(storage_key, "Upload failed, removed orphaned blob"),
            Err(e) => error!(storage_key, error = %e, "Upload failed and orphaned blob could not be removed"),
        }
    }

    async fn send_notice(&self, record: &FileRecord, download_url: &str) -> NotificationStatus {
        let notice = UploadNotice {
            recipient: record.recipient_email.clone(),
            file_name: record.original_name.clone(),
            download_url: download_url.to_string(),
            expires_at: record.expires_at,
        };

        match self.notifier.notify(&notice).await {
            Ok(()) => NotificationStatus::Sent,
            Err(e) => {
                let failure = AppError::Notification(e.to_string());
                warn!(record_id = %record.id, error = %failure, "Notification not delivered");
                NotificationStatus::Failed(failure.to_string())
            }
        }
    }
}

fn validate_request(original_name: &str, recipient: &str) -> AppResult<()> {
    if original_name.trim().is_empty() {
        return Err(AppError::ClientInput("No file uploaded".to_string()));
    }
    if recipient.is_empty() {
        return Err(AppError::ClientInput("Email is required".to_string()));
    }
    if !recipient.validate_email() {
        return Err(AppError::ClientInput("Email address is not valid".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{MemoryRecordIndex, RecordIndexError, RecordIndexResult};
    use crate::notify::{LogNotifier, NotifyError};
    use crate::storage::{BlobDownload, MemoryBlobStore, StorageResult};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    struct FailingIndex;

    #[async_trait]
    impl RecordIndex for FailingIndex {
        async fn insert(&self, _record: &FileRecord) -> RecordIndexResult<()> {
            Err(RecordIndexError::Unavailable("connection refused".to_string()))
        }
        async fn get(&self, _id: Uuid) -> RecordIndexResult<Option<FileRecord>> {
            Ok(None)
        }
        async fn list_expired(&self, _now: DateTime<Utc>) -> RecordIndexResult<Vec<FileRecord>> {
            Ok(Vec::new())
        }
        async fn delete(&self, _id: Uuid) -> RecordIndexResult<bool> {
            Ok(false)
        }
        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    /// Stores the blob, then acknowledges long after any reasonable deadline.
    struct SlowAckBlobs {
        inner: Arc<MemoryBlobStore>,
    }

    #[async_trait]
    impl BlobStore for SlowAckBlobs {
        async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
            self.inner.put(key, data, content_type).await?;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.inner.delete(key).await
        }
        async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String> {
            self.inner.presign_get(key, ttl).await
        }
        async fn fetch_signed(&self, url: &str) -> StorageResult<BlobDownload> {
            self.inner.fetch_signed(url).await
        }
        fn backend_name(&self) -> &'static str {
            "slow-ack"
        }
    }

    struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        async fn notify(&self, _notice: &UploadNotice) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("550 mailbox unavailable".to_string()))
        }
        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    fn pipeline(
        blobs: Arc<MemoryBlobStore>,
        records: Arc<dyn RecordIndex>,
        notifier: Arc<dyn Notifier>,
    ) -> UploadPipeline {
        let config = Config::in_memory();
        UploadPipeline::new(blobs, records, notifier, config.lifecycle, Duration::from_secs(30))
    }

    fn request(data: &'static [u8], email: &str) -> UploadRequest {
        UploadRequest {
            data: Bytes::from_static(data),
            content_type: Some("text/plain".to_string()),
            original_name: "hello.txt".to_string(),
            recipient_email: email.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upload_stores_blob_and_record() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordIndex::new());
        let pipeline = pipeline(blobs.clone(), records.clone(), Arc::new(LogNotifier));

        let receipt = pipeline
            .handle_upload(request(b"hello world!", "a@example.com"), "https://sendit.example/")
            .await
            .unwrap();

        assert_eq!(receipt.notification, NotificationStatus::Sent);
        assert_eq!(
            receipt.download_url,
            format!("https://sendit.example/download/{}", receipt.record.id)
        );
        assert_eq!(receipt.record.size_bytes, 12);
        assert_eq!(
            receipt.record.expires_at - receipt.record.created_at,
            chrono::Duration::days(7)
        );
        assert!(blobs.contains(&receipt.record.storage_key).await);
        assert_eq!(records.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_email_has_no_side_effects() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordIndex::new());
        let pipeline = pipeline(blobs.clone(), records.clone(), Arc::new(LogNotifier));

        for email in ["", "   ", "not-an-email"] {
            let err = pipeline
                .handle_upload(request(b"x", email), "https://sendit.example")
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::ClientInput(_)), "{email:?}");
        }
        assert!(blobs.is_empty().await);
        assert!(records.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_payload_never_reaches_storage() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut lifecycle = Config::in_memory().lifecycle;
        lifecycle.max_upload_bytes = 4;
        let pipeline = UploadPipeline::new(
            blobs.clone(),
            Arc::new(MemoryRecordIndex::new()),
            Arc::new(LogNotifier),
            lifecycle,
            Duration::from_secs(30),
        );

        let err = pipeline
            .handle_upload(request(b"hello", "a@example.com"), "https://sendit.example")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 4 }));
        assert!(blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_record_failure_removes_orphaned_blob() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let pipeline = pipeline(blobs.clone(), Arc::new(FailingIndex), Arc::new(LogNotifier));

        let err = pipeline
            .handle_upload(request(b"hello", "a@example.com"), "https://sendit.example")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StorageWrite(_)));
        assert!(blobs.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_blob_write_is_cleaned_up_after_timeout() {
        let inner = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordIndex::new());
        let pipeline = UploadPipeline::new(
            Arc::new(SlowAckBlobs { inner: inner.clone() }),
            records.clone(),
            Arc::new(LogNotifier),
            Config::in_memory().lifecycle,
            Duration::from_secs(30),
        );

        let err = pipeline
            .handle_upload(request(b"hello", "a@example.com"), "https://sendit.example")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout { operation: "blob write", .. }));
        assert!(err.is_retryable());
        assert!(inner.is_empty().await);
        assert!(records.is_empty().await);
    }

    #[tokio::test]
    async fn test_notification_failure_is_soft() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordIndex::new());
        let pipeline = pipeline(blobs.clone(), records.clone(), Arc::new(BrokenNotifier));

        let receipt = pipeline
            .handle_upload(request(b"hello", "a@example.com"), "https://sendit.example")
            .await
            .unwrap();
        assert!(matches!(receipt.notification, NotificationStatus::Failed(_)));
        assert_eq!(records.len().await, 1);
        assert_eq!(blobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_bogus_content_type_falls_back() {
        let records = Arc::new(MemoryRecordIndex::new());
        let pipeline = pipeline(Arc::new(MemoryBlobStore::new()), records.clone(), Arc::new(LogNotifier));

        let mut req = request(b"x", "a@example.com");
        req.content_type = Some("not a mime\r\n".to_string());
        let receipt = pipeline.handle_upload(req, "https://sendit.example").await.unwrap();
        assert_eq!(receipt.record.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_missing_content_type_falls_back() {
        let records = Arc::new(MemoryRecordIndex::new());
        let pipeline = pipeline(Arc::new(MemoryBlobStore::new()), records.clone(), Arc::new(LogNotifier));

        let mut req = request(b"", "a@example.com");
        req.content_type = None;
        let receipt = pipeline.handle_upload(req, "https://sendit.example").await.unwrap();
        assert_eq!(receipt.record.content_type, "application/octet-stream");
        assert_eq!(receipt.record.size_bytes, 0);
    }
}
