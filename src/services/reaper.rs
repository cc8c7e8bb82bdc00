//! Periodic reclamation of expired uploads
//!
//! Each sweep lists records with `expires_at <= now` and, per record, deletes
//! the blob and then the record. A record whose blob could not be removed is
//! left in place so the next sweep retries it. Both deletes are idempotent,
//! so a record processed twice is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::RecordIndex;
use crate::models::FileRecord;
use crate::storage::BlobStore;
use crate::types::{AppError, AppResult};
use crate::utils::with_deadline;

const SWEEP_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub reclaimed: usize,
    pub failed: usize,
}

pub struct ExpiryReaper {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordIndex>,
    storage_timeout: Duration,
}

impl ExpiryReaper {
    pub fn new(blobs: Arc<dyn BlobStore>, records: Arc<dyn RecordIndex>, storage_timeout: Duration) -> Self {
        Self {
            blobs,
            records,
            storage_timeout,
        }
    }

    pub async fn sweep(&self) -> AppResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let expired = with_deadline("expired record listing", self.storage_timeout, async {
            self.records
                .list_expired(now)
                .await
                .map_err(|e| AppError::StorageRead(e.to_string()))
        })
        .await?;

        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        let outcomes: Vec<bool> = stream::iter(expired)
            .map(|record| async move { self.reclaim(&record).await })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        for reclaimed in outcomes {
            if reclaimed {
                report.reclaimed += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            expired = report.expired,
            reclaimed = report.reclaimed,
            failed = report.failed,
            "Expiry sweep finished"
        );
        Ok(report)
    }

    async fn reclaim(&self, record: &FileRecord) -> bool {
        let blob_deleted = with_deadline("blob delete", self.storage_timeout, async {
            self.blobs
                .delete(&record.storage_key)
                .await
                .map_err(|e| AppError::StorageWrite(e.to_string()))
        })
        .await;
        if let Err(e) = blob_deleted {
            warn!(
                record_id = %record.id,
                storage_key = %record.storage_key,
                error = %e,
                "Blob delete failed, record kept for the next sweep"
            );
            return false;
        }

        let record_deleted = with_deadline("record delete", self.storage_timeout, async {
            self.records
                .delete(record.id)
                .await
                .map_err(|e| AppError::StorageWrite(e.to_string()))
        })
        .await;
        match record_deleted {
            Ok(_) => true,
            Err(e) => {
                error!(record_id = %record.id, error = %e, "Record delete failed");
                false
            }
        }
    }

    /// Run a sweep now and then once per `interval` until the handle is shut down.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            error!(error = %e, "Expiry sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("Expiry reaper stopped");
        });

        ReaperHandle { shutdown_tx, task }
    }
}

pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Expiry reaper task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRecordIndex;
    use crate::storage::{BlobDownload, MemoryBlobStore, StorageError, StorageResult};
    use async_trait::async_trait;
    use bytes::Bytes;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    async fn store(
        blobs: &dyn BlobStore,
        records: &MemoryRecordIndex,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> FileRecord {
        let record = FileRecord::with_creation_time(
            created_at,
            format!("files/{name}"),
            name.to_string(),
            "text/plain".to_string(),
            3,
            "a@example.com".to_string(),
            WEEK,
        );
        blobs
            .put(&record.storage_key, Bytes::from_static(b"abc"), "text/plain")
            .await
            .unwrap();
        records.insert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_sweep_reclaims_only_expired() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordIndex::new());
        let now = Utc::now();
        let old = store(&*blobs, &records, "old.txt", now - chrono::Duration::days(8)).await;
        let fresh = store(&*blobs, &records, "fresh.txt", now).await;

        let reaper = ExpiryReaper::new(blobs.clone(), records.clone(), Duration::from_secs(30));
        let report = reaper.sweep_at(now).await.unwrap();

        assert_eq!(report, SweepReport { expired: 1, reclaimed: 1, failed: 0 });
        assert!(!blobs.contains(&old.storage_key).await);
        assert_eq!(records.get(old.id).await.unwrap(), None);
        assert!(blobs.contains(&fresh.storage_key).await);
        assert!(records.get(fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent_when_blob_already_gone() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordIndex::new());
        let now = Utc::now();
        let old = store(&*blobs, &records, "old.txt", now - chrono::Duration::days(8)).await;
        blobs.delete(&old.storage_key).await.unwrap();

        let reaper = ExpiryReaper::new(blobs, records.clone(), Duration::from_secs(30));
        assert_eq!(reaper.sweep_at(now).await.unwrap().reclaimed, 1);
        assert_eq!(reaper.sweep_at(now).await.unwrap(), SweepReport::default());
        assert!(records.is_empty().await);
    }

    /// Blob store whose deletes fail for one key.
    struct StickyBlobs {
        inner: MemoryBlobStore,
        sticky_key: String,
    }

    #[async_trait]
    impl BlobStore for StickyBlobs {
        async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
            self.inner.put(key, data, content_type).await
        }
        async fn delete(&self, key: &str) -> StorageResult<()> {
            if key == self.sticky_key {
                return Err(StorageError::Transport("connection reset".to_string()));
            }
            self.inner.delete(key).await
        }
        async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String> {
            self.inner.presign_get(key, ttl).await
        }
        async fn fetch_signed(&self, url: &str) -> StorageResult<BlobDownload> {
            self.inner.fetch_signed(url).await
        }
        fn backend_name(&self) -> &'static str {
            "sticky"
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_record() {
        let blobs = Arc::new(StickyBlobs {
            inner: MemoryBlobStore::new(),
            sticky_key: "files/stuck.txt".to_string(),
        });
        let records = Arc::new(MemoryRecordIndex::new());
        let past = Utc::now() - chrono::Duration::days(8);
        let stuck = store(&*blobs, &records, "stuck.txt", past).await;
        let other = store(&*blobs, &records, "other.txt", past).await;

        let reaper = ExpiryReaper::new(blobs, records.clone(), Duration::from_secs(30));
        let report = reaper.sweep().await.unwrap();

        assert_eq!(report, SweepReport { expired: 2, reclaimed: 1, failed: 1 });
        assert!(records.get(stuck.id).await.unwrap().is_some());
        assert_eq!(records.get(other.id).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_reaper_sweeps_at_start_and_stops() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordIndex::new());
        store(&*blobs, &records, "old.txt", Utc::now() - chrono::Duration::days(8)).await;

        let reaper = Arc::new(ExpiryReaper::new(blobs, records.clone(), Duration::from_secs(30)));
        let handle = reaper.spawn(Duration::from_secs(12 * 3600));

        for _ in 0..10 {
            if records.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(records.is_empty().await);

        handle.shutdown().await;
    }
}
