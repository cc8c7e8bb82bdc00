use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::db::RecordIndex;
use crate::models::FileRecord;
use crate::storage::{BlobDownload, BlobStore, StorageError};
use crate::types::{AppError, AppResult};
use crate::utils::with_deadline;

/// Resolves a record id to a byte stream fetched through a short-lived signed URL.
pub struct DownloadGateway {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordIndex>,
    signed_url_ttl: Duration,
    storage_timeout: Duration,
}

impl DownloadGateway {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordIndex>,
        signed_url_ttl: Duration,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            blobs,
            records,
            signed_url_ttl,
            storage_timeout,
        }
    }

    /// Unknown, malformed and expired ids are all reported as
    /// [`AppError::RecordNotFound`].
    pub async fn handle_download(&self, raw_id: &str) -> AppResult<(FileRecord, BlobDownload)> {
        let Ok(id) = Uuid::parse_str(raw_id) else {
            debug!(record_id = raw_id, "Malformed record id");
            return Err(AppError::RecordNotFound);
        };

        let record = with_deadline("record lookup", self.storage_timeout, async {
            self.records
                .get(id)
                .await
                .map_err(|e| AppError::StorageRead(e.to_string()))
        })
        .await?;

        let record = match record {
            Some(record) if !record.is_expired_at(Utc::now()) => record,
            Some(_) => {
                debug!(record_id = %id, "Record expired, awaiting sweep");
                return Err(AppError::RecordNotFound);
            }
            None => {
                debug!(record_id = %id, "Record not found");
                return Err(AppError::RecordNotFound);
            }
        };

        let download = with_deadline("blob read", self.storage_timeout, async {
            let url = self
                .blobs
                .presign_get(&record.storage_key, self.signed_url_ttl)
                .await
                .map_err(|e| AppError::StorageRead(e.to_string()))?;

            self.blobs.fetch_signed(&url).await.map_err(|e| match e {
                // Reclaimed between the lookup and the fetch.
                StorageError::NotFound(_) => AppError::RecordNotFound,
                other => AppError::StorageRead(other.to_string()),
            })
        })
        .await?;

        debug!(record_id = %id, storage_key = %record.storage_key, "Relaying download");
        Ok((record, download))
    }
}
