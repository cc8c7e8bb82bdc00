use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RecordIndex, RecordIndexError, RecordIndexResult};
use crate::models::FileRecord;

/// Process-local record index for development and tests.
#[derive(Clone, Default)]
pub struct MemoryRecordIndex {
    inner: Arc<RwLock<HashMap<Uuid, FileRecord>>>,
}

impl MemoryRecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordIndex for MemoryRecordIndex {
    async fn insert(&self, record: &FileRecord) -> RecordIndexResult<()> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&record.id) {
            return Err(RecordIndexError::AlreadyExists(record.id));
        }
        guard.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RecordIndexResult<Option<FileRecord>> {
        let guard = self.inner.read().await;
        Ok(guard.get(&id).cloned())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> RecordIndexResult<Vec<FileRecord>> {
        let guard = self.inner.read().await;
        let mut expired: Vec<FileRecord> = guard
            .values()
            .filter(|record| record.is_expired_at(now))
            .cloned()
            .collect();
        expired.sort_by_key(|record| record.expires_at);
        Ok(expired)
    }

    async fn delete(&self, id: Uuid) -> RecordIndexResult<bool> {
        let mut guard = self.inner.write().await;
        Ok(guard.remove(&id).is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
