use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::FileRecord;

pub use memory::MemoryRecordIndex;
pub use operations::PgRecordIndex;

pub mod memory;
pub mod operations;

#[derive(Debug, thiserror::Error)]
pub enum RecordIndexError {
    #[error("record already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record index unavailable: {0}")]
    Unavailable(String),
}

pub type RecordIndexResult<T> = std::result::Result<T, RecordIndexError>;

/// Persistent mapping from record id to file metadata.
#[async_trait]
pub trait RecordIndex: Send + Sync + 'static {
    async fn insert(&self, record: &FileRecord) -> RecordIndexResult<()>;

    async fn get(&self, id: Uuid) -> RecordIndexResult<Option<FileRecord>>;

    /// Every record whose `expires_at <= now`, oldest first.
    async fn list_expired(&self, now: DateTime<Utc>) -> RecordIndexResult<Vec<FileRecord>>;

    /// Remove a record. Returns whether it existed; deleting twice is fine.
    async fn delete(&self, id: Uuid) -> RecordIndexResult<bool>;

    fn backend_name(&self) -> &'static str;
}

pub async fn create_pool(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await?;

    // Test connection
    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await?;

    Ok(pool)
}
