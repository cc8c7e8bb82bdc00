use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RecordIndex, RecordIndexError, RecordIndexResult};
use crate::models::FileRecord;

/// Postgres-backed record index over the `file_records` table.
#[derive(Clone)]
pub struct PgRecordIndex {
    pool: PgPool,
}

impl PgRecordIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordIndex for PgRecordIndex {
    async fn insert(&self, record: &FileRecord) -> RecordIndexResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_records
                (id, storage_key, original_name, content_type, size_bytes, recipient_email, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.storage_key)
        .bind(&record.original_name)
        .bind(&record.content_type)
        .bind(record.size_bytes)
        .bind(&record.recipient_email)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RecordIndexError::AlreadyExists(record.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> RecordIndexResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, storage_key, original_name, content_type, size_bytes, recipient_email, created_at, expires_at
            FROM file_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> RecordIndexResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, storage_key, original_name, content_type, size_bytes, recipient_email, created_at, expires_at
            FROM file_records
            WHERE expires_at <= $1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> RecordIndexResult<bool> {
        let result = sqlx::query("DELETE FROM file_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
