//! Blob storage
//!
//! The service only needs four things from a blob store: put an object
//! atomically, delete it idempotently, mint a time-limited read URL and
//! open such a URL as a byte stream. Backends:
//! - `s3` - any S3-compatible bucket, presigned GET URLs
//! - `memory` - process-local map with HMAC-signed `memory://` URLs

pub mod memory;
pub mod s3_client;
pub mod signed_fetch;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use uuid::Uuid;

pub use memory::MemoryBlobStore;
pub use s3_client::S3BlobStore;

/// Prefix under which every uploaded blob lives.
pub const STORAGE_PREFIX: &str = "files";

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("signed url rejected: {0}")]
    InvalidSignature(String),

    #[error("signed url expired")]
    Expired,

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage transport error: {0}")]
    Transport(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// An opened signed URL, ready to be relayed.
pub struct BlobDownload {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for BlobDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobDownload")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("body", &"<stream>")
            .finish()
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store `data` under `key`. Either the whole object is present afterwards
    /// or an error is returned and nothing is left behind.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Delete `key`. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Mint a pre-authorized read URL valid for `ttl`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Open a URL minted by [`BlobStore::presign_get`].
    async fn fetch_signed(&self, url: &str) -> StorageResult<BlobDownload>;

    fn backend_name(&self) -> &'static str;
}

/// Build a collision-resistant storage key from a random token and the
/// sender's filename (kept for diagnostics only).
pub fn generate_storage_key(original_name: &str) -> String {
    format!(
        "{}/{}-{}",
        STORAGE_PREFIX,
        Uuid::new_v4(),
        sanitize_file_name(original_name)
    )
}

/// Reduce a user-supplied filename to a safe object-key segment.
pub fn sanitize_file_name(name: &str) -> String {
    // Browsers may send a full client path.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
