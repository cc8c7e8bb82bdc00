//! In-process blob store.
//!
//! Used for local development and tests. Signed URLs have the form
//! `memory://blobs/<key>?expires=<unix secs>&signature=<hex hmac>`, where the
//! signature is HMAC-SHA256 over `<key>\n<expires>` with a per-store key.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;
use tokio::sync::RwLock;

use super::{BlobDownload, BlobStore, StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "memory";
const HOST: &str = "blobs";
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    content_type: String,
}

pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, StoredBlob>>,
    signing_key: [u8; 32],
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            signing_key: rand::random(),
        }
    }

    /// Whether an object is currently stored under `key`.
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn mac(&self, key: &str, expires: i64) -> StorageResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| StorageError::Backend(format!("invalid signing key: {}", e)))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn sign(&self, key: &str, expires: i64) -> StorageResult<String> {
        Ok(hex::encode(self.mac(key, expires)?.finalize().into_bytes()))
    }

    /// Validate a signed URL and return the object key it grants access to.
    fn verify(&self, url: &str) -> StorageResult<String> {
        let parsed = Url::parse(url)
            .map_err(|e| StorageError::InvalidSignature(format!("malformed url: {}", e)))?;
        if parsed.scheme() != SCHEME || parsed.host_str() != Some(HOST) {
            return Err(StorageError::InvalidSignature(
                "url was not minted by this store".to_string(),
            ));
        }

        let key = parsed.path().trim_start_matches('/').to_string();
        let mut expires = None;
        let mut signature = None;
        for (name, value) in parsed.query_pairs() {
            match name.as_ref() {
                "expires" => expires = value.parse::<i64>().ok(),
                "signature" => signature = Some(value.into_owned()),
                _ => {}
            }
        }
        let expires = expires
            .ok_or_else(|| StorageError::InvalidSignature("missing expiry".to_string()))?;
        let signature = signature
            .ok_or_else(|| StorageError::InvalidSignature("missing signature".to_string()))?;
        let signature = hex::decode(signature)
            .map_err(|_| StorageError::InvalidSignature("signature is not hex".to_string()))?;

        self.mac(&key, expires)?
            .verify_slice(&signature)
            .map_err(|_| StorageError::InvalidSignature("signature mismatch".to_string()))?;

        if Utc::now().timestamp() >= expires {
            return Err(StorageError::Expired);
        }
        Ok(key)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let blob = StoredBlob {
            data,
            content_type: content_type.to_string(),
        };
        self.objects.write().await.insert(key.to_string(), blob);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);

        let mut url = Url::parse(&format!("{}://{}/", SCHEME, HOST))
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        url.set_path(&format!("/{}", key));
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &self.sign(key, expires)?);
        Ok(url.to_string())
    }

    async fn fetch_signed(&self, url: &str) -> StorageResult<BlobDownload> {
        let key = self.verify(url)?;
        let blob = self
            .objects
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(StorageError::NotFound(key))?;

        let content_length = blob.data.len() as u64;
        let chunks: Vec<StorageResult<Bytes>> = (0..blob.data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| {
                let end = (start + CHUNK_SIZE).min(blob.data.len());
                Ok(blob.data.slice(start..end))
            })
            .collect();

        Ok(BlobDownload {
            content_type: Some(blob.content_type),
            content_length: Some(content_length),
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
