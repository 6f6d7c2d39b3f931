//! In-memory blob store.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use handlechat_core::{BlobError, BlobKey, BlobRef, BlobStore};
use uuid::Uuid;

use super::poisoned;

struct StoredBlob {
    data: Bytes,
    token: Uuid,
}

/// In-memory blob store.
///
/// Download references have the form `memory://blobs/<key>?token=<uuid>`.
/// Re-uploading a key replaces the bytes and rotates the token.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobKey, StoredBlob>>,
}

impl MemoryBlobStore {
    /// Create an empty blob store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Stored bytes for `key`.
    #[must_use]
    pub fn get(&self, key: &BlobKey) -> Option<Bytes> {
        self.blobs
            .read()
            .ok()
            .and_then(|blobs| blobs.get(key).map(|b| b.data.clone()))
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, data: Bytes) -> Result<BlobRef, BlobError> {
        let size = data.len();
        self.blobs
            .write()
            .map_err(|e| BlobError::Internal(poisoned(e)))?
            .insert(
                key.clone(),
                StoredBlob {
                    data,
                    token: Uuid::new_v4(),
                },
            );

        tracing::debug!(%key, size, "Stored blob");
        Ok(BlobRef { key: key.clone() })
    }

    async fn download_reference(&self, blob: &BlobRef) -> Result<String, BlobError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|e| BlobError::Internal(poisoned(e)))?;

        let stored = blobs
            .get(&blob.key)
            .ok_or_else(|| BlobError::NotFound(blob.key.clone()))?;

        Ok(format!("memory://blobs/{}?token={}", blob.key, stored.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_reference() {
        let store = MemoryBlobStore::new();
        let key = BlobKey::from("chat_photos/default/cat.jpg");

        let blob = store.put(&key, Bytes::from_static(b"jpeg")).await.unwrap();
        let uri = store.download_reference(&blob).await.unwrap();

        assert!(uri.starts_with("memory://blobs/chat_photos/default/cat.jpg?token="));
        assert_eq!(store.get(&key), Some(Bytes::from_static(b"jpeg")));
    }

    #[tokio::test]
    async fn test_reference_for_missing_blob() {
        let store = MemoryBlobStore::new();
        let blob = BlobRef {
            key: BlobKey::from("nope"),
        };
        let err = store.download_reference(&blob).await.unwrap_err();
        assert_eq!(err, BlobError::NotFound(BlobKey::from("nope")));
        assert!(store.is_empty());
    }
}
