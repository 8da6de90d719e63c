//! In-memory blob store with failure injection

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::{BlobStore, BlobStoreConfig, ContentRef, StoredBlob, validate_path};
use crate::error::{StorageError, StorageResult};

/// In-memory implementation of BlobStore
///
/// `fail_after(n)` makes every upload after the first `n` fail with
/// `Unavailable`, which is how tests exercise partially uploaded sends.
pub struct InMemoryBlobStore {
    config: BlobStoreConfig,
    blobs: DashMap<String, (Bytes, String)>,
    uploads: AtomicUsize,
    fail_after: Option<usize>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::with_config(BlobStoreConfig {
            url_prefix: "mem://blobs".to_string(),
            ..Default::default()
        })
    }

    pub fn with_config(config: BlobStoreConfig) -> Self {
        Self {
            config,
            blobs: DashMap::new(),
            uploads: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Fail every upload after the first `n` successful ones.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs.contains_key(path)
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<StoredBlob> {
        validate_path(path)?;
        if data.len() as u64 > self.config.max_blob_size {
            return Err(StorageError::CapacityExceeded);
        }

        let attempt = self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after
            && attempt >= limit
        {
            debug!(path, attempt, "Injected upload failure");
            return Err(StorageError::Unavailable(format!("upload of {path} failed")));
        }

        let content_ref = ContentRef::from_data(&data);
        self.blobs
            .insert(path.to_string(), (data, content_type.to_string()));
        trace!(path, hash = %content_ref.short_hash(), "Stored blob");

        Ok(StoredBlob {
            url: self.config.url_for(path),
            path: path.to_string(),
            size: content_ref.size,
            content_type: content_type.to_string(),
            content_ref,
        })
    }

    async fn fetch(&self, path: &str) -> StorageResult<Bytes> {
        self.blobs
            .get(path)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| StorageError::not_found(path))
    }

    async fn delete(&self, path: &str) -> StorageResult<bool> {
        Ok(self.blobs.remove(path).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_returns_url() {
        let store = InMemoryBlobStore::new();
        let blob = store
            .upload("chat/c1/1_a.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();

        assert_eq!(blob.url, "mem://blobs/chat/c1/1_a.png");
        assert_eq!(blob.content_type, "image/png");
        assert!(store.contains("chat/c1/1_a.png"));
    }

    #[tokio::test]
    async fn test_fail_after() {
        let store = InMemoryBlobStore::new().fail_after(1);

        store
            .upload("chat/c1/a", Bytes::from_static(b"a"), "text/plain")
            .await
            .unwrap();
        let second = store
            .upload("chat/c1/b", Bytes::from_static(b"b"), "text/plain")
            .await;

        assert!(matches!(second, Err(StorageError::Unavailable(_))));
        assert!(second.unwrap_err().is_transient());
        assert_eq!(store.len(), 1);
    }
}
