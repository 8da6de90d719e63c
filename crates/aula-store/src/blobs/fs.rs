//! Filesystem blob store
//!
//! Blobs live at `base_dir/<path>`. Writes go to a temp file that is renamed
//! into place, so a reader never sees a partially written attachment.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use super::{BlobStore, BlobStoreConfig, ContentRef, StoredBlob, validate_path};
use crate::error::{StorageError, StorageResult};

/// Blob store backed by a local directory
pub struct FsBlobStore {
    config: BlobStoreConfig,
}

impl FsBlobStore {
    /// Create a new blob store, creating the base directory if needed
    pub async fn new(config: BlobStoreConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.base_dir).await?;
        info!(path = %config.base_dir.display(), "Blob store initialized");
        Ok(Self { config })
    }

    pub fn config(&self) -> &BlobStoreConfig {
        &self.config
    }

    fn blob_path(&self, path: &str) -> PathBuf {
        self.config.base_dir.join(path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self, data), fields(size = data.len()))]
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

        let content_ref = ContentRef::from_data(&data);
        let target = self.blob_path(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to temp, then rename
        let temp_path = target.with_extension(format!("{}.tmp", content_ref.short_hash()));
        let mut file = File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &target).await?;

        debug!(hash = %content_ref.short_hash(), "Stored blob");
        Ok(StoredBlob {
            url: self.config.url_for(path),
            path: path.to_string(),
            size: content_ref.size,
            content_type: content_type.to_string(),
            content_ref,
        })
    }

    #[instrument(skip(self))]
    async fn fetch(&self, path: &str) -> StorageResult<Bytes> {
        validate_path(path)?;
        match fs::read(self.blob_path(path)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(path)),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> StorageResult<bool> {
        validate_path(path)?;
        match fs::remove_file(self.blob_path(path)).await {
            Ok(()) => {
                debug!("Deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (FsBlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(BlobStoreConfig::with_base_dir(temp_dir.path().join("blobs")))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_upload_and_fetch() {
        let (store, _temp) = create_test_store().await;
        let data = Bytes::from_static(b"%PDF-1.7 worksheet");

        let blob = store
            .upload("chat/c1/100_worksheet.pdf", data.clone(), "application/pdf")
            .await
            .unwrap();

        assert_eq!(blob.url, "/blobs/chat/c1/100_worksheet.pdf");
        assert_eq!(blob.size, data.len() as u64);
        assert_eq!(blob.content_ref, ContentRef::from_data(&data));
        assert_eq!(store.fetch(&blob.path).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_size_cap() {
        let temp_dir = TempDir::new().unwrap();
        let config = BlobStoreConfig {
            max_blob_size: 4,
            ..BlobStoreConfig::with_base_dir(temp_dir.path())
        };
        let store = FsBlobStore::new(config).await.unwrap();

        let result = store
            .upload("chat/c1/big.bin", Bytes::from_static(b"12345"), "application/octet-stream")
            .await;
        assert!(matches!(result, Err(StorageError::CapacityExceeded)));
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp) = create_test_store().await;
        store
            .upload("chat/c1/a.txt", Bytes::from_static(b"a"), "text/plain")
            .await
            .unwrap();

        assert!(store.delete("chat/c1/a.txt").await.unwrap());
        assert!(!store.delete("chat/c1/a.txt").await.unwrap());
        assert!(matches!(
            store.fetch("chat/c1/a.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_escaping_path() {
        let (store, _temp) = create_test_store().await;
        let result = store
            .upload("../outside.txt", Bytes::from_static(b"x"), "text/plain")
            .await;
        assert!(matches!(result, Err(StorageError::PermissionDenied(_))));
    }
}
