//! Blob storage for message attachments
//!
//! Attachments are uploaded one at a time under a conversation-scoped path
//! before the message that references them is written. Every stored blob is
//! addressed by its path and carries a BLAKE3 [`ContentRef`] so a client can
//! tell whether two uploads carried the same bytes.

mod content_ref;
mod fs;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

pub use content_ref::ContentRef;
pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlob {
    /// Durable retrieval URL
    pub url: String,
    /// Path the blob was stored under
    pub path: String,
    pub size: u64,
    pub content_type: String,
    pub content_ref: ContentRef,
}

/// Byte store that hands back a durable URL for every upload.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `data` under `path`, replacing anything already there.
    async fn upload(&self, path: &str, data: Bytes, content_type: &str)
    -> StorageResult<StoredBlob>;

    /// Read a blob back.
    async fn fetch(&self, path: &str) -> StorageResult<Bytes>;

    /// Delete a blob. Returns `true` if one existed.
    async fn delete(&self, path: &str) -> StorageResult<bool>;
}

/// Configuration for blob stores
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Base directory for filesystem storage
    pub base_dir: PathBuf,
    /// Maximum blob size (bytes)
    pub max_blob_size: u64,
    /// Prefix joined with the blob path to form its URL
    pub url_prefix: String,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/blobs"),
            max_blob_size: 25 * 1024 * 1024, // 25MB
            url_prefix: "/blobs".to_string(),
        }
    }
}

impl BlobStoreConfig {
    /// Config rooted at `base_dir` with default limits
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.url_prefix.trim_end_matches('/'), path)
    }
}

/// Reject paths that are empty, absolute, or escape the store root.
pub(crate) fn validate_path(path: &str) -> StorageResult<()> {
    let escapes = path
        .split(['/', '\\'])
        .any(|segment| segment == ".." || segment == ".");
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') || escapes {
        return Err(StorageError::permission_denied(format!(
            "invalid blob path: {path:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("chat/c1/1700000000_notes.pdf").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("chat/../../secret").is_err());
    }

    #[test]
    fn test_url_for_joins_prefix() {
        let config = BlobStoreConfig {
            url_prefix: "https://cdn.example.org/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.url_for("chat/c1/a.png"),
            "https://cdn.example.org/chat/c1/a.png"
        );
    }
}
