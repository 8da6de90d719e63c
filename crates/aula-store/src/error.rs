//! Error types for aula-store
//!
//! This module defines the error types used throughout the storage crate.

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested document was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store's access rules rejected the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A conditional update's precondition did not hold
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Storage capacity has been exceeded
    #[error("Storage capacity exceeded")]
    CapacityExceeded,

    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// The backend could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new PermissionDenied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    /// Create a new PreconditionFailed error
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed(message.into())
    }

    /// Whether retrying the same operation later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }
}

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
