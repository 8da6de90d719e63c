//! Error types for aula-core

use thiserror::Error;

/// Errors related to user identifiers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("User id must not be empty")]
    Empty,

    #[error("Invalid user id format: {0}")]
    InvalidFormat(String),
}
