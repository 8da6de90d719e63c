//! Error types for Aula messaging.
//!
//! Every mutating action ends in either success or one of these errors. The
//! UI renders [`MessagingError::status_text`] inline next to the control that
//! triggered the action; none of them are fatal.

use aula_store::StorageError;

/// Result type alias for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors surfaced by messaging operations.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    // ============================================================
    // Validation (checked locally, before any write)
    // ============================================================
    /// Send with blank text and no attachments.
    #[error("Write a message or attach a file")]
    EmptyMessage,

    /// The group has reached its member capacity.
    #[error("This group is full ({capacity} members)")]
    GroupFull { capacity: u32 },

    /// The user is banned from this group.
    #[error("You can't join this group")]
    Banned,

    /// The user already belongs to the conversation.
    #[error("Already a member")]
    AlreadyMember,

    /// The operation only applies to groups.
    #[error("Not a group conversation")]
    NotAGroup,

    /// The composer is disabled for this user in this conversation.
    #[error("You can't send messages here")]
    ComposerDisabled,

    /// No pending join request exists for the user.
    #[error("No pending request")]
    NoPendingRequest,

    /// The group owner cannot be removed or banned, or leave a non-empty group.
    #[error("The group owner can't do that")]
    OwnerProtected,

    /// Malformed input (blank title, self-DM, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ============================================================
    // Authorization
    // ============================================================
    /// No signed-in user; the caller should navigate to `login_url`.
    #[error("Sign in to continue")]
    NotSignedIn { login_url: String },

    /// The user is not a participant of the conversation.
    #[error("Not a member of this conversation")]
    NotMember,

    /// The action requires the owner or an admin.
    #[error("Only group moderators can do that")]
    NotModerator,

    /// The conversation does not exist.
    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    // ============================================================
    // Store rejections and transient failures
    // ============================================================
    /// The store's access rules rejected a write.
    #[error("Permission denied")]
    PermissionDenied,

    /// Storage layer error.
    #[error("Storage error: {0}")]
    Store(StorageError),

    /// An attachment failed to upload.
    #[error("Upload of {name} failed: {reason}")]
    Upload { name: String, reason: String },

    /// The same action is already in flight from this client.
    #[error("Already in progress")]
    Busy,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for MessagingError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::PermissionDenied(_) => MessagingError::PermissionDenied,
            other => MessagingError::Store(other),
        }
    }
}

impl MessagingError {
    /// Short inline status line for the UI.
    ///
    /// Store and permission failures are rendered generically.
    pub fn status_text(&self) -> String {
        match self {
            Self::PermissionDenied | Self::Store(_) | Self::Config(_) => {
                "Something went wrong, try again".to_string()
            }
            Self::Upload { name, .. } => format!("Couldn't upload {name}, try again"),
            other => other.to_string(),
        }
    }

    /// Whether retrying the same action manually could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upload { .. } | Self::Busy => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether this is a local validation failure (nothing was written).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage
                | Self::GroupFull { .. }
                | Self::Banned
                | Self::AlreadyMember
                | Self::NotAGroup
                | Self::ComposerDisabled
                | Self::NoPendingRequest
                | Self::OwnerProtected
                | Self::InvalidInput(_)
        )
    }
}
