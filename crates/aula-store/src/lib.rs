//! # Aula Store
//!
//! Storage contracts for Aula messaging.
//!
//! The messaging subsystem coordinates entirely through a hosted document
//! database and a blob store. This crate describes both as async traits and
//! ships backends for tests, simulations and local development.
//!
//! ## Features
//!
//! - **DocumentStore trait**: conversations, messages, join requests, bans, push tokens
//! - **ConversationUpdate**: atomic field-level updates with preconditions
//! - **InMemoryDocumentStore**: `DashMap`-backed store with change broadcasts
//! - **BlobStore trait**: uploads returning a durable retrieval URL
//! - **FsBlobStore / InMemoryBlobStore**: filesystem and in-memory blob backends
//!
//! ## Example
//!
//! ```rust,ignore
//! use aula_core::{Conversation, SystemClock, UserId};
//! use aula_store::{ConversationUpdate, DocumentStore, FieldOp, InMemoryDocumentStore};
//!
//! let store = InMemoryDocumentStore::new(Arc::new(SystemClock));
//! let alice = UserId::parse("alice")?;
//! let bob = UserId::parse("bob")?;
//!
//! let conv = store
//!     .create_conversation(Conversation::direct(&alice, &bob, Utc::now()))
//!     .await?
//!     .into_conversation();
//!
//! store
//!     .update_conversation(&conv.id, ConversationUpdate::new().op(FieldOp::SetRead(bob)))
//!     .await?;
//! ```

pub mod blobs;
pub mod error;
pub mod event;
pub mod memory;
pub mod query;
pub mod update;

// Re-exports
pub use blobs::{
    BlobStore, BlobStoreConfig, ContentRef, FsBlobStore, InMemoryBlobStore, StoredBlob,
};
pub use error::{StorageError, StorageResult};
pub use event::{CreateOutcome, MessageDraft, StoreEvent};
pub use memory::InMemoryDocumentStore;
pub use query::ConversationQuery;
pub use update::{ConversationUpdate, FieldOp, Precondition};

use async_trait::async_trait;
use aula_core::{Ban, Conversation, ConversationId, MembershipRequest, Message, UserId};
use tokio::sync::broadcast;

/// The shared document database every client reads and writes.
///
/// There are no multi-document transactions. Each call touches one document
/// (or one child collection entry) atomically, and every successful write is
/// announced on [`events`](DocumentStore::events).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a conversation by id.
    async fn get_conversation(&self, id: &ConversationId) -> StorageResult<Option<Conversation>>;

    /// Create a conversation if no document with its id exists.
    ///
    /// The check and the write are one atomic step, so two clients racing to
    /// create the same deterministic id end up sharing a single document.
    async fn create_conversation(&self, conversation: Conversation) -> StorageResult<CreateOutcome>;

    /// Apply a partial update and return the resulting document.
    ///
    /// # Errors
    ///
    /// `NotFound` if the conversation does not exist, `PreconditionFailed` if
    /// any precondition does not hold (nothing is written in that case).
    async fn update_conversation(
        &self,
        id: &ConversationId,
        update: ConversationUpdate,
    ) -> StorageResult<Conversation>;

    /// List conversations matching a query, most recently active first.
    async fn query_conversations(&self, query: &ConversationQuery)
    -> StorageResult<Vec<Conversation>>;

    /// Append a message; the store assigns its id and `createdAt`.
    ///
    /// `createdAt` is never earlier than any message previously accepted by
    /// this store.
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        draft: MessageDraft,
    ) -> StorageResult<Message>;

    /// The most recent `limit` messages, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> StorageResult<Vec<Message>>;

    /// Store a join request unless one already exists for the same user.
    ///
    /// Returns `true` if a new request was written.
    async fn upsert_request(
        &self,
        conversation_id: &ConversationId,
        request: MembershipRequest,
    ) -> StorageResult<bool>;

    async fn get_request(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
    ) -> StorageResult<Option<MembershipRequest>>;

    /// Pending requests, oldest first.
    async fn list_requests(
        &self,
        conversation_id: &ConversationId,
    ) -> StorageResult<Vec<MembershipRequest>>;

    /// Delete a join request. Returns `true` if one existed.
    async fn delete_request(&self, conversation_id: &ConversationId, uid: &UserId)
    -> StorageResult<bool>;

    /// Record a ban. Bans are never deleted.
    async fn put_ban(&self, conversation_id: &ConversationId, ban: Ban) -> StorageResult<()>;

    async fn get_ban(&self, conversation_id: &ConversationId, uid: &UserId)
    -> StorageResult<Option<Ban>>;

    async fn list_bans(&self, conversation_id: &ConversationId) -> StorageResult<Vec<Ban>>;

    /// Remember a push delivery token for a user, replacing any previous one.
    async fn put_push_token(&self, uid: &UserId, token: String) -> StorageResult<()>;

    async fn push_token(&self, uid: &UserId) -> StorageResult<Option<String>>;

    /// Subscribe to change notifications.
    fn events(&self) -> broadcast::Receiver<StoreEvent>;
}
