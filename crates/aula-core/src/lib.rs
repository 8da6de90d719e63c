//! # Aula Core
//!
//! Core types shared by the Aula messaging stack.
//!
//! The messaging subsystem has no server process of its own: every client reads
//! and writes the same set of documents in a hosted store. This crate defines
//! the shapes of those documents and the small amount of logic that must agree
//! across every client:
//!
//! - [`UserId`], [`ConversationId`], [`MessageId`]: typed identifiers
//! - [`dm_key`] / [`support_key`]: deterministic ids for one-to-one and support threads
//! - [`Conversation`], [`Message`], [`MembershipRequest`], [`Ban`]: the document model
//! - [`Clock`]: time abstraction so TTL and ordering rules are testable

pub mod error;
pub mod ids;
pub mod model;
pub mod time;

pub use error::IdentityError;
pub use ids::{ConversationId, MessageId, UserId, dm_key, support_key, KEY_SEPARATOR};
pub use model::{
    Attachment, Ban, Conversation, ConversationKind, JoinMode, LastMessage, MembershipRequest,
    Message, RequestStatus,
};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
