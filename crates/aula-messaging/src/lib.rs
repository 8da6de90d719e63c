//! # Aula Messaging
//!
//! Real-time messaging for the Aula education platform: direct messages,
//! public and private groups with join workflows, a support channel, typing
//! presence and read receipts.
//!
//! There is no messaging server. Every client reads and writes the same
//! conversation documents in a shared [`DocumentStore`](aula_store::DocumentStore)
//! using atomic field-level updates, and follows changes through the store's
//! event broadcast.
//!
//! ## Quick Start
//!
//! ```ignore
//! use aula_messaging::prelude::*;
//!
//! let ctx = MessagingContext::builder(store)
//!     .identity(Arc::new(StaticIdentity::signed_in(me)))
//!     .build();
//! let client = MessagingClient::new(ctx);
//!
//! // Find or create the DM with a classmate and open it
//! let (conv, opened) = client.open_dm(&classmate).await?;
//!
//! client.typing().await?;
//! client.send("Hola", Vec::new()).await?;
//!
//! // Render the live view
//! let view = opened.view.borrow().clone();
//! println!("{} ({})", view.title, view.member_count());
//! ```
//!
//! ## Components
//!
//! ### ConversationDirectory
//!
//! Lists the user's conversations and public groups, searches people, and
//! finds or creates DM and support threads by their deterministic key.
//!
//! ### MembershipManager
//!
//! Open and approval join modes, moderation, bans and member counting. Every
//! change to `participants` moves `memberCount` in the same atomic update.
//!
//! ### MessageChannel
//!
//! Sends messages with attachments and follows a conversation's capped,
//! ordered message window.
//!
//! ### PresenceTracker and TypingSignal
//!
//! Read markers, unread predicates, "Seen by" labels and throttled typing
//! signals with a read-side TTL.
//!
//! ### ConversationSession
//!
//! The synchronizer for one open conversation. Republishes title, avatar,
//! composer state and typing indicator whenever the document changes.
//!
//! ### NotificationDispatcher
//!
//! Raises one local notification per new message the user is not looking at,
//! with optional best-effort push registration.

// Modules
pub mod authz;
pub mod channel;
pub mod client;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod identity;
pub mod inflight;
pub mod membership;
pub mod notify;
pub mod presence;
pub mod profile;
pub mod session;
pub mod stream;

// Re-export main types at crate root
pub use authz::Authorizer;
pub use channel::{MessageChannel, MessageFeed, OutgoingAttachment, preview_text};
pub use client::{MessagingClient, OpenedConversation};
pub use config::MessagingConfig;
pub use context::{MESSAGES_PATH, MessagingContext, MessagingContextBuilder};
pub use directory::{
    Avatar, ConversationDirectory, ConversationListWatch, ConversationSummary, NewGroup,
    SUPPORT_TITLE,
};
pub use error::{MessagingError, Result};
pub use identity::{AuthEvent, CurrentUser, IdentityProvider, StaticIdentity};
pub use inflight::{InFlight, InFlightGuard};
pub use membership::{GroupSettings, JoinOutcome, MembershipManager, MembershipState};
pub use notify::{
    ActivityState, MemoryNotificationSink, Notification, NotificationDispatcher,
    NotificationSink, PushError, PushPlatform, PushRegistration, should_notify,
};
pub use presence::{
    PresenceTracker, ReadStatus, TypingSignal, active_typers, is_typing, is_unread, read_status,
    typing_label, unread_count,
};
pub use profile::{InMemoryProfileDirectory, Profile, ProfileCache, ProfileDirectory};
pub use session::{ComposerState, ConversationSession, ConversationView};
pub use stream::{BoxStream, broadcast_to_stream};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use aula_messaging::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ComposerState, ConversationDirectory, ConversationView, CurrentUser, JoinOutcome,
        MembershipManager, MembershipState, MessageChannel, MessagingClient, MessagingConfig,
        MessagingContext, MessagingError, NewGroup, OutgoingAttachment, Result, StaticIdentity,
    };
    pub use aula_core::{Conversation, ConversationId, JoinMode, Message, UserId};

    pub use futures::StreamExt;
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        #[allow(unused_imports)]
        use crate::prelude::*;
    }
}
