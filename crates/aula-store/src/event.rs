//! Values exchanged with a [`DocumentStore`](crate::DocumentStore).

use aula_core::{Attachment, Conversation, ConversationId, Message, UserId};

/// Change notification emitted by the store after a successful write.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A conversation document was created or updated; carries the new state.
    ConversationChanged(Conversation),
    /// A message was appended to a conversation.
    MessageAdded(Message),
    /// A membership request was created or deleted.
    RequestChanged {
        conversation_id: ConversationId,
        uid: UserId,
    },
    /// A ban was recorded.
    BanAdded {
        conversation_id: ConversationId,
        uid: UserId,
    },
}

impl StoreEvent {
    /// Conversation this event belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::ConversationChanged(conv) => &conv.id,
            Self::MessageAdded(msg) => &msg.conversation_id,
            Self::RequestChanged {
                conversation_id, ..
            }
            | Self::BanAdded {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Result of a conditional create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// No document had this id; the given one was stored.
    Created(Conversation),
    /// A document already existed and was left untouched.
    Existing(Conversation),
}

impl CreateOutcome {
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_conversation(self) -> Conversation {
        match self {
            Self::Created(conv) | Self::Existing(conv) => conv,
        }
    }
}

/// A message as submitted by a client, before the store assigns id and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}
