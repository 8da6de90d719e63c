//! Partial, field-level updates to conversation documents.
//!
//! Clients never overwrite a whole conversation. Each write is a list of field
//! operations (set add/remove, increment, server timestamp) applied atomically
//! to a single document, optionally guarded by preconditions evaluated inside
//! the same atomic step.

use aula_core::{Conversation, JoinMode, LastMessage, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// A single field-level mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldOp {
    /// Set-add to `participants`.
    AddParticipant(UserId),
    /// Set-remove from `participants`.
    RemoveParticipant(UserId),
    /// Set-add to `admins`.
    AddAdmin(UserId),
    /// Set-remove from `admins`.
    RemoveAdmin(UserId),
    /// Numeric increment of `memberCount` (negative to decrement, floored at 0).
    IncrementMemberCount(i32),
    /// `reads.<uid>` = server time. Never moves an existing marker backwards.
    SetRead(UserId),
    /// `typing.<uid>` = server time.
    SetTyping(UserId),
    /// Delete `typing.<uid>`.
    ClearTyping(UserId),
    /// `lastMessage` = value, `lastAt` = server time.
    SetLastMessage(LastMessage),
    SetTitle(String),
    SetPublic(bool),
    SetJoinMode(JoinMode),
}

/// Condition that must hold for an update to be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precondition {
    IsParticipant(UserId),
    NotParticipant(UserId),
    /// `memberCount` strictly below the given capacity.
    MemberCountBelow(u32),
}

impl Precondition {
    fn check(&self, conv: &Conversation) -> StorageResult<()> {
        let holds = match self {
            Self::IsParticipant(uid) => conv.is_participant(uid),
            Self::NotParticipant(uid) => !conv.is_participant(uid),
            Self::MemberCountBelow(cap) => conv.member_count < *cap,
        };
        if holds {
            Ok(())
        } else {
            Err(StorageError::precondition(format!(
                "{:?} does not hold for conversation {}",
                self, conv.id
            )))
        }
    }
}

/// Preconditions plus field operations for one conversation document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationUpdate {
    pub preconditions: Vec<Precondition>,
    pub ops: Vec<FieldOp>,
}

impl ConversationUpdate {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field operation
    pub fn op(mut self, op: FieldOp) -> Self {
        self.ops.push(op);
        self
    }

    /// Add a precondition
    pub fn require(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply to `conv` with `server_now` as the value of every server timestamp.
    ///
    /// Preconditions are all checked before any operation runs, so a failed
    /// update leaves the document untouched.
    pub fn apply(&self, conv: &mut Conversation, server_now: Timestamp) -> StorageResult<()> {
        for precondition in &self.preconditions {
            precondition.check(conv)?;
        }

        for op in &self.ops {
            match op {
                FieldOp::AddParticipant(uid) => {
                    conv.participants.insert(uid.clone());
                }
                FieldOp::RemoveParticipant(uid) => {
                    conv.participants.remove(uid);
                }
                FieldOp::AddAdmin(uid) => {
                    conv.admins.insert(uid.clone());
                }
                FieldOp::RemoveAdmin(uid) => {
                    conv.admins.remove(uid);
                }
                FieldOp::IncrementMemberCount(delta) => {
                    conv.member_count = conv.member_count.saturating_add_signed(*delta);
                }
                FieldOp::SetRead(uid) => {
                    let marker = conv.reads.entry(uid.clone()).or_insert(server_now);
                    if server_now > *marker {
                        *marker = server_now;
                    }
                }
                FieldOp::SetTyping(uid) => {
                    conv.typing.insert(uid.clone(), server_now);
                }
                FieldOp::ClearTyping(uid) => {
                    conv.typing.remove(uid);
                }
                FieldOp::SetLastMessage(last) => {
                    conv.last_message = Some(last.clone());
                    conv.last_at = Some(server_now);
                }
                FieldOp::SetTitle(title) => {
                    conv.title = Some(title.clone());
                }
                FieldOp::SetPublic(public) => {
                    conv.public = *public;
                }
                FieldOp::SetJoinMode(mode) => {
                    conv.join_mode = *mode;
                }
            }
        }

        Ok(())
    }
}
