//! Authorization rules.
//!
//! All role checks go through [`Authorizer`]: moderation rights on groups,
//! the support roster, and who may view a conversation.

use std::collections::BTreeSet;

use aula_core::{Conversation, ConversationKind, UserId};

use crate::error::{MessagingError, Result};

/// Role checks shared by membership, session and notification code.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    support_agents: BTreeSet<UserId>,
}

impl Authorizer {
    pub fn new(support_agents: BTreeSet<UserId>) -> Self {
        Self { support_agents }
    }

    /// Owner or admin of a group.
    pub fn can_moderate(&self, conv: &Conversation, uid: &UserId) -> bool {
        conv.is_group() && conv.is_admin(uid)
    }

    /// Only the owner may promote or demote admins.
    pub fn can_manage_admins(&self, conv: &Conversation, uid: &UserId) -> bool {
        conv.is_group() && &conv.owner_id == uid
    }

    pub fn is_support_agent(&self, uid: &UserId) -> bool {
        self.support_agents.contains(uid)
    }

    /// Participants, anyone for public groups, and agents for support threads.
    pub fn can_view(&self, conv: &Conversation, uid: &UserId) -> bool {
        if conv.is_participant(uid) {
            return true;
        }
        match conv.kind {
            ConversationKind::Group => conv.public,
            ConversationKind::Support => self.is_support_agent(uid),
            ConversationKind::Dm => false,
        }
    }

    pub fn require_moderator(&self, conv: &Conversation, uid: &UserId) -> Result<()> {
        if !conv.is_group() {
            return Err(MessagingError::NotAGroup);
        }
        if self.can_moderate(conv, uid) {
            Ok(())
        } else {
            Err(MessagingError::NotModerator)
        }
    }

    pub fn require_view(&self, conv: &Conversation, uid: &UserId) -> Result<()> {
        if self.can_view(conv, uid) {
            Ok(())
        } else {
            Err(MessagingError::NotMember)
        }
    }
}
