//! Conversation queries: equality filters, `lastAt` descending order, limit.

use aula_core::{Conversation, ConversationKind, UserId};

/// Filter criteria for listing conversations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationQuery {
    /// Only conversations containing this participant
    pub participant: Option<UserId>,
    /// Only conversations of this kind
    pub kind: Option<ConversationKind>,
    /// Only conversations with this public flag
    pub public: Option<bool>,
    /// Maximum number of conversations to return
    pub limit: Option<usize>,
}

impl ConversationQuery {
    /// Create a new query
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by participant
    pub fn participant(mut self, uid: UserId) -> Self {
        self.participant = Some(uid);
        self
    }

    /// Filter by kind
    pub fn kind(mut self, kind: ConversationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Filter by public flag
    pub fn public(mut self, public: bool) -> Self {
        self.public = Some(public);
        self
    }

    /// Limit the number of results
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Whether a conversation passes the equality filters.
    pub fn matches(&self, conv: &Conversation) -> bool {
        if let Some(ref uid) = self.participant
            && !conv.is_participant(uid)
        {
            return false;
        }
        if let Some(kind) = self.kind
            && conv.kind != kind
        {
            return false;
        }
        if let Some(public) = self.public
            && conv.public != public
        {
            return false;
        }
        true
    }

    /// Order by activity (most recent first) and apply the limit.
    pub fn finish(&self, mut results: Vec<Conversation>) -> Vec<Conversation> {
        results.sort_by(|a, b| {
            b.activity_at()
                .cmp(&a.activity_at())
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }
}
