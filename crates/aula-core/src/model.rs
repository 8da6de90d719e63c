//! Document model shared by every client.
//!
//! These are the shapes stored in the document database. Field names are
//! serialized in camelCase to match the hosted store's documents.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, UserId, dm_key, support_key};
use crate::time::Timestamp;

/// Kind of conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// One-to-one thread keyed by `dmKey`.
    Dm,
    /// Multi-member group with moderation.
    Group,
    /// A user's thread with the support team, keyed by `supportKey`.
    Support,
}

impl ConversationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Group => "group",
            Self::Support => "support",
        }
    }
}

/// Group admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    /// Joining adds the user immediately.
    #[default]
    Open,
    /// Joining files a request that a moderator approves or declines.
    Approval,
}

/// Summary of the most recent message, denormalized onto the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender_id: UserId,
    pub sender_name: String,
}

/// Shared record for a DM, group or support thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub participants: BTreeSet<UserId>,
    /// Group moderators besides the owner.
    #[serde(default)]
    pub admins: BTreeSet<UserId>,
    pub owner_id: UserId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub join_mode: JoinMode,
    pub member_count: u32,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub last_at: Option<Timestamp>,
    #[serde(default)]
    pub reads: HashMap<UserId, Timestamp>,
    #[serde(default)]
    pub typing: HashMap<UserId, Timestamp>,
    #[serde(default)]
    pub dm_key: Option<String>,
    #[serde(default)]
    pub support_key: Option<String>,
    pub created_at: Timestamp,
}

impl Conversation {
    /// New one-to-one conversation between `creator` and `other`.
    ///
    /// The document id is the pair's `dmKey`; the creator's read marker is seeded.
    pub fn direct(creator: &UserId, other: &UserId, now: Timestamp) -> Self {
        let key = dm_key(creator, other);
        let participants: BTreeSet<UserId> = [creator.clone(), other.clone()].into();
        Self {
            id: ConversationId::new(key.clone()),
            kind: ConversationKind::Dm,
            member_count: participants.len() as u32,
            participants,
            admins: BTreeSet::new(),
            owner_id: creator.clone(),
            title: None,
            public: false,
            join_mode: JoinMode::Open,
            last_message: None,
            last_at: None,
            reads: HashMap::from([(creator.clone(), now)]),
            typing: HashMap::new(),
            dm_key: Some(key),
            support_key: None,
            created_at: now,
        }
    }

    /// New single-participant support thread for `uid`.
    pub fn support(uid: &UserId, now: Timestamp) -> Self {
        let key = support_key(uid);
        Self {
            id: ConversationId::new(key.clone()),
            kind: ConversationKind::Support,
            participants: BTreeSet::from([uid.clone()]),
            admins: BTreeSet::new(),
            owner_id: uid.clone(),
            title: None,
            public: false,
            join_mode: JoinMode::Open,
            member_count: 1,
            last_message: None,
            last_at: None,
            reads: HashMap::from([(uid.clone(), now)]),
            typing: HashMap::new(),
            dm_key: None,
            support_key: Some(key),
            created_at: now,
        }
    }

    /// New group owned (and moderated) by `owner`.
    pub fn group(
        owner: &UserId,
        title: impl Into<String>,
        public: bool,
        join_mode: JoinMode,
        now: Timestamp,
    ) -> Self {
        Self {
            id: ConversationId::generate(),
            kind: ConversationKind::Group,
            participants: BTreeSet::from([owner.clone()]),
            admins: BTreeSet::from([owner.clone()]),
            owner_id: owner.clone(),
            title: Some(title.into()),
            public,
            join_mode,
            member_count: 1,
            last_message: None,
            last_at: None,
            reads: HashMap::from([(owner.clone(), now)]),
            typing: HashMap::new(),
            dm_key: None,
            support_key: None,
            created_at: now,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    pub fn is_participant(&self, uid: &UserId) -> bool {
        self.participants.contains(uid)
    }

    /// Owner or listed admin.
    pub fn is_admin(&self, uid: &UserId) -> bool {
        &self.owner_id == uid || self.admins.contains(uid)
    }

    /// Participants other than `uid`, in id order.
    pub fn other_participants<'a>(&'a self, uid: &'a UserId) -> impl Iterator<Item = &'a UserId> {
        self.participants.iter().filter(move |p| *p != uid)
    }

    pub fn read_marker(&self, uid: &UserId) -> Option<Timestamp> {
        self.reads.get(uid).copied()
    }

    pub fn typing_at(&self, uid: &UserId) -> Option<Timestamp> {
        self.typing.get(uid).copied()
    }

    /// Sort key for conversation lists: last activity, falling back to creation.
    pub fn activity_at(&self) -> Timestamp {
        self.last_at.unwrap_or(self.created_at)
    }
}

/// A file attached to a message, already uploaded to the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// Blob-store path the file was uploaded under.
    pub path: String,
}

/// An immutable message in a conversation's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Assigned by the store on receipt.
    pub created_at: Timestamp,
}

impl Message {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Lifecycle state of a join request. Requests are deleted on approve or decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
}

/// Pending request to join an approval-mode group, keyed by the requester's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRequest {
    pub uid: UserId,
    pub name: String,
    #[serde(default)]
    pub handle: Option<String>,
    pub status: RequestStatus,
    pub created_at: Timestamp,
}

/// Permanent exclusion of a user from a group, keyed by the banned user's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ban {
    pub uid: UserId,
    pub created_at: Timestamp,
    pub created_by: UserId,
}
