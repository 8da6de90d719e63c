//! In-memory document store
//!
//! This module provides an in-memory implementation of [`DocumentStore`],
//! suitable for testing, simulation and local development. It reproduces the
//! semantics the messaging layer relies on from the hosted store: atomic
//! per-document partial updates, conditional creates, server-assigned
//! timestamps and change broadcasts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use aula_core::{
    Ban, Clock, Conversation, ConversationId, MembershipRequest, Message, MessageId, Timestamp,
    UserId,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::DocumentStore;
use crate::error::{StorageError, StorageResult};
use crate::event::{CreateOutcome, MessageDraft, StoreEvent};
use crate::query::ConversationQuery;
use crate::update::ConversationUpdate;

/// Default capacity of the change broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// In-memory implementation of DocumentStore
///
/// Uses `DashMap` so each conversation document is locked independently;
/// an update holds the entry lock for the whole precondition check and apply.
pub struct InMemoryDocumentStore {
    conversations: DashMap<ConversationId, Conversation>,
    /// Messages per conversation, in acceptance order
    messages: DashMap<ConversationId, Vec<Message>>,
    requests: DashMap<ConversationId, BTreeMap<UserId, MembershipRequest>>,
    bans: DashMap<ConversationId, BTreeMap<UserId, Ban>>,
    push_tokens: DashMap<UserId, String>,
    clock: Arc<dyn Clock>,
    /// Last timestamp handed out, keeps server time non-decreasing
    last_server_time: Mutex<Option<Timestamp>>,
    /// When set, every write is rejected as a rules violation
    read_only: AtomicBool,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl InMemoryDocumentStore {
    /// Create a new in-memory store using `clock` for server timestamps
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_event_capacity(clock, DEFAULT_EVENT_CAPACITY)
    }

    /// Create with a custom change-broadcast capacity
    pub fn with_event_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            conversations: DashMap::new(),
            messages: DashMap::new(),
            requests: DashMap::new(),
            bans: DashMap::new(),
            push_tokens: DashMap::new(),
            clock,
            last_server_time: Mutex::new(None),
            read_only: AtomicBool::new(false),
            event_tx,
        }
    }

    /// Reject (or accept again) every write, as a store whose access rules deny the caller.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of conversation documents
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Number of messages stored for a conversation
    pub fn message_count(&self, conversation_id: &ConversationId) -> usize {
        self.messages
            .get(conversation_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn server_time(&self) -> Timestamp {
        let mut last = self.last_server_time.lock();
        let now = match *last {
            Some(prev) => self.clock.now().max(prev),
            None => self.clock.now(),
        };
        *last = Some(now);
        now
    }

    fn check_writable(&self, operation: &str) -> StorageResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            warn!(operation, "Write rejected by store rules");
            return Err(StorageError::permission_denied(operation));
        }
        Ok(())
    }

    fn require_conversation(&self, id: &ConversationId) -> StorageResult<()> {
        if self.conversations.contains_key(id) {
            Ok(())
        } else {
            Err(StorageError::not_found(format!("conversations/{id}")))
        }
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.event_tx.send(event);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_conversation(&self, id: &ConversationId) -> StorageResult<Option<Conversation>> {
        Ok(self.conversations.get(id).map(|c| c.clone()))
    }

    async fn create_conversation(&self, conversation: Conversation) -> StorageResult<CreateOutcome> {
        self.check_writable("create_conversation")?;

        let outcome = match self.conversations.entry(conversation.id.clone()) {
            Entry::Occupied(existing) => CreateOutcome::Existing(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(conversation.clone());
                CreateOutcome::Created(conversation)
            }
        };

        if let CreateOutcome::Created(ref conv) = outcome {
            debug!(conversation = %conv.id, kind = conv.kind.label(), "Created conversation");
            self.publish(StoreEvent::ConversationChanged(conv.clone()));
        } else {
            trace!("Conversation already existed, create skipped");
        }
        Ok(outcome)
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        update: ConversationUpdate,
    ) -> StorageResult<Conversation> {
        self.check_writable("update_conversation")?;

        let updated = {
            let mut entry = self
                .conversations
                .get_mut(id)
                .ok_or_else(|| StorageError::not_found(format!("conversations/{id}")))?;
            let now = self.server_time();
            let mut draft = entry.clone();
            update.apply(&mut draft, now)?;
            *entry = draft.clone();
            draft
        };

        trace!(conversation = %id, ops = update.ops.len(), "Updated conversation");
        self.publish(StoreEvent::ConversationChanged(updated.clone()));
        Ok(updated)
    }

    async fn query_conversations(
        &self,
        query: &ConversationQuery,
    ) -> StorageResult<Vec<Conversation>> {
        let matches = self
            .conversations
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(query.finish(matches))
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        draft: MessageDraft,
    ) -> StorageResult<Message> {
        self.check_writable("append_message")?;
        self.require_conversation(conversation_id)?;

        let message = {
            let mut messages = self.messages.entry(conversation_id.clone()).or_default();
            let message = Message {
                id: MessageId::generate(),
                conversation_id: conversation_id.clone(),
                sender_id: draft.sender_id,
                sender_name: draft.sender_name,
                text: draft.text,
                attachments: draft.attachments,
                created_at: self.server_time(),
            };
            messages.push(message.clone());
            message
        };

        trace!(conversation = %conversation_id, message = %message.id, "Appended message");
        self.publish(StoreEvent::MessageAdded(message.clone()));
        Ok(message)
    }

    async fn recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        Ok(self
            .messages
            .get(conversation_id)
            .map(|m| {
                let skip = m.len().saturating_sub(limit);
                m[skip..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn upsert_request(
        &self,
        conversation_id: &ConversationId,
        request: MembershipRequest,
    ) -> StorageResult<bool> {
        self.check_writable("upsert_request")?;
        self.require_conversation(conversation_id)?;

        let uid = request.uid.clone();
        let created = {
            let mut requests = self.requests.entry(conversation_id.clone()).or_default();
            if requests.contains_key(&uid) {
                false
            } else {
                requests.insert(uid.clone(), request);
                true
            }
        };

        if created {
            self.publish(StoreEvent::RequestChanged {
                conversation_id: conversation_id.clone(),
                uid,
            });
        }
        Ok(created)
    }

    async fn get_request(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
    ) -> StorageResult<Option<MembershipRequest>> {
        Ok(self
            .requests
            .get(conversation_id)
            .and_then(|r| r.get(uid).cloned()))
    }

    async fn list_requests(
        &self,
        conversation_id: &ConversationId,
    ) -> StorageResult<Vec<MembershipRequest>> {
        let mut requests: Vec<_> = self
            .requests
            .get(conversation_id)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    async fn delete_request(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
    ) -> StorageResult<bool> {
        self.check_writable("delete_request")?;

        let removed = self
            .requests
            .get_mut(conversation_id)
            .map(|mut r| r.remove(uid).is_some())
            .unwrap_or(false);

        if removed {
            self.publish(StoreEvent::RequestChanged {
                conversation_id: conversation_id.clone(),
                uid: uid.clone(),
            });
        }
        Ok(removed)
    }

    async fn put_ban(&self, conversation_id: &ConversationId, ban: Ban) -> StorageResult<()> {
        self.check_writable("put_ban")?;
        self.require_conversation(conversation_id)?;

        let uid = ban.uid.clone();
        self.bans
            .entry(conversation_id.clone())
            .or_default()
            .insert(uid.clone(), ban);

        self.publish(StoreEvent::BanAdded {
            conversation_id: conversation_id.clone(),
            uid,
        });
        Ok(())
    }

    async fn get_ban(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
    ) -> StorageResult<Option<Ban>> {
        Ok(self
            .bans
            .get(conversation_id)
            .and_then(|b| b.get(uid).cloned()))
    }

    async fn list_bans(&self, conversation_id: &ConversationId) -> StorageResult<Vec<Ban>> {
        Ok(self
            .bans
            .get(conversation_id)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_push_token(&self, uid: &UserId, token: String) -> StorageResult<()> {
        self.check_writable("put_push_token")?;
        self.push_tokens.insert(uid.clone(), token);
        Ok(())
    }

    async fn push_token(&self, uid: &UserId) -> StorageResult<Option<String>> {
        Ok(self.push_tokens.get(uid).map(|t| t.clone()))
    }

    fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }
}
