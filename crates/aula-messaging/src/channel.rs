//! Message channel: append-only, ordered message stream per conversation.
//!
//! A send uploads attachments one at a time, appends a single message whose
//! `createdAt` the store assigns, then refreshes the conversation's
//! `lastMessage`/`lastAt` summary and the sender's read marker.
//!
//! Order is the store's receipt order. Client clocks play no part in it.

use aula_core::{Attachment, ConversationId, LastMessage, Message, UserId};
use aula_store::{ConversationUpdate, FieldOp, MessageDraft, StoreEvent};
use bytes::Bytes;
use futures::Stream;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::{MessagingContext, rejected};
use crate::error::{MessagingError, Result};

/// A file picked for upload with the next message.
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl OutgoingAttachment {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }
}

/// Text stored in `lastMessage`: the message text cut to `max_chars`, or an
/// attachment placeholder when the text is blank.
pub fn preview_text(text: &str, attachments: &[Attachment], max_chars: usize) -> String {
    let text = text.trim();
    let preview = if !text.is_empty() {
        text.to_string()
    } else {
        match attachments {
            [] => String::new(),
            [only] => format!("📎 {}", only.name),
            [first, rest @ ..] => format!("📎 {} +{}", first.name, rest.len()),
        }
    };
    preview.chars().take(max_chars).collect()
}

/// Blob path for an attachment:
/// `chat/<conversation>/<sender>/<millis>_<send nonce>_<index>_<name>`.
///
/// The nonce is fresh per send, so no two sends share a path and cleanup of a
/// failed send only ever touches its own blobs.
fn attachment_path(
    conversation_id: &ConversationId,
    sender: &UserId,
    stamp: i64,
    nonce: &str,
    index: usize,
    name: &str,
) -> String {
    let mut safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.trim_matches('.').is_empty() {
        safe = "file".to_string();
    }
    format!("chat/{conversation_id}/{sender}/{stamp}_{nonce}_{index}_{safe}")
}

/// Sends messages and opens message feeds.
#[derive(Clone)]
pub struct MessageChannel {
    ctx: MessagingContext,
}

impl MessageChannel {
    pub fn new(ctx: MessagingContext) -> Self {
        Self { ctx }
    }

    /// Send a message as the current user.
    ///
    /// # Errors
    ///
    /// - `EmptyMessage` for blank text with no attachments
    /// - `NotMember` (groups) or `ComposerDisabled` when the sender is not a participant
    /// - `Upload` if an attachment fails to upload; nothing is appended
    #[instrument(skip_all, fields(conversation = %conversation_id, attachments = attachments.len()))]
    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        attachments: Vec<OutgoingAttachment>,
    ) -> Result<Message> {
        let me = self.ctx.require_user()?;
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(MessagingError::EmptyMessage);
        }

        let conv = self.ctx.conversation(conversation_id).await?;
        if !conv.is_participant(&me.uid) {
            return Err(if conv.is_group() {
                MessagingError::NotMember
            } else {
                MessagingError::ComposerDisabled
            });
        }

        let uploaded = self.upload_all(conversation_id, &me.uid, attachments).await?;

        let draft = MessageDraft {
            sender_id: me.uid.clone(),
            sender_name: me.display_name.clone(),
            text: text.to_string(),
            attachments: uploaded.clone(),
        };
        let message = match self.ctx.store().append_message(conversation_id, draft).await {
            Ok(message) => message,
            Err(e) => {
                let err = rejected("append_message", conversation_id)(e);
                self.discard_uploads(conversation_id, &uploaded).await;
                return Err(err);
            }
        };

        let summary = LastMessage {
            text: preview_text(
                &message.text,
                &message.attachments,
                self.ctx.config().preview_chars,
            ),
            sender_id: me.uid.clone(),
            sender_name: me.display_name,
        };
        let update = ConversationUpdate::new()
            .op(FieldOp::SetLastMessage(summary))
            .op(FieldOp::SetRead(me.uid));
        if let Err(e) = self
            .ctx
            .store()
            .update_conversation(conversation_id, update)
            .await
        {
            // The message itself is stored; only the list summary lags.
            warn!(message = %message.id, error = %e, "Conversation summary not updated after send");
        }

        info!(message = %message.id, "Sent message");
        Ok(message)
    }

    async fn upload_all(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        attachments: Vec<OutgoingAttachment>,
    ) -> Result<Vec<Attachment>> {
        let stamp = self.ctx.clock().now().timestamp_millis();
        let nonce = Uuid::new_v4().simple().to_string();
        let mut uploaded: Vec<Attachment> = Vec::with_capacity(attachments.len());

        for (index, attachment) in attachments.into_iter().enumerate() {
            let OutgoingAttachment {
                name,
                content_type,
                data,
            } = attachment;
            let path = attachment_path(conversation_id, sender, stamp, &nonce, index, &name);

            match self.ctx.blobs().upload(&path, data, &content_type).await {
                Ok(blob) => {
                    debug!(path = %blob.path, size = blob.size, "Uploaded attachment");
                    uploaded.push(Attachment {
                        url: blob.url,
                        name,
                        size: blob.size,
                        content_type: blob.content_type,
                        path: blob.path,
                    });
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Attachment upload failed");
                    self.discard_uploads(conversation_id, &uploaded).await;
                    return Err(MessagingError::Upload {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(uploaded)
    }

    /// Best-effort removal of blobs uploaded for a send that did not complete.
    async fn discard_uploads(&self, conversation_id: &ConversationId, uploaded: &[Attachment]) {
        if uploaded.is_empty() {
            return;
        }
        if !self.ctx.config().cleanup_orphaned_uploads {
            debug!(conversation = %conversation_id, count = uploaded.len(), "Leaving orphaned uploads");
            return;
        }
        for attachment in uploaded {
            if let Err(e) = self.ctx.blobs().delete(&attachment.path).await {
                warn!(path = %attachment.path, error = %e, "Failed to delete orphaned upload");
            }
        }
    }

    /// The most recent messages of a conversation, oldest first.
    pub async fn recent(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        let me = self.ctx.require_user()?;
        let conv = self.ctx.conversation(conversation_id).await?;
        self.ctx.authz().require_view(&conv, &me.uid)?;
        self.ctx
            .store()
            .recent_messages(conversation_id, self.ctx.config().message_window)
            .await
            .map_err(rejected("recent_messages", conversation_id))
    }

    /// Live, ascending message window for a conversation.
    pub async fn subscribe(&self, conversation_id: &ConversationId) -> Result<MessageFeed> {
        let me = self.ctx.require_user()?;
        let conv = self.ctx.conversation(conversation_id).await?;
        self.ctx.authz().require_view(&conv, &me.uid)?;
        MessageFeed::open(self.ctx.clone(), conversation_id.clone()).await
    }
}

/// Capped, ascending window of a conversation's messages that follows new appends.
pub struct MessageFeed {
    ctx: MessagingContext,
    conversation_id: ConversationId,
    window: usize,
    messages: Vec<Message>,
    events: broadcast::Receiver<StoreEvent>,
}

impl MessageFeed {
    /// Load the initial window and start following appends.
    pub(crate) async fn open(ctx: MessagingContext, conversation_id: ConversationId) -> Result<Self> {
        // Subscribe before loading so nothing appended in between is missed.
        let events = ctx.store().events();
        let mut feed = Self {
            window: ctx.config().message_window,
            ctx,
            conversation_id,
            messages: Vec::new(),
            events,
        };
        feed.resync().await?;
        Ok(feed)
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Current window, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Reload the window from the store.
    pub async fn resync(&mut self) -> Result<()> {
        self.messages = self
            .ctx
            .store()
            .recent_messages(&self.conversation_id, self.window)
            .await
            .map_err(rejected("recent_messages", &self.conversation_id))?;
        Ok(())
    }

    /// Wait for the next message appended to this conversation.
    ///
    /// Returns `None` once the store stops publishing.
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            match self.events.recv().await {
                Ok(StoreEvent::MessageAdded(message))
                    if message.conversation_id == self.conversation_id =>
                {
                    if self.push(message.clone()) {
                        return Some(message);
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(conversation = %self.conversation_id, skipped, "Message feed lagged, resyncing");
                    // Keep the last good window if the reload fails.
                    if let Err(e) = self.resync().await {
                        debug!(error = %e, "Resync failed");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Insert in order, dropping duplicates and trimming to the window.
    fn push(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        if self.messages.len() > self.window {
            let excess = self.messages.len() - self.window;
            self.messages.drain(..excess);
        }
        true
    }

    /// Consume the feed as a stream of newly appended messages.
    pub fn into_stream(self) -> impl Stream<Item = Message> + Send {
        async_stream::stream! {
            let mut feed = self;
            while let Some(message) = feed.next().await {
                yield message;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str) -> Attachment {
        Attachment {
            url: format!("mem://{name}"),
            name: name.to_string(),
            size: 1,
            content_type: "application/octet-stream".into(),
            path: name.to_string(),
        }
    }

    #[test]
    fn test_preview_truncates_text() {
        let long = "a".repeat(300);
        assert_eq!(preview_text(&long, &[], 120).chars().count(), 120);
        assert_eq!(preview_text("  Hola  ", &[], 120), "Hola");
    }

    #[test]
    fn test_preview_counts_chars_not_bytes() {
        let text = "ñ".repeat(130);
        assert_eq!(preview_text(&text, &[], 120), "ñ".repeat(120));
    }

    #[test]
    fn test_preview_attachment_placeholder() {
        assert_eq!(preview_text("", &[attachment("clip.webm")], 120), "📎 clip.webm");
        assert_eq!(
            preview_text(" ", &[attachment("a.png"), attachment("b.png")], 120),
            "📎 a.png +1"
        );
    }

    #[test]
    fn test_attachment_path_sanitizes_name() {
        let conv = ConversationId::from("c1");
        let ana = UserId::parse("ana").unwrap();
        let path = attachment_path(&conv, &ana, 1700, "n1", 0, "mi tarea (1).pdf");
        assert_eq!(path, "chat/c1/ana/1700_n1_0_mi_tarea__1_.pdf");

        let path = attachment_path(&conv, &ana, 1700, "n1", 2, "..");
        assert_eq!(path, "chat/c1/ana/1700_n1_2_file");
    }

    #[test]
    fn test_attachment_path_differs_per_sender_and_send() {
        let conv = ConversationId::from("ana__ben");
        let ana = UserId::parse("ana").unwrap();
        let ben = UserId::parse("ben").unwrap();
        let first = attachment_path(&conv, &ana, 1700, "n1", 0, "worksheet.pdf");
        assert_ne!(first, attachment_path(&conv, &ben, 1700, "n1", 0, "worksheet.pdf"));
        assert_ne!(first, attachment_path(&conv, &ana, 1700, "n2", 0, "worksheet.pdf"));
    }
}
