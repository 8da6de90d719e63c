//! Notification dispatcher.
//!
//! Watches the store's message stream and raises a local notification for
//! messages from other people that the user is not currently looking at.
//! Each message is announced at most once per conversation.
//!
//! Push registration is optional and best-effort. It never returns an error;
//! the outcome is reported as a [`PushRegistration`] value.

use std::sync::Arc;

use async_trait::async_trait;
use aula_core::{Conversation, ConversationId, ConversationKind, Message, MessageId, UserId};
use aula_store::StoreEvent;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::preview_text;
use crate::context::MessagingContext;
use crate::directory::ConversationDirectory;
use crate::stream::broadcast_to_stream;

/// What the user is looking at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityState {
    /// Whether the app window has focus.
    pub focused: bool,
    /// Conversation currently open, if any.
    pub active: Option<ConversationId>,
}

impl ActivityState {
    pub fn viewing(&self, conversation_id: &ConversationId) -> bool {
        self.focused && self.active.as_ref() == Some(conversation_id)
    }
}

/// A notification ready to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub title: String,
    pub body: String,
}

/// Where notifications are shown.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that records notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    shown: Mutex<Vec<Notification>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.shown.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.shown.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.lock().is_empty()
    }
}

impl NotificationSink for MemoryNotificationSink {
    fn notify(&self, notification: Notification) {
        self.shown.lock().push(notification);
    }
}

/// Errors reported by a push platform.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("Push is not configured: {0}")]
    Misconfigured(String),

    #[error("Push platform error: {0}")]
    Platform(String),
}

/// Platform push service (permission prompt, background worker, tokens).
#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Ask the user for permission. `Ok(false)` means denied.
    async fn request_permission(&self) -> Result<bool, PushError>;

    /// Register the background delivery worker.
    async fn register_worker(&self) -> Result<(), PushError>;

    /// Token the push service delivers to.
    async fn delivery_token(&self) -> Result<String, PushError>;

    /// Push messages that arrive while the app is in the foreground.
    fn foreground_messages(&self) -> Option<broadcast::Receiver<Notification>>;
}

/// Outcome of [`NotificationDispatcher::register_push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRegistration {
    Registered,
    Unsupported,
    Denied,
    Failed(String),
}

/// Whether a message should raise a notification for `me`.
pub fn should_notify(message: &Message, me: &UserId, activity: &ActivityState) -> bool {
    &message.sender_id != me && !activity.viewing(&message.conversation_id)
}

struct DispatcherInner {
    ctx: MessagingContext,
    directory: ConversationDirectory,
    sink: Arc<dyn NotificationSink>,
    activity: watch::Receiver<ActivityState>,
    last_notified: DashMap<ConversationId, MessageId>,
    push: Mutex<Option<PushRegistration>>,
}

impl DispatcherInner {
    /// Claim `message_id` as the latest notified message of its conversation.
    ///
    /// Returns `false` if it was already announced.
    fn claim(&self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        match self.last_notified.entry(conversation_id.clone()) {
            Entry::Occupied(mut last) => {
                if last.get() == message_id {
                    false
                } else {
                    last.insert(message_id.clone());
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(message_id.clone());
                true
            }
        }
    }

    async fn handle(&self, message: &Message) -> Option<Notification> {
        let me = self.ctx.identity().current_user()?.uid;
        let activity = self.activity.borrow().clone();
        if !should_notify(message, &me, &activity) {
            return None;
        }

        let conv = match self.ctx.conversation(&message.conversation_id).await {
            Ok(conv) => conv,
            Err(e) => {
                debug!(conversation = %message.conversation_id, error = %e, "Skipping notification");
                return None;
            }
        };
        if !self.in_audience(&conv, &me) || !self.claim(&conv.id, &message.id) {
            return None;
        }

        let notification = Notification {
            conversation_id: conv.id.clone(),
            message_id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            title: self.directory.display_title(&conv, &me).await,
            body: preview_text(
                &message.text,
                &message.attachments,
                self.ctx.config().preview_chars,
            ),
        };
        self.sink.notify(notification.clone());
        debug!(conversation = %conv.id, message = %message.id, "Raised notification");
        Some(notification)
    }

    fn in_audience(&self, conv: &Conversation, me: &UserId) -> bool {
        conv.is_participant(me)
            || (conv.kind == ConversationKind::Support && self.ctx.authz().is_support_agent(me))
    }

    /// Show a foreground push under the same rules as a stored message.
    async fn forward_push(&self, notification: Notification) {
        let Some(me) = self.ctx.identity().current_user().map(|user| user.uid) else {
            return;
        };
        let viewing = self.activity.borrow().viewing(&notification.conversation_id);
        if notification.sender_id == me || viewing {
            return;
        }

        match self.ctx.conversation(&notification.conversation_id).await {
            Ok(conv) if self.in_audience(&conv, &me) => {}
            Ok(_) => {
                debug!(conversation = %notification.conversation_id, "Dropping push outside audience");
                return;
            }
            Err(e) => {
                debug!(conversation = %notification.conversation_id, error = %e, "Dropping push");
                return;
            }
        }
        if self.claim(&notification.conversation_id, &notification.message_id) {
            self.sink.notify(notification);
        }
    }
}

/// Background observer that raises notifications for new messages.
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
    task: JoinHandle<()>,
    push_task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Start observing the store.
    pub fn spawn(
        ctx: MessagingContext,
        sink: Arc<dyn NotificationSink>,
        activity: watch::Receiver<ActivityState>,
    ) -> Self {
        let mut events = ctx.store().events();
        let inner = Arc::new(DispatcherInner {
            directory: ConversationDirectory::new(ctx.clone()),
            ctx,
            sink,
            activity,
            last_notified: DashMap::new(),
            push: Mutex::new(None),
        });

        let observer = Arc::clone(&inner);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(StoreEvent::MessageAdded(message)) => {
                        observer.handle(&message).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification dispatcher lagged; some messages not announced");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Notification dispatcher stopped");
        });

        Self {
            inner,
            task,
            push_task: Mutex::new(None),
        }
    }

    /// Announce `message` if it qualifies, exactly as the background task would.
    pub async fn observe(&self, message: &Message) -> Option<Notification> {
        self.inner.handle(message).await
    }

    /// Register for push delivery once per dispatcher.
    ///
    /// Repeated calls return the first outcome without touching the platform.
    pub async fn register_push(&self, platform: Arc<dyn PushPlatform>) -> PushRegistration {
        if let Some(previous) = self.inner.push.lock().clone() {
            return previous;
        }
        let outcome = self.try_register(platform).await;
        match &outcome {
            PushRegistration::Registered => info!("Push notifications registered"),
            PushRegistration::Failed(reason) => debug!(reason = %reason, "Push registration skipped"),
            other => debug!(outcome = ?other, "Push registration skipped"),
        }
        *self.inner.push.lock() = Some(outcome.clone());
        outcome
    }

    async fn try_register(&self, platform: Arc<dyn PushPlatform>) -> PushRegistration {
        if !platform.is_supported() {
            return PushRegistration::Unsupported;
        }
        let Some(me) = self.inner.ctx.identity().current_user() else {
            return PushRegistration::Failed("not signed in".into());
        };

        match platform.request_permission().await {
            Ok(true) => {}
            Ok(false) => return PushRegistration::Denied,
            Err(e) => return PushRegistration::Failed(e.to_string()),
        }
        if let Err(e) = platform.register_worker().await {
            return PushRegistration::Failed(e.to_string());
        }
        let token = match platform.delivery_token().await {
            Ok(token) => token,
            Err(e) => return PushRegistration::Failed(e.to_string()),
        };
        if let Err(e) = self.inner.ctx.store().put_push_token(&me.uid, token).await {
            return PushRegistration::Failed(e.to_string());
        }

        if let Some(rx) = platform.foreground_messages() {
            let inner = Arc::clone(&self.inner);
            let forward = tokio::spawn(async move {
                let mut pushes = broadcast_to_stream(rx);
                while let Some(notification) = pushes.next().await {
                    inner.forward_push(notification).await;
                }
            });
            if let Some(previous) = self.push_task.lock().replace(forward) {
                previous.abort();
            }
        }
        PushRegistration::Registered
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(task) = self.push_task.lock().take() {
            task.abort();
        }
    }
}
