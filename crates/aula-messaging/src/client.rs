//! Client facade: one user's entry point to messaging.
//!
//! Owns at most one open [`ConversationSession`]. Opening another
//! conversation closes the previous session first.

use std::sync::Arc;

use aula_core::{Conversation, ConversationId, Message, UserId};
use tokio::sync::{Mutex, watch};
use tracing::{debug, instrument};

use crate::channel::{MessageChannel, OutgoingAttachment};
use crate::context::MessagingContext;
use crate::directory::ConversationDirectory;
use crate::error::{MessagingError, Result};
use crate::inflight::InFlight;
use crate::membership::{JoinOutcome, MembershipManager};
use crate::notify::{
    ActivityState, NotificationDispatcher, NotificationSink, PushPlatform, PushRegistration,
};
use crate::presence::PresenceTracker;
use crate::session::{ConversationSession, ConversationView};

/// Handles to the conversation that was just opened.
#[derive(Debug, Clone)]
pub struct OpenedConversation {
    pub view: watch::Receiver<ConversationView>,
    pub messages: watch::Receiver<Vec<Message>>,
}

/// Messaging for one signed-in client.
pub struct MessagingClient {
    ctx: MessagingContext,
    directory: ConversationDirectory,
    membership: MembershipManager,
    channel: MessageChannel,
    presence: PresenceTracker,
    inflight: InFlight,
    activity_tx: watch::Sender<ActivityState>,
    session: Mutex<Option<Arc<ConversationSession>>>,
    dispatcher: Option<NotificationDispatcher>,
}

impl MessagingClient {
    pub fn new(ctx: MessagingContext) -> Self {
        let (activity_tx, _) = watch::channel(ActivityState {
            focused: true,
            active: None,
        });
        Self {
            directory: ConversationDirectory::new(ctx.clone()),
            membership: MembershipManager::new(ctx.clone()),
            channel: MessageChannel::new(ctx.clone()),
            presence: PresenceTracker::new(ctx.clone()),
            ctx,
            inflight: InFlight::new(),
            activity_tx,
            session: Mutex::new(None),
            dispatcher: None,
        }
    }

    /// Raise notifications for incoming messages into `sink`.
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        let dispatcher =
            NotificationDispatcher::spawn(self.ctx.clone(), sink, self.activity_tx.subscribe());
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn context(&self) -> &MessagingContext {
        &self.ctx
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn membership(&self) -> &MembershipManager {
        &self.membership
    }

    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn notifications(&self) -> Option<&NotificationDispatcher> {
        self.dispatcher.as_ref()
    }

    /// The signed-in user's id.
    pub fn user_id(&self) -> Result<UserId> {
        Ok(self.ctx.require_user()?.uid)
    }

    pub fn activity(&self) -> ActivityState {
        self.activity_tx.borrow().clone()
    }

    /// Open a conversation, closing whichever one was open.
    #[instrument(skip_all, fields(conversation = %conversation_id))]
    pub async fn open(&self, conversation_id: &ConversationId) -> Result<OpenedConversation> {
        let mut slot = self.session.lock().await;
        if let Some(previous) = slot.take() {
            previous.close().await;
        }
        self.activity_tx.send_modify(|a| a.active = None);

        let focused = self.activity_tx.borrow().focused;
        let session = ConversationSession::open(self.ctx.clone(), conversation_id.clone(), focused).await?;
        let opened = OpenedConversation {
            view: session.view_rx(),
            messages: session.messages_rx(),
        };
        *slot = Some(Arc::new(session));
        self.activity_tx
            .send_modify(|a| a.active = Some(conversation_id.clone()));
        Ok(opened)
    }

    /// Open (creating if needed) the DM with `other`.
    pub async fn open_dm(&self, other: &UserId) -> Result<(Conversation, OpenedConversation)> {
        let conv = self.directory.open_or_create_dm(other).await?;
        let opened = self.open(&conv.id).await?;
        Ok((conv, opened))
    }

    /// Close the open conversation, if any.
    pub async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
        self.activity_tx.send_modify(|a| a.active = None);
    }

    /// The open session, if any.
    pub async fn session(&self) -> Option<Arc<ConversationSession>> {
        self.session.lock().await.clone()
    }

    /// Id of the open conversation.
    pub async fn active(&self) -> Option<ConversationId> {
        self.session()
            .await
            .map(|s| s.conversation_id().clone())
    }

    /// Window focus changed.
    pub async fn set_focused(&self, focused: bool) -> Result<()> {
        self.activity_tx.send_modify(|a| a.focused = focused);
        if let Some(session) = self.session().await {
            session.set_focused(focused).await?;
        }
        Ok(())
    }

    /// Keystroke in the open conversation's composer.
    pub async fn typing(&self) -> Result<bool> {
        match self.session().await {
            Some(session) => session.typing().await,
            None => Ok(false),
        }
    }

    /// Send in the open conversation.
    ///
    /// A second send while the first is still settling fails with `Busy`.
    pub async fn send(&self, text: &str, attachments: Vec<OutgoingAttachment>) -> Result<Message> {
        let session = self
            .session()
            .await
            .ok_or(MessagingError::ComposerDisabled)?;
        let _in_flight = self
            .inflight
            .begin(format!("send:{}", session.conversation_id()))?;
        session.send(text, attachments).await
    }

    /// Join or request to join a group.
    pub async fn request_join(&self, conversation_id: &ConversationId) -> Result<JoinOutcome> {
        let _in_flight = self.inflight.begin(format!("join:{conversation_id}"))?;
        self.membership.request_join(conversation_id).await
    }

    /// Best-effort push registration; see [`NotificationDispatcher::register_push`].
    pub async fn register_push(&self, platform: Arc<dyn PushPlatform>) -> PushRegistration {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.register_push(platform).await,
            None => {
                debug!("Push registration without a notification sink");
                PushRegistration::Failed("notifications disabled".into())
            }
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.inflight
    }
}
