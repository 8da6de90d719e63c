//! Conversation session: the synchronizer for one open conversation.
//!
//! A session is created when a conversation is opened and torn down when the
//! user switches away. While alive it follows the conversation document and
//! its message stream, and republishes derived view state on `watch`
//! channels. Closing it stops the sync task and clears the user's typing
//! signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aula_core::{Conversation, ConversationId, ConversationKind, Message, UserId};
use aula_store::{ConversationUpdate, FieldOp, Precondition, StorageError, StoreEvent};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::channel::{MessageChannel, MessageFeed, OutgoingAttachment};
use crate::context::{MessagingContext, rejected};
use crate::directory::{Avatar, ConversationDirectory};
use crate::error::{MessagingError, Result};
use crate::membership::{MembershipManager, MembershipState};
use crate::presence::{PresenceTracker, TypingSignal, active_typers, typing_label};

/// How often typing indicators are re-evaluated against the TTL.
const TYPING_REFRESH: Duration = Duration::from_secs(1);

/// Whether and why the composer accepts input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerState {
    Enabled,
    /// Group the user can join before writing.
    JoinToSend,
    PendingApproval,
    Banned,
    /// Non-group conversation the user only observes.
    ReadOnly,
}

impl ComposerState {
    pub fn for_membership(state: MembershipState, kind: ConversationKind) -> Self {
        match state {
            MembershipState::Member => Self::Enabled,
            MembershipState::Pending => Self::PendingApproval,
            MembershipState::Banned => Self::Banned,
            MembershipState::NonMember if kind == ConversationKind::Group => Self::JoinToSend,
            MembershipState::NonMember => Self::ReadOnly,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Everything the conversation pane renders besides the messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub conversation: Conversation,
    pub title: String,
    pub avatar: Avatar,
    pub membership: MembershipState,
    pub composer: ComposerState,
    pub can_moderate: bool,
    /// "A is typing…" style indicator, if anyone is.
    pub typing: Option<String>,
}

impl ConversationView {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation.id
    }

    pub fn kind(&self) -> ConversationKind {
        self.conversation.kind
    }

    pub fn member_count(&self) -> u32 {
        self.conversation.member_count
    }
}

/// Derives [`ConversationView`]s for one viewer.
#[derive(Clone)]
struct ViewBuilder {
    ctx: MessagingContext,
    directory: ConversationDirectory,
    membership: MembershipManager,
    viewer: UserId,
}

impl ViewBuilder {
    fn new(ctx: MessagingContext, viewer: UserId) -> Self {
        Self {
            directory: ConversationDirectory::new(ctx.clone()),
            membership: MembershipManager::new(ctx.clone()),
            ctx,
            viewer,
        }
    }

    async fn build(&self, conv: Conversation) -> Result<ConversationView> {
        let membership = self.membership.membership_state(&conv, &self.viewer).await?;
        Ok(ConversationView {
            title: self.directory.display_title(&conv, &self.viewer).await,
            avatar: self.directory.avatar(&conv, &self.viewer).await,
            composer: ComposerState::for_membership(membership, conv.kind),
            can_moderate: self.ctx.authz().can_moderate(&conv, &self.viewer),
            typing: self.typing(&conv).await,
            membership,
            conversation: conv,
        })
    }

    async fn typing(&self, conv: &Conversation) -> Option<String> {
        let config = self.ctx.config();
        let typers = active_typers(conv, &self.viewer, self.ctx.clock().now(), config.typing_ttl);
        let mut names = Vec::with_capacity(typers.len());
        for uid in &typers {
            names.push(self.ctx.profiles().display_name(uid).await);
        }
        typing_label(&names, config.max_typers_shown)
    }
}

/// One open conversation.
pub struct ConversationSession {
    conversation_id: ConversationId,
    me: UserId,
    focused: Arc<AtomicBool>,
    view_rx: watch::Receiver<ConversationView>,
    messages_rx: watch::Receiver<Vec<Message>>,
    presence: PresenceTracker,
    channel: MessageChannel,
    typing: TypingSignal,
    task: JoinHandle<()>,
}

impl ConversationSession {
    /// Open a conversation for the current user.
    ///
    /// Support agents opening a support thread are added to its participants.
    /// Participants get their read marker advanced.
    #[instrument(skip_all, fields(conversation = %conversation_id, focused = focused))]
    pub async fn open(
        ctx: MessagingContext,
        conversation_id: ConversationId,
        focused: bool,
    ) -> Result<Self> {
        let me = ctx.require_user()?.uid;
        let mut conv = ctx.conversation(&conversation_id).await?;
        ctx.authz().require_view(&conv, &me)?;

        if conv.kind == ConversationKind::Support
            && !conv.is_participant(&me)
            && ctx.authz().is_support_agent(&me)
        {
            conv = join_as_agent(&ctx, &conversation_id, &me).await?;
        }

        let presence = PresenceTracker::new(ctx.clone());
        if conv.is_participant(&me) {
            presence.mark_read(&conversation_id).await?;
        }

        // Subscribe before building the first view so no change slips between.
        let events = ctx.store().events();
        let feed = MessageFeed::open(ctx.clone(), conversation_id.clone()).await?;
        let builder = ViewBuilder::new(ctx.clone(), me.clone());
        let view = builder.build(conv).await?;

        let (view_tx, view_rx) = watch::channel(view);
        let (messages_tx, messages_rx) = watch::channel(feed.messages().to_vec());
        let focused = Arc::new(AtomicBool::new(focused));

        let sync = SessionSync {
            conversation_id: conversation_id.clone(),
            me: me.clone(),
            builder,
            presence: presence.clone(),
            feed,
            events,
            view_tx,
            messages_tx,
            focused: Arc::clone(&focused),
        };
        let task = tokio::spawn(sync.run());

        info!("Opened conversation");
        Ok(Self {
            channel: MessageChannel::new(ctx.clone()),
            typing: TypingSignal::new(ctx, conversation_id.clone(), me.clone()),
            conversation_id,
            me,
            focused,
            view_rx,
            messages_rx,
            presence,
            task,
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Latest view state.
    pub fn view(&self) -> ConversationView {
        self.view_rx.borrow().clone()
    }

    pub fn view_rx(&self) -> watch::Receiver<ConversationView> {
        self.view_rx.clone()
    }

    /// Latest message window, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.messages_rx.borrow().clone()
    }

    pub fn messages_rx(&self) -> watch::Receiver<Vec<Message>> {
        self.messages_rx.clone()
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::Relaxed)
    }

    /// Record window focus. Regaining focus marks the conversation read.
    pub async fn set_focused(&self, focused: bool) -> Result<()> {
        self.focused.store(focused, Ordering::Relaxed);
        if focused && self.view_rx.borrow().membership == MembershipState::Member {
            self.presence.mark_read(&self.conversation_id).await?;
        }
        Ok(())
    }

    /// A keystroke in the composer.
    pub async fn typing(&self) -> Result<bool> {
        if !self.view_rx.borrow().composer.is_enabled() {
            return Ok(false);
        }
        self.typing.bump().await
    }

    /// Send from this conversation's composer.
    pub async fn send(&self, text: &str, attachments: Vec<OutgoingAttachment>) -> Result<Message> {
        let composer = self.view_rx.borrow().composer;
        match composer {
            ComposerState::Enabled => {}
            ComposerState::JoinToSend => return Err(MessagingError::NotMember),
            _ => return Err(MessagingError::ComposerDisabled),
        }
        let message = self
            .channel
            .send(&self.conversation_id, text, attachments)
            .await?;
        if let Err(e) = self.typing.clear().await {
            debug!(error = %e, "Typing clear after send failed");
        }
        Ok(message)
    }

    /// Stop syncing and clear our typing signal.
    pub async fn close(&self) {
        self.task.abort();
        if let Err(e) = self.typing.clear().await {
            debug!(conversation = %self.conversation_id, error = %e, "Typing clear on close failed");
        }
        debug!(conversation = %self.conversation_id, user = %self.me, "Closed conversation");
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn join_as_agent(
    ctx: &MessagingContext,
    conversation_id: &ConversationId,
    agent: &UserId,
) -> Result<Conversation> {
    let update = ConversationUpdate::new()
        .require(Precondition::NotParticipant(agent.clone()))
        .op(FieldOp::AddParticipant(agent.clone()))
        .op(FieldOp::IncrementMemberCount(1));
    match ctx.store().update_conversation(conversation_id, update).await {
        Ok(conv) => {
            info!(agent = %agent, "Support agent joined thread");
            Ok(conv)
        }
        // Joined meanwhile from another client.
        Err(StorageError::PreconditionFailed(_)) => ctx.conversation(conversation_id).await,
        Err(e) => Err(rejected("join_support", conversation_id)(e)),
    }
}

/// Background task that keeps a session's watch channels current.
struct SessionSync {
    conversation_id: ConversationId,
    me: UserId,
    builder: ViewBuilder,
    presence: PresenceTracker,
    feed: MessageFeed,
    events: broadcast::Receiver<StoreEvent>,
    view_tx: watch::Sender<ConversationView>,
    messages_tx: watch::Sender<Vec<Message>>,
    focused: Arc<AtomicBool>,
}

impl SessionSync {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(TYPING_REFRESH);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.feed.next() => match message {
                    Some(message) => self.on_message(message).await,
                    None => break,
                },
                event = self.events.recv() => match event {
                    Ok(event) => self.on_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(conversation = %self.conversation_id, skipped, "Session lagged, refreshing");
                        self.refetch().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick.tick() => self.refresh_typing().await,
            }
        }
        debug!(conversation = %self.conversation_id, "Session sync stopped");
    }

    async fn on_message(&mut self, message: Message) {
        self.messages_tx.send_replace(self.feed.messages().to_vec());

        let participant = self.view_tx.borrow().membership == MembershipState::Member;
        if participant && message.sender_id != self.me && self.focused.load(Ordering::Relaxed) {
            if let Err(e) = self.presence.mark_read(&self.conversation_id).await {
                debug!(error = %e, "Mark read on new message failed");
            }
        }
    }

    async fn on_event(&mut self, event: StoreEvent) {
        if event.conversation_id() != &self.conversation_id {
            return;
        }
        match event {
            StoreEvent::ConversationChanged(conv) => self.publish(conv).await,
            StoreEvent::RequestChanged { uid, .. } | StoreEvent::BanAdded { uid, .. }
                if uid == self.me =>
            {
                let conv = self.view_tx.borrow().conversation.clone();
                self.publish(conv).await;
            }
            _ => {}
        }
    }

    async fn refetch(&mut self) {
        if let Err(e) = self.feed.resync().await {
            debug!(error = %e, "Message resync failed");
        } else {
            self.messages_tx.send_replace(self.feed.messages().to_vec());
        }
        if let Ok(conv) = self.builder.ctx.conversation(&self.conversation_id).await {
            self.publish(conv).await;
        }
    }

    /// Rebuild the view from `conv`, keeping the last good one on failure.
    async fn publish(&mut self, conv: Conversation) {
        match self.builder.build(conv).await {
            Ok(view) => {
                self.view_tx.send_if_modified(|current| {
                    if *current == view {
                        false
                    } else {
                        *current = view;
                        true
                    }
                });
            }
            Err(e) => warn!(conversation = %self.conversation_id, error = %e, "View rebuild failed"),
        }
    }

    async fn refresh_typing(&mut self) {
        let conv = self.view_tx.borrow().conversation.clone();
        let typing = self.builder.typing(&conv).await;
        self.view_tx.send_if_modified(|view| {
            if view.typing == typing {
                false
            } else {
                view.typing = typing;
                true
            }
        });
    }
}
