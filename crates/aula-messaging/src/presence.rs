//! Read markers and typing signals.
//!
//! Both live on the conversation document as per-user maps (`reads.<uid>`,
//! `typing.<uid>`). Each write touches only the caller's own entry, so
//! concurrent users never clobber each other.
//!
//! Readers decide freshness themselves: a typing entry older than the TTL is
//! ignored whether or not its writer ever cleared it.

use std::sync::Arc;
use std::time::Duration;

use aula_core::{Conversation, ConversationId, Message, Timestamp, UserId};
use aula_store::{ConversationUpdate, FieldOp, Precondition, StorageError};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::context::{MessagingContext, rejected};
use crate::error::{MessagingError, Result};

/// Read status of a message, from its sender's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// No other participant has read it.
    Sent,
    /// Some, but not all, other participants have read it.
    SeenBy(usize),
    /// Every other participant has read it.
    Seen,
}

impl std::fmt::Display for ReadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadStatus::Sent => write!(f, "Sent"),
            ReadStatus::SeenBy(k) => write!(f, "Seen by {k}"),
            ReadStatus::Seen => write!(f, "Seen"),
        }
    }
}

/// Whether `conv` has activity `uid` has not seen.
///
/// A conversation whose last message came from `uid` is never unread for them.
pub fn is_unread(conv: &Conversation, uid: &UserId) -> bool {
    let Some(last) = conv.last_message.as_ref() else {
        return false;
    };
    if &last.sender_id == uid {
        return false;
    }
    match (conv.read_marker(uid), conv.last_at) {
        (None, _) => true,
        (Some(read), Some(last_at)) => read < last_at,
        (Some(_), None) => false,
    }
}

/// Number of conversations in `convs` that are unread for `uid`.
pub fn unread_count<'a>(convs: impl IntoIterator<Item = &'a Conversation>, uid: &UserId) -> usize {
    convs.into_iter().filter(|c| is_unread(c, uid)).count()
}

/// Read status label for one of `viewer`'s own messages.
///
/// Returns `None` for messages sent by someone else.
pub fn read_status(conv: &Conversation, message: &Message, viewer: &UserId) -> Option<ReadStatus> {
    if &message.sender_id != viewer {
        return None;
    }
    let others: Vec<&UserId> = conv.other_participants(viewer).collect();
    let seen = others
        .iter()
        .filter(|uid| {
            conv.read_marker(uid)
                .is_some_and(|read| read >= message.created_at)
        })
        .count();

    Some(if seen == 0 {
        ReadStatus::Sent
    } else if seen < others.len() {
        ReadStatus::SeenBy(seen)
    } else {
        ReadStatus::Seen
    })
}

/// Whether `uid` counts as typing at `now`.
///
/// Entries are fresh while strictly younger than `ttl`.
pub fn is_typing(conv: &Conversation, uid: &UserId, now: Timestamp, ttl: Duration) -> bool {
    let Some(at) = conv.typing_at(uid) else {
        return false;
    };
    match (now - at).to_std() {
        Ok(age) => age < ttl,
        // Entry stamped slightly ahead of our clock.
        Err(_) => true,
    }
}

/// Participants other than `viewer` currently typing, most recent first.
pub fn active_typers(
    conv: &Conversation,
    viewer: &UserId,
    now: Timestamp,
    ttl: Duration,
) -> Vec<UserId> {
    let mut typers: Vec<(&UserId, Timestamp)> = conv
        .typing
        .iter()
        .filter(|(uid, _)| *uid != viewer && is_typing(conv, uid, now, ttl))
        .map(|(uid, at)| (uid, *at))
        .collect();
    typers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    typers.into_iter().map(|(uid, _)| uid.clone()).collect()
}

/// Indicator text for the given typers, naming at most `max_shown`.
pub fn typing_label(names: &[String], max_shown: usize) -> Option<String> {
    let shown = names.len().min(max_shown.max(1));
    let rest = names.len() - shown;
    match (shown, rest) {
        (0, _) => None,
        (1, 0) => Some(format!("{} is typing…", names[0])),
        (_, 0) => {
            let (last, head) = names[..shown].split_last()?;
            Some(format!("{} and {last} are typing…", head.join(", ")))
        }
        _ => Some(format!(
            "{} and {rest} more are typing…",
            names[..shown].join(", ")
        )),
    }
}

/// Writes the current user's read marker.
#[derive(Clone)]
pub struct PresenceTracker {
    ctx: MessagingContext,
}

impl PresenceTracker {
    pub fn new(ctx: MessagingContext) -> Self {
        Self { ctx }
    }

    /// Set `reads[me]` to server time.
    ///
    /// Only participants have a read marker; the store never moves it backwards.
    #[instrument(skip_all, fields(conversation = %conversation_id))]
    pub async fn mark_read(&self, conversation_id: &ConversationId) -> Result<()> {
        let me = self.ctx.require_user()?.uid;
        let update = ConversationUpdate::new()
            .require(Precondition::IsParticipant(me.clone()))
            .op(FieldOp::SetRead(me));

        match self.ctx.store().update_conversation(conversation_id, update).await {
            Ok(_) => {
                trace!("Marked read");
                Ok(())
            }
            Err(StorageError::PreconditionFailed(_)) => Err(MessagingError::NotMember),
            Err(e) => Err(rejected("mark_read", conversation_id)(e)),
        }
    }
}

#[derive(Default)]
struct TypingState {
    /// When our entry was last written, if it is still set
    last_write: Option<Instant>,
    clear_task: Option<JoinHandle<()>>,
}

/// Throttled writer for the current user's typing entry in one conversation.
///
/// Writes at most once per throttle interval and clears the entry after the
/// idle interval passes with no further keystrokes.
pub struct TypingSignal {
    ctx: MessagingContext,
    conversation_id: ConversationId,
    uid: UserId,
    state: Arc<Mutex<TypingState>>,
}

impl TypingSignal {
    pub fn new(ctx: MessagingContext, conversation_id: ConversationId, uid: UserId) -> Self {
        Self {
            ctx,
            conversation_id,
            uid,
            state: Arc::new(Mutex::new(TypingState::default())),
        }
    }

    /// Record a keystroke.
    ///
    /// Returns `true` if this call wrote to the store.
    pub async fn bump(&self) -> Result<bool> {
        let throttle = self.ctx.config().typing_throttle;
        let should_write = {
            let state = self.state.lock();
            state
                .last_write
                .is_none_or(|at| at.elapsed() >= throttle)
        };

        if should_write {
            let update = ConversationUpdate::new()
                .require(Precondition::IsParticipant(self.uid.clone()))
                .op(FieldOp::SetTyping(self.uid.clone()));
            match self
                .ctx
                .store()
                .update_conversation(&self.conversation_id, update)
                .await
            {
                Ok(_) => {}
                Err(StorageError::PreconditionFailed(_)) => return Err(MessagingError::NotMember),
                Err(e) => return Err(rejected("bump_typing", &self.conversation_id)(e)),
            }
            self.state.lock().last_write = Some(Instant::now());
            trace!(conversation = %self.conversation_id, "Typing signal written");
        }

        self.schedule_clear();
        Ok(should_write)
    }

    /// Clear our typing entry now, if we set one.
    pub async fn clear(&self) -> Result<()> {
        let was_set = {
            let mut state = self.state.lock();
            if let Some(task) = state.clear_task.take() {
                task.abort();
            }
            state.last_write.take().is_some()
        };
        if was_set {
            write_clear(&self.ctx, &self.conversation_id, &self.uid).await?;
        }
        Ok(())
    }

    /// Whether our entry is currently set (as far as this writer knows).
    pub fn is_active(&self) -> bool {
        self.state.lock().last_write.is_some()
    }

    fn schedule_clear(&self) {
        let idle = self.ctx.config().typing_idle_clear;
        let ctx = self.ctx.clone();
        let conversation_id = self.conversation_id.clone();
        let uid = self.uid.clone();
        let state = Arc::clone(&self.state);

        let mut guard = self.state.lock();
        if let Some(previous) = guard.clear_task.take() {
            previous.abort();
        }
        guard.clear_task = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let was_set = {
                let mut state = state.lock();
                state.clear_task = None;
                state.last_write.take().is_some()
            };
            if was_set && let Err(e) = write_clear(&ctx, &conversation_id, &uid).await {
                debug!(conversation = %conversation_id, error = %e, "Idle typing clear failed");
            }
        }));
    }
}

impl Drop for TypingSignal {
    fn drop(&mut self) {
        if let Some(task) = self.state.lock().clear_task.take() {
            task.abort();
        }
    }
}

async fn write_clear(
    ctx: &MessagingContext,
    conversation_id: &ConversationId,
    uid: &UserId,
) -> Result<()> {
    let update = ConversationUpdate::new().op(FieldOp::ClearTyping(uid.clone()));
    match ctx.store().update_conversation(conversation_id, update).await {
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(conversation = %conversation_id, error = %e, "Failed to clear typing signal");
            Err(e.into())
        }
    }
}
