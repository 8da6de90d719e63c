//! Group membership: join workflows, moderation, bans, member counting.
//!
//! ```text
//! NonMember --join [open]------------------------------> Member
//! NonMember --join [approval]--> Pending --approve-----> Member
//!                                Pending --decline/cancel--> NonMember
//! Member --leave/remove--> NonMember
//! any --ban--> Banned (absorbing)
//! ```
//!
//! Every mutation is a partial update of the conversation document. Updates
//! that change `participants` also change `memberCount` in the same atomic
//! step, guarded by participant and capacity preconditions, so the counter
//! cannot drift or overshoot the capacity under concurrent joins.

use aula_core::{Ban, Conversation, ConversationId, JoinMode, MembershipRequest, RequestStatus, UserId};
use aula_store::{ConversationUpdate, FieldOp, Precondition, StorageError};
use derive_more::Display;
use tracing::{debug, info, instrument};

use crate::context::{MessagingContext, rejected};
use crate::error::{MessagingError, Result};

/// A user's standing in a conversation.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    #[display("not a member")]
    NonMember,
    #[display("request pending")]
    Pending,
    #[display("member")]
    Member,
    #[display("banned")]
    Banned,
}

/// Result of a join attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Open group: the user is now a participant.
    Joined(Conversation),
    /// Approval group: a pending request was filed.
    Requested,
    /// Approval group: a request was already pending; nothing was written.
    AlreadyPending,
    /// The user was already a participant; nothing was written.
    AlreadyMember,
}

/// Partial change to a group's settings. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSettings {
    pub title: Option<String>,
    pub public: Option<bool>,
    pub join_mode: Option<JoinMode>,
}

/// Membership operations for the current user.
#[derive(Clone)]
pub struct MembershipManager {
    ctx: MessagingContext,
}

impl MembershipManager {
    pub fn new(ctx: MessagingContext) -> Self {
        Self { ctx }
    }

    /// Where `uid` stands in `conv`.
    pub async fn membership_state(&self, conv: &Conversation, uid: &UserId) -> Result<MembershipState> {
        let store = self.ctx.store();
        if conv.is_group()
            && store
                .get_ban(&conv.id, uid)
                .await
                .map_err(rejected("get_ban", &conv.id))?
                .is_some()
        {
            return Ok(MembershipState::Banned);
        }
        if conv.is_participant(uid) {
            return Ok(MembershipState::Member);
        }
        if conv.is_group()
            && store
                .get_request(&conv.id, uid)
                .await
                .map_err(rejected("get_request", &conv.id))?
                .is_some()
        {
            return Ok(MembershipState::Pending);
        }
        Ok(MembershipState::NonMember)
    }

    /// Join a group, or ask to.
    ///
    /// Rejected before any write if the user is banned or the group is full.
    /// Repeating the call is harmless: an existing member or pending request
    /// is reported, never duplicated.
    #[instrument(skip_all, fields(conversation = %conversation_id))]
    pub async fn request_join(&self, conversation_id: &ConversationId) -> Result<JoinOutcome> {
        let me = self.ctx.require_user()?;
        let conv = self.group(conversation_id).await?;

        if conv.is_participant(&me.uid) {
            return Ok(JoinOutcome::AlreadyMember);
        }
        self.ensure_not_banned(&conv, &me.uid).await?;
        let capacity = self.ctx.config().group_capacity;
        if conv.member_count >= capacity {
            return Err(MessagingError::GroupFull { capacity });
        }

        match conv.join_mode {
            JoinMode::Open => {
                let update = admit(&me.uid, capacity).op(FieldOp::SetRead(me.uid.clone()));
                match self.ctx.store().update_conversation(conversation_id, update).await {
                    Ok(conv) => {
                        info!(user = %me.uid, members = conv.member_count, "Joined group");
                        Ok(JoinOutcome::Joined(conv))
                    }
                    Err(StorageError::PreconditionFailed(_)) => {
                        self.explain_failed_admit(conversation_id, &me.uid).await
                    }
                    Err(e) => Err(rejected("request_join", conversation_id)(e)),
                }
            }
            JoinMode::Approval => {
                let name = self.ctx.profiles().profile(&me.uid).await;
                let request = MembershipRequest {
                    uid: me.uid.clone(),
                    name: name
                        .as_ref()
                        .map(|p| p.display_name.clone())
                        .unwrap_or_else(|| me.display_name.clone()),
                    handle: name.and_then(|p| p.handle),
                    status: RequestStatus::Pending,
                    created_at: self.ctx.clock().now(),
                };
                let created = self
                    .ctx
                    .store()
                    .upsert_request(conversation_id, request)
                    .await
                    .map_err(rejected("upsert_request", conversation_id))?;
                if created {
                    info!(user = %me.uid, "Filed join request");
                    Ok(JoinOutcome::Requested)
                } else {
                    Ok(JoinOutcome::AlreadyPending)
                }
            }
        }
    }

    /// Withdraw the current user's pending request.
    pub async fn cancel_request(&self, conversation_id: &ConversationId) -> Result<()> {
        let me = self.ctx.require_user()?;
        self.group(conversation_id).await?;
        let removed = self
            .ctx
            .store()
            .delete_request(conversation_id, &me.uid)
            .await
            .map_err(rejected("cancel_request", conversation_id))?;
        if removed {
            Ok(())
        } else {
            Err(MessagingError::NoPendingRequest)
        }
    }

    /// Pending requests, oldest first. Moderators only.
    pub async fn pending_requests(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MembershipRequest>> {
        self.moderated_group(conversation_id).await?;
        self.ctx
            .store()
            .list_requests(conversation_id)
            .await
            .map_err(rejected("list_requests", conversation_id))
    }

    /// Admit a pending requester. Moderators only.
    ///
    /// The request is deleted after the user is added.
    #[instrument(skip_all, fields(conversation = %conversation_id, user = %uid))]
    pub async fn approve_request(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
    ) -> Result<Conversation> {
        let (conv, _) = self.moderated_group(conversation_id).await?;
        let store = self.ctx.store();

        if store
            .get_request(conversation_id, uid)
            .await
            .map_err(rejected("get_request", conversation_id))?
            .is_none()
        {
            return Err(MessagingError::NoPendingRequest);
        }
        if let Err(e) = self.ensure_not_banned(&conv, uid).await {
            self.delete_request(conversation_id, uid).await?;
            return Err(e);
        }

        let capacity = self.ctx.config().group_capacity;
        let updated = match store
            .update_conversation(conversation_id, admit(uid, capacity))
            .await
        {
            Ok(updated) => updated,
            Err(StorageError::PreconditionFailed(_)) => {
                let current = self.ctx.conversation(conversation_id).await?;
                if current.is_participant(uid) {
                    // Stale request for someone already in.
                    self.delete_request(conversation_id, uid).await?;
                    return Err(MessagingError::AlreadyMember);
                }
                return Err(MessagingError::GroupFull { capacity });
            }
            Err(e) => return Err(rejected("approve_request", conversation_id)(e)),
        };

        self.delete_request(conversation_id, uid).await?;
        info!(members = updated.member_count, "Approved join request");
        Ok(updated)
    }

    /// Reject a pending requester. Moderators only.
    pub async fn decline_request(&self, conversation_id: &ConversationId, uid: &UserId) -> Result<()> {
        self.moderated_group(conversation_id).await?;
        if self.delete_request(conversation_id, uid).await? {
            debug!(conversation = %conversation_id, user = %uid, "Declined join request");
            Ok(())
        } else {
            Err(MessagingError::NoPendingRequest)
        }
    }

    /// Remove a member. Moderators only; the owner cannot be removed.
    #[instrument(skip_all, fields(conversation = %conversation_id, user = %uid))]
    pub async fn remove_member(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
    ) -> Result<Conversation> {
        let (conv, _) = self.moderated_group(conversation_id).await?;
        if &conv.owner_id == uid {
            return Err(MessagingError::OwnerProtected);
        }
        let updated = self.evict(conversation_id, uid).await?;
        info!(members = updated.member_count, "Removed member");
        Ok(updated)
    }

    /// Ban a user, removing them if present and dropping any pending request.
    ///
    /// Bans are permanent. Works for non-members too, which blocks future joins.
    #[instrument(skip_all, fields(conversation = %conversation_id, user = %uid))]
    pub async fn ban_member(&self, conversation_id: &ConversationId, uid: &UserId) -> Result<()> {
        let (conv, me) = self.moderated_group(conversation_id).await?;
        if &conv.owner_id == uid || &me == uid {
            return Err(MessagingError::OwnerProtected);
        }

        let ban = Ban {
            uid: uid.clone(),
            created_at: self.ctx.clock().now(),
            created_by: me,
        };
        self.ctx
            .store()
            .put_ban(conversation_id, ban)
            .await
            .map_err(rejected("put_ban", conversation_id))?;

        match self.evict(conversation_id, uid).await {
            Ok(_) | Err(MessagingError::NotMember) => {}
            Err(e) => return Err(e),
        }
        self.delete_request(conversation_id, uid).await?;

        info!("Banned user");
        Ok(())
    }

    /// Leave a group.
    ///
    /// The owner may only leave once they are the last member.
    #[instrument(skip_all, fields(conversation = %conversation_id))]
    pub async fn leave_group(&self, conversation_id: &ConversationId) -> Result<Conversation> {
        let me = self.ctx.require_user()?;
        let conv = self.group(conversation_id).await?;
        if conv.owner_id == me.uid && conv.participants.iter().any(|p| p != &me.uid) {
            return Err(MessagingError::OwnerProtected);
        }
        let updated = self.evict(conversation_id, &me.uid).await?;
        info!(members = updated.member_count, "Left group");
        Ok(updated)
    }

    /// Grant or revoke admin rights. Owner only; the target must be a member.
    pub async fn set_admin(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
        admin: bool,
    ) -> Result<Conversation> {
        let me = self.ctx.require_user()?;
        let conv = self.group(conversation_id).await?;
        if !self.ctx.authz().can_manage_admins(&conv, &me.uid) {
            return Err(MessagingError::NotModerator);
        }
        if &conv.owner_id == uid {
            return Err(MessagingError::OwnerProtected);
        }

        let update = if admin {
            ConversationUpdate::new()
                .require(Precondition::IsParticipant(uid.clone()))
                .op(FieldOp::AddAdmin(uid.clone()))
        } else {
            ConversationUpdate::new().op(FieldOp::RemoveAdmin(uid.clone()))
        };
        match self.ctx.store().update_conversation(conversation_id, update).await {
            Ok(conv) => Ok(conv),
            Err(StorageError::PreconditionFailed(_)) => Err(MessagingError::NotMember),
            Err(e) => Err(rejected("set_admin", conversation_id)(e)),
        }
    }

    /// Change title, visibility or join mode. Moderators only.
    pub async fn update_settings(
        &self,
        conversation_id: &ConversationId,
        settings: GroupSettings,
    ) -> Result<Conversation> {
        self.moderated_group(conversation_id).await?;

        let mut update = ConversationUpdate::new();
        if let Some(title) = settings.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(MessagingError::InvalidInput("group title is blank".into()));
            }
            update = update.op(FieldOp::SetTitle(title.to_string()));
        }
        if let Some(public) = settings.public {
            update = update.op(FieldOp::SetPublic(public));
        }
        if let Some(mode) = settings.join_mode {
            update = update.op(FieldOp::SetJoinMode(mode));
        }
        if update.is_empty() {
            return self.ctx.conversation(conversation_id).await;
        }

        self.ctx
            .store()
            .update_conversation(conversation_id, update)
            .await
            .map_err(rejected("update_settings", conversation_id))
    }

    async fn group(&self, conversation_id: &ConversationId) -> Result<Conversation> {
        let conv = self.ctx.conversation(conversation_id).await?;
        if conv.is_group() {
            Ok(conv)
        } else {
            Err(MessagingError::NotAGroup)
        }
    }

    /// The group plus the current user, who must moderate it.
    async fn moderated_group(&self, conversation_id: &ConversationId) -> Result<(Conversation, UserId)> {
        let me = self.ctx.require_user()?;
        let conv = self.ctx.conversation(conversation_id).await?;
        self.ctx.authz().require_moderator(&conv, &me.uid)?;
        Ok((conv, me.uid))
    }

    async fn ensure_not_banned(&self, conv: &Conversation, uid: &UserId) -> Result<()> {
        let banned = self
            .ctx
            .store()
            .get_ban(&conv.id, uid)
            .await
            .map_err(rejected("get_ban", &conv.id))?;
        if banned.is_some() {
            Err(MessagingError::Banned)
        } else {
            Ok(())
        }
    }

    async fn delete_request(&self, conversation_id: &ConversationId, uid: &UserId) -> Result<bool> {
        self.ctx
            .store()
            .delete_request(conversation_id, uid)
            .await
            .map_err(rejected("delete_request", conversation_id))
    }

    /// Remove `uid` from participants and admins, decrementing the count.
    async fn evict(&self, conversation_id: &ConversationId, uid: &UserId) -> Result<Conversation> {
        let update = ConversationUpdate::new()
            .require(Precondition::IsParticipant(uid.clone()))
            .op(FieldOp::RemoveParticipant(uid.clone()))
            .op(FieldOp::RemoveAdmin(uid.clone()))
            .op(FieldOp::IncrementMemberCount(-1))
            .op(FieldOp::ClearTyping(uid.clone()));
        match self.ctx.store().update_conversation(conversation_id, update).await {
            Ok(conv) => Ok(conv),
            Err(StorageError::PreconditionFailed(_)) => Err(MessagingError::NotMember),
            Err(e) => Err(rejected("remove_participant", conversation_id)(e)),
        }
    }

    /// Work out why an open join's admit update was refused.
    async fn explain_failed_admit(
        &self,
        conversation_id: &ConversationId,
        uid: &UserId,
    ) -> Result<JoinOutcome> {
        let current = self.ctx.conversation(conversation_id).await?;
        if current.is_participant(uid) {
            Ok(JoinOutcome::AlreadyMember)
        } else {
            Err(MessagingError::GroupFull {
                capacity: self.ctx.config().group_capacity,
            })
        }
    }
}

/// Add `uid` and bump the count, only if absent and below capacity.
fn admit(uid: &UserId, capacity: u32) -> ConversationUpdate {
    ConversationUpdate::new()
        .require(Precondition::NotParticipant(uid.clone()))
        .require(Precondition::MemberCountBelow(capacity))
        .op(FieldOp::AddParticipant(uid.clone()))
        .op(FieldOp::IncrementMemberCount(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_guards_presence_and_capacity() {
        let uid = UserId::parse("u").unwrap();
        let update = admit(&uid, 200);
        assert_eq!(
            update.preconditions,
            vec![
                Precondition::NotParticipant(uid.clone()),
                Precondition::MemberCountBelow(200)
            ]
        );
        assert!(update.ops.contains(&FieldOp::IncrementMemberCount(1)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MembershipState::Pending.to_string(), "request pending");
        assert_eq!(MembershipState::Banned.to_string(), "banned");
    }
}
