//! Multi-client scenarios over one shared store.
//!
//! Tests cover:
//! - Find-or-create of DM and support threads under concurrent callers
//! - Open and approval join workflows, capacity, bans and moderation
//! - Sending with and without attachments, summaries and read markers
//! - Read marker monotonicity and the typing TTL boundary
//! - Store rejections surfacing as generic errors

mod common;

use std::sync::Arc;

use aula_core::{Clock, JoinMode};
use aula_messaging::{
    GroupSettings, JoinOutcome, MembershipState, MessagingConfig, MessagingError, NewGroup,
    OutgoingAttachment, is_typing, is_unread,
};
use aula_store::{BlobStore, DocumentStore, InMemoryBlobStore};
use bytes::Bytes;
use common::{World, uid};
use tokio_test::{assert_err, assert_ok};

// ============================================================
// Scenario 1: DM and support find-or-create
// ============================================================

#[tokio::test]
async fn test_concurrent_dm_open_yields_one_conversation() {
    let world = World::new();
    let a = world.client("A");
    let b = world.client("B");
    let (a_id, b_id) = (uid("A"), uid("B"));

    let (from_a, from_b) = tokio::join!(
        a.directory().open_or_create_dm(&b_id),
        b.directory().open_or_create_dm(&a_id),
    );
    let from_a = assert_ok!(from_a);
    let from_b = assert_ok!(from_b);

    assert_eq!(from_a.id, from_b.id);
    assert_eq!(from_a.dm_key.as_deref(), Some("A__B"));
    assert_eq!(world.store.conversation_count(), 1);
}

#[tokio::test]
async fn test_support_thread_is_per_user() {
    let world = World::new();
    let ana = world.client("ana");

    let first = ana.directory().open_or_create_support().await.unwrap();
    let again = ana.directory().open_or_create_support().await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(first.id.as_str(), "support__ana");
    assert_eq!(first.member_count, 1);
}

// ============================================================
// Scenario 2: Join workflows
// ============================================================

/// Group owned by `owner` with `members` already joined, then switched to `mode`.
async fn group_with_members(
    world: &World,
    owner: &str,
    members: &[&str],
    mode: JoinMode,
) -> aula_core::ConversationId {
    let owner_client = world.client(owner);
    let group = owner_client
        .directory()
        .create_group(NewGroup::new("Chemistry 101"))
        .await
        .unwrap();
    for member in members {
        let outcome = world.client(member).request_join(&group.id).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::Joined(_)));
    }
    if mode == JoinMode::Approval {
        owner_client
            .membership()
            .update_settings(
                &group.id,
                GroupSettings {
                    join_mode: Some(JoinMode::Approval),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    group.id
}

#[tokio::test]
async fn test_approval_join_then_approve() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &["m1", "m2", "m3", "m4"], JoinMode::Approval).await;
    assert_eq!(world.conversation(&group).await.member_count, 5);

    let user = world.client("u");
    assert_eq!(user.request_join(&group).await.unwrap(), JoinOutcome::Requested);
    assert_eq!(user.request_join(&group).await.unwrap(), JoinOutcome::AlreadyPending);

    let conv = world.conversation(&group).await;
    assert_eq!(conv.member_count, 5);
    assert!(!conv.is_participant(&uid("u")));
    assert_eq!(
        user.membership().membership_state(&conv, &uid("u")).await.unwrap(),
        MembershipState::Pending
    );

    let owner = world.client("owner");
    let pending = owner.membership().pending_requests(&group).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "U");

    let approved = owner.membership().approve_request(&group, &uid("u")).await.unwrap();
    assert!(approved.is_participant(&uid("u")));
    assert_eq!(approved.member_count, 6);
    assert_eq!(approved.participants.len(), 6);
    assert!(world.store.get_request(&group, &uid("u")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_only_moderators_handle_requests() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &["m1"], JoinMode::Approval).await;
    world.client("u").request_join(&group).await.unwrap();

    let member = world.client("m1");
    assert!(matches!(
        member.membership().approve_request(&group, &uid("u")).await,
        Err(MessagingError::NotModerator)
    ));
    assert!(matches!(
        member.membership().pending_requests(&group).await,
        Err(MessagingError::NotModerator)
    ));

    let owner = world.client("owner");
    owner.membership().decline_request(&group, &uid("u")).await.unwrap();
    let conv = world.conversation(&group).await;
    assert_eq!(conv.member_count, 2);
    assert!(matches!(
        owner.membership().decline_request(&group, &uid("u")).await,
        Err(MessagingError::NoPendingRequest)
    ));
}

#[tokio::test]
async fn test_open_join_twice_counts_once() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &[], JoinMode::Open).await;
    let user = world.client("u");

    assert!(matches!(user.request_join(&group).await.unwrap(), JoinOutcome::Joined(_)));
    assert_eq!(user.request_join(&group).await.unwrap(), JoinOutcome::AlreadyMember);

    let conv = world.conversation(&group).await;
    assert_eq!(conv.member_count, 2);
    assert_eq!(conv.participants.len(), 2);
    assert!(conv.read_marker(&uid("u")).is_some());
}

#[tokio::test]
async fn test_full_group_rejects_without_writes() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &[], JoinMode::Open).await;

    // Fill to capacity the way concurrent joins would leave it.
    let mut members = Vec::new();
    for n in 1..200 {
        members.push(format!("m{n}"));
    }
    for member in &members {
        world.client(member).request_join(&group).await.unwrap();
    }
    let before = world.conversation(&group).await;
    assert_eq!(before.member_count, 200);

    let late = world.client("late");
    let result = late.request_join(&group).await;
    assert!(matches!(result, Err(MessagingError::GroupFull { capacity: 200 })));

    let after = world.conversation(&group).await;
    assert_eq!(after, before);
    assert!(world.store.get_request(&group, &uid("late")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_full_approval_group_files_no_request() {
    let world = World::with_config(MessagingConfig::default().with_group_capacity(2));
    let group = group_with_members(&world, "owner", &["m1"], JoinMode::Approval).await;

    let result = world.client("u").request_join(&group).await;
    assert!(matches!(result, Err(MessagingError::GroupFull { capacity: 2 })));
    assert!(world.store.list_requests(&group).await.unwrap().is_empty());
}

// ============================================================
// Scenario 3: Moderation and bans
// ============================================================

#[tokio::test]
async fn test_ban_removes_and_blocks_rejoin() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &["m1", "m2"], JoinMode::Open).await;
    let owner = world.client("owner");

    owner.membership().ban_member(&group, &uid("m1")).await.unwrap();

    let conv = world.conversation(&group).await;
    assert!(!conv.is_participant(&uid("m1")));
    assert_eq!(conv.member_count, 2);
    assert_eq!(conv.participants.len(), 2);

    let banned = world.client("m1");
    assert!(matches!(banned.request_join(&group).await, Err(MessagingError::Banned)));
    assert_eq!(
        banned.membership().membership_state(&conv, &uid("m1")).await.unwrap(),
        MembershipState::Banned
    );
}

#[tokio::test]
async fn test_ban_drops_pending_request() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &[], JoinMode::Approval).await;
    world.client("u").request_join(&group).await.unwrap();

    world.client("owner").membership().ban_member(&group, &uid("u")).await.unwrap();

    assert!(world.store.get_request(&group, &uid("u")).await.unwrap().is_none());
    assert!(world.store.get_ban(&group, &uid("u")).await.unwrap().is_some());
    assert_eq!(world.conversation(&group).await.member_count, 1);
}

#[tokio::test]
async fn test_owner_is_protected() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &["admin", "m1"], JoinMode::Open).await;
    let owner = world.client("owner");
    owner.membership().set_admin(&group, &uid("admin"), true).await.unwrap();

    let admin = world.client("admin");
    assert!(matches!(
        admin.membership().remove_member(&group, &uid("owner")).await,
        Err(MessagingError::OwnerProtected)
    ));
    assert!(matches!(
        admin.membership().ban_member(&group, &uid("owner")).await,
        Err(MessagingError::OwnerProtected)
    ));
    assert!(matches!(
        owner.membership().leave_group(&group).await,
        Err(MessagingError::OwnerProtected)
    ));

    // Admins moderate ordinary members.
    let conv = admin.membership().remove_member(&group, &uid("m1")).await.unwrap();
    assert_eq!(conv.member_count, 2);
}

#[tokio::test]
async fn test_leave_and_remove_keep_count_in_step() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &["m1", "m2"], JoinMode::Open).await;

    let conv = world.client("m1").membership().leave_group(&group).await.unwrap();
    assert_eq!(conv.member_count as usize, conv.participants.len());

    let conv = world
        .client("owner")
        .membership()
        .remove_member(&group, &uid("m2"))
        .await
        .unwrap();
    assert_eq!(conv.member_count, 1);
    assert_eq!(conv.participants.len(), 1);

    assert!(matches!(
        world.client("m2").membership().leave_group(&group).await,
        Err(MessagingError::NotMember)
    ));
}

#[tokio::test]
async fn test_join_on_dm_is_rejected() {
    let world = World::new();
    let a = world.client("ana");
    let dm = a.directory().open_or_create_dm(&uid("ben")).await.unwrap();
    assert!(matches!(
        world.client("eve").request_join(&dm.id).await,
        Err(MessagingError::NotAGroup)
    ));
}

// ============================================================
// Scenario 4: Sending
// ============================================================

#[tokio::test]
async fn test_send_hola_updates_summary_and_read_marker() {
    let world = World::new();
    let ana = world.client("ana");
    let dm = ana.directory().open_or_create_dm(&uid("ben")).await.unwrap();
    world.clock.advance_millis(1_000);

    let message = ana.channel().send(&dm.id, "Hola", Vec::new()).await.unwrap();
    assert_eq!(message.text, "Hola");
    assert!(message.attachments.is_empty());

    let conv = world.conversation(&dm.id).await;
    let last = conv.last_message.as_ref().unwrap();
    assert_eq!(last.text, "Hola");
    assert_eq!(last.sender_id, uid("ana"));
    assert!(conv.last_at.unwrap() >= message.created_at);
    assert!(conv.read_marker(&uid("ana")).unwrap() >= message.created_at);

    let recent = ana.channel().recent(&dm.id).await.unwrap();
    assert_eq!(recent.last(), Some(&message));

    assert!(!is_unread(&conv, &uid("ana")));
    assert!(is_unread(&conv, &uid("ben")));
}

#[tokio::test]
async fn test_messages_keep_receipt_order() {
    let world = World::new();
    let ana = world.client("ana");
    let ben = world.client("ben");
    let dm = ana.directory().open_or_create_dm(&uid("ben")).await.unwrap();

    for n in 0..5 {
        ana.channel().send(&dm.id, &format!("a{n}"), Vec::new()).await.unwrap();
        world.clock.advance_millis(3);
        ben.channel().send(&dm.id, &format!("b{n}"), Vec::new()).await.unwrap();
    }

    let recent = ben.channel().recent(&dm.id).await.unwrap();
    assert_eq!(recent.len(), 10);
    assert!(recent.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert_eq!(recent.last().unwrap().text, "b4");
}

#[tokio::test]
async fn test_message_window_keeps_newest() {
    let world = World::with_config(MessagingConfig::default().with_message_window(3));
    let ana = world.client("ana");
    let ben = world.client("ben");
    let dm = ana.directory().open_or_create_dm(&uid("ben")).await.unwrap();

    for n in 0..5 {
        ana.channel().send(&dm.id, &format!("m{n}"), Vec::new()).await.unwrap();
        world.clock.advance_millis(10);
    }
    let texts = |messages: &[aula_core::Message]| -> Vec<String> {
        messages.iter().map(|m| m.text.clone()).collect()
    };

    let recent = ben.channel().recent(&dm.id).await.unwrap();
    assert_eq!(texts(&recent), vec!["m2", "m3", "m4"]);

    let mut feed = ben.channel().subscribe(&dm.id).await.unwrap();
    assert_eq!(texts(feed.messages()), vec!["m2", "m3", "m4"]);

    ana.channel().send(&dm.id, "m5", Vec::new()).await.unwrap();
    let next = tokio::time::timeout(std::time::Duration::from_secs(1), feed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.text, "m5");
    assert_eq!(texts(feed.messages()), vec!["m3", "m4", "m5"]);
}

#[tokio::test]
async fn test_event_channel_capacity_bounds_store_broadcast() {
    let small = World::with_config(MessagingConfig::default().with_event_channel_capacity(2));
    let roomy = World::new();

    let mut outcomes = Vec::new();
    for world in [&small, &roomy] {
        let mut events = world.store.events();
        let ana = world.client("ana");
        let dm = ana.directory().open_or_create_dm(&uid("ben")).await.unwrap();
        for n in 0..3 {
            ana.channel().send(&dm.id, &format!("m{n}"), Vec::new()).await.unwrap();
        }
        outcomes.push(events.try_recv());
    }

    assert!(matches!(
        outcomes[0],
        Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_))
    ));
    assert!(outcomes[1].is_ok());
}

#[tokio::test]
async fn test_empty_send_and_non_member_send_rejected() {
    let world = World::new();
    let group = group_with_members(&world, "owner", &[], JoinMode::Open).await;
    let owner = world.client("owner");

    assert!(matches!(
        owner.channel().send(&group, "   ", Vec::new()).await,
        Err(MessagingError::EmptyMessage)
    ));
    assert!(matches!(
        world.client("outsider").channel().send(&group, "hi", Vec::new()).await,
        Err(MessagingError::NotMember)
    ));
    assert_eq!(world.store.message_count(&group), 0);
}

#[tokio::test]
async fn test_attachment_only_message_uses_placeholder() {
    let world = World::new();
    let ana = world.client("ana");
    let dm = ana.directory().open_or_create_dm(&uid("ben")).await.unwrap();

    let clip = OutgoingAttachment::new("clip.webm", "video/webm", Bytes::from_static(b"webm"));
    let message = ana.channel().send(&dm.id, "", vec![clip]).await.unwrap();

    assert_eq!(message.attachments.len(), 1);
    let attachment = &message.attachments[0];
    assert_eq!(attachment.name, "clip.webm");
    assert_eq!(attachment.size, 4);
    assert!(world.blobs.contains(&attachment.path));

    let conv = world.conversation(&dm.id).await;
    assert_eq!(conv.last_message.unwrap().text, "📎 clip.webm");
}

#[tokio::test]
async fn test_same_named_attachments_do_not_collide() {
    let world = World::new();
    let ana = world.client("ana");
    let ben = world.client("ben");
    let dm = ana.directory().open_or_create_dm(&uid("ben")).await.unwrap();

    // Same file name, same clock millisecond.
    let from_ana = OutgoingAttachment::new("worksheet.pdf", "application/pdf", Bytes::from_static(b"ANA"));
    let from_ben = OutgoingAttachment::new("worksheet.pdf", "application/pdf", Bytes::from_static(b"BEN"));
    let first = ana.channel().send(&dm.id, "", vec![from_ana]).await.unwrap();
    let second = ben.channel().send(&dm.id, "", vec![from_ben]).await.unwrap();

    let (a, b) = (&first.attachments[0], &second.attachments[0]);
    assert_ne!(a.path, b.path);
    assert_eq!(world.blobs.fetch(&a.path).await.unwrap(), Bytes::from_static(b"ANA"));
    assert_eq!(world.blobs.fetch(&b.path).await.unwrap(), Bytes::from_static(b"BEN"));

    // The same sender repeating the upload gets a fresh path too.
    let again = OutgoingAttachment::new("worksheet.pdf", "application/pdf", Bytes::from_static(b"V2"));
    let third = ana.channel().send(&dm.id, "", vec![again]).await.unwrap();
    assert_ne!(third.attachments[0].path, a.path);
    assert_eq!(world.blobs.fetch(&a.path).await.unwrap(), Bytes::from_static(b"ANA"));
}

#[tokio::test]
async fn test_failed_upload_cleans_up_earlier_blobs() {
    let world = World::new();
    let blobs = Arc::new(InMemoryBlobStore::new().fail_after(1));
    let ana = aula_messaging::MessageChannel::new(world.context_with_blobs("ana", blobs.clone()));
    let dm = world
        .client("ana")
        .directory()
        .open_or_create_dm(&uid("ben"))
        .await
        .unwrap();

    let files = vec![
        OutgoingAttachment::new("a.pdf", "application/pdf", Bytes::from_static(b"a")),
        OutgoingAttachment::new("b.pdf", "application/pdf", Bytes::from_static(b"b")),
    ];
    let err = assert_err!(ana.send(&dm.id, "homework", files).await);

    match &err {
        MessagingError::Upload { name, .. } => assert_eq!(name, "b.pdf"),
        other => panic!("expected upload error, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(err.status_text(), "Couldn't upload b.pdf, try again");
    assert!(blobs.is_empty());
    assert_eq!(world.store.message_count(&dm.id), 0);
}

#[tokio::test]
async fn test_orphans_kept_when_cleanup_disabled() {
    let world = World::with_config(MessagingConfig::default().with_upload_cleanup(false));
    let blobs = Arc::new(InMemoryBlobStore::new().fail_after(1));
    let ctx = world.context_with_blobs("ana", blobs.clone() as Arc<dyn BlobStore>);
    let dm = world
        .client("ana")
        .directory()
        .open_or_create_dm(&uid("ben"))
        .await
        .unwrap();

    let files = vec![
        OutgoingAttachment::new("a.pdf", "application/pdf", Bytes::from_static(b"a")),
        OutgoingAttachment::new("b.pdf", "application/pdf", Bytes::from_static(b"b")),
    ];
    let result = aula_messaging::MessageChannel::new(ctx).send(&dm.id, "", files).await;
    assert!(result.is_err());
    assert_eq!(blobs.len(), 1);
}

#[tokio::test]
async fn test_store_rejection_is_generic_permission_error() {
    let world = World::new();
    let ana = world.client("ana");
    let dm = ana.directory().open_or_create_dm(&uid("ben")).await.unwrap();

    world.store.set_read_only(true);
    let err = assert_err!(ana.channel().send(&dm.id, "Hola", Vec::new()).await);

    assert!(matches!(err, MessagingError::PermissionDenied));
    assert_eq!(err.status_text(), "Something went wrong, try again");
    assert!(!err.is_retryable());
}

// ============================================================
// Scenario 5: Read markers and typing
// ============================================================

#[tokio::test]
async fn test_mark_read_never_moves_backwards() {
    let world = World::new();
    let ana = world.client("ana");
    let ben = world.client("ben");
    let dm = ana.directory().open_or_create_dm(&uid("ben")).await.unwrap();

    let mut markers = Vec::new();
    for step in [500, 500, -2_000, 10] {
        world.clock.advance_millis(step);
        ben.presence().mark_read(&dm.id).await.unwrap();
        markers.push(world.conversation(&dm.id).await.read_marker(&uid("ben")).unwrap());
    }

    assert!(markers.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_non_participant_cannot_mark_read() {
    let world = World::new();
    let dm = world
        .client("ana")
        .directory()
        .open_or_create_dm(&uid("ben"))
        .await
        .unwrap();
    assert!(matches!(
        world.client("eve").presence().mark_read(&dm.id).await,
        Err(MessagingError::NotMember)
    ));
}

#[tokio::test]
async fn test_typing_ttl_boundary() {
    let world = World::new();
    let ctx = world.context("ana");
    let dm = world
        .client("ana")
        .directory()
        .open_or_create_dm(&uid("ben"))
        .await
        .unwrap();

    let signal = aula_messaging::TypingSignal::new(ctx.clone(), dm.id.clone(), uid("ana"));
    assert!(signal.bump().await.unwrap());
    // Throttled: a second keystroke right away writes nothing.
    assert!(!signal.bump().await.unwrap());

    let ttl = ctx.config().typing_ttl;
    let bumped = world.conversation(&dm.id).await;
    let at = bumped.typing_at(&uid("ana")).unwrap();

    world.clock.advance_millis(5_999);
    assert!(is_typing(&bumped, &uid("ana"), world.clock.now(), ttl));
    world.clock.advance_millis(2);
    assert!(!is_typing(&bumped, &uid("ana"), world.clock.now(), ttl));
    assert_eq!(world.clock.now() - at, chrono::Duration::milliseconds(6_001));
}

#[tokio::test(start_paused = true)]
async fn test_typing_clears_after_idle() {
    let world = World::new();
    let ctx = world.context("ana");
    let dm = world
        .client("ana")
        .directory()
        .open_or_create_dm(&uid("ben"))
        .await
        .unwrap();

    let signal = aula_messaging::TypingSignal::new(ctx, dm.id.clone(), uid("ana"));
    signal.bump().await.unwrap();
    assert!(world.conversation(&dm.id).await.typing_at(&uid("ana")).is_some());

    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    assert!(world.conversation(&dm.id).await.typing_at(&uid("ana")).is_none());
    assert!(!signal.is_active());
}
