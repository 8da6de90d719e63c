//! Scripted multi-client scenarios
//!
//! Each scenario drives several clients concurrently against one
//! [`SimWorld`] and records what it observed in a [`ScenarioReport`].
//! Errors are reserved for setup failures; broken invariants show up as
//! failed checks.

use aula_core::{Clock, JoinMode, UserId};
use aula_messaging::{
    JoinOutcome, MessagingError, NewGroup, OutgoingAttachment, TypingSignal, is_typing,
    is_unread,
};
use bytes::Bytes;
use futures::future::join_all;
use aula_logging::client_span;
use tracing::{Instrument, info};

use crate::{ScenarioReport, SimWorld};

fn student(i: usize) -> String {
    format!("student{i}")
}

/// Both sides of a DM open it at the same moment, `rounds` times over.
///
/// ```text
/// ana and ben race open_or_create_dm against each other
/// every call must resolve to the same "ana__ben" document
/// ```
pub async fn run_dm_race(world: &SimWorld, rounds: usize) -> anyhow::Result<ScenarioReport> {
    info!(rounds, "Running DM race");
    let mut report = ScenarioReport::new("dm-race");
    let (ana, ana_span) = world.actor("ana")?;
    let (ben, ben_span) = world.actor("ben")?;
    let ana_id = UserId::parse("ana")?;
    let ben_id = UserId::parse("ben")?;
    let before = world.store.conversation_count();

    let attempts = (0..rounds).flat_map(|_| {
        [
            ana.directory()
                .open_or_create_dm(&ben_id)
                .instrument(ana_span.clone()),
            ben.directory()
                .open_or_create_dm(&ana_id)
                .instrument(ben_span.clone()),
        ]
    });
    let results = join_all(attempts).await;

    let mut ids = Vec::with_capacity(results.len());
    for result in results {
        ids.push(result?.id);
    }
    ids.sort();
    ids.dedup();
    report.check(
        "single conversation id",
        ids.len() == 1,
        format!("{} distinct id(s) from {} calls", ids.len(), rounds * 2),
    );
    if let Some(id) = ids.first() {
        report.check("deterministic key", id.as_str() == "ana__ben", id.to_string());
        let conv = world.conversation(id).await?;
        report.check(
            "two participants",
            conv.participants.len() == 2 && conv.member_count == 2,
            format!("{} participants, count {}", conv.participants.len(), conv.member_count),
        );
    }
    let created = world.store.conversation_count() - before;
    report.check("one document created", created == 1, format!("{created} created"));
    Ok(report)
}

/// `applicants` students request to join an approval group; the owner
/// approves every request.
pub async fn run_approval_join(
    world: &SimWorld,
    applicants: usize,
) -> anyhow::Result<ScenarioReport> {
    info!(applicants, "Running approval join");
    let mut report = ScenarioReport::new("approval-join");
    let (owner, owner_span) = world.actor("teacher")?;
    let group = owner
        .directory()
        .create_group(NewGroup::new("Chemistry 101").with_join_mode(JoinMode::Approval))
        .instrument(owner_span.clone())
        .await?;

    let clients = (0..applicants)
        .map(|i| world.actor(&student(i)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let requests = clients
        .iter()
        .map(|(client, span)| client.request_join(&group.id).instrument(span.clone()));
    let outcomes = join_all(requests).await;
    let filed = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(JoinOutcome::Requested)))
        .count();
    report.check(
        "every request filed",
        filed == applicants,
        format!("{filed}/{applicants} requested"),
    );

    let pending = owner
        .membership()
        .pending_requests(&group.id)
        .instrument(owner_span.clone())
        .await?;
    report.check(
        "requests visible to owner",
        pending.len() == applicants,
        format!("{} pending", pending.len()),
    );

    let approvals = pending.iter().map(|request| {
        owner
            .membership()
            .approve_request(&group.id, &request.uid)
            .instrument(owner_span.clone())
    });
    let approved = join_all(approvals)
        .await
        .into_iter()
        .filter(Result::is_ok)
        .count();
    report.check(
        "every request approved",
        approved == applicants,
        format!("{approved}/{applicants} approved"),
    );

    let conv = world.conversation(&group.id).await?;
    report.check(
        "member count matches participants",
        conv.member_count as usize == conv.participants.len(),
        format!("count {}, participants {}", conv.member_count, conv.participants.len()),
    );
    report.check(
        "everyone admitted",
        conv.participants.len() == applicants + 1,
        format!("{} participants", conv.participants.len()),
    );
    let left = owner.membership().pending_requests(&group.id).await?.len();
    report.check("no requests left", left == 0, format!("{left} pending"));
    Ok(report)
}

/// `joiners` students race to join an open group limited to `capacity`.
pub async fn run_capacity(
    world: &SimWorld,
    joiners: usize,
) -> anyhow::Result<ScenarioReport> {
    let capacity = world.config.group_capacity;
    info!(joiners, capacity, "Running capacity race");
    let mut report = ScenarioReport::new("capacity");
    let (owner, owner_span) = world.actor("teacher")?;
    let group = owner
        .directory()
        .create_group(NewGroup::new("Debate"))
        .instrument(owner_span)
        .await?;

    let clients = (0..joiners)
        .map(|i| world.actor(&student(i)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let joins = clients
        .iter()
        .map(|(client, span)| client.request_join(&group.id).instrument(span.clone()));
    let outcomes = join_all(joins).await;

    let joined = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(JoinOutcome::Joined(_))))
        .count();
    let full = outcomes
        .iter()
        .filter(|o| matches!(o, Err(MessagingError::GroupFull { .. })))
        .count();
    let seats = (capacity as usize).saturating_sub(1).min(joiners);
    report.check(
        "seats filled exactly",
        joined == seats,
        format!("{joined} joined, {seats} seats"),
    );
    report.check(
        "overflow rejected",
        joined + full == joiners,
        format!("{full} rejected as full"),
    );

    let conv = world.conversation(&group.id).await?;
    report.check(
        "count within capacity",
        conv.member_count <= capacity,
        format!("count {}, capacity {capacity}", conv.member_count),
    );
    report.check(
        "member count matches participants",
        conv.member_count as usize == conv.participants.len(),
        format!("count {}, participants {}", conv.member_count, conv.participants.len()),
    );
    Ok(report)
}

/// `senders` members post `per_sender` messages each, concurrently.
pub async fn run_send(
    world: &SimWorld,
    senders: usize,
    per_sender: usize,
) -> anyhow::Result<ScenarioReport> {
    info!(senders, per_sender, "Running concurrent send");
    let mut report = ScenarioReport::new("send");
    let (owner, owner_span) = world.actor("teacher")?;
    let group = owner
        .directory()
        .create_group(NewGroup::new("Study hall"))
        .instrument(owner_span.clone())
        .await?;

    let clients = (0..senders)
        .map(|i| world.actor(&student(i)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    for (client, span) in &clients {
        client.request_join(&group.id).instrument(span.clone()).await?;
    }

    let sends = clients.iter().enumerate().flat_map(|(i, (client, span))| {
        let group_id = group.id.clone();
        (0..per_sender).map(move |n| {
            let group_id = group_id.clone();
            let span = span.clone();
            async move {
                let attachments = if n == 0 {
                    vec![OutgoingAttachment::new(
                        format!("notes{i}.pdf"),
                        "application/pdf",
                        Bytes::from_static(b"%PDF-1.7"),
                    )]
                } else {
                    Vec::new()
                };
                client
                    .channel()
                    .send(&group_id, &format!("message {n} from {}", student(i)), attachments)
                    .await
            }
            .instrument(span)
        })
    });
    let sent = join_all(sends).await;
    let delivered = sent.iter().filter(|r| r.is_ok()).count();
    let expected = senders * per_sender;
    report.check(
        "all sends accepted",
        delivered == expected,
        format!("{delivered}/{expected}"),
    );

    let stored = world.store.message_count(&group.id);
    report.check("all messages stored", stored == expected, format!("{stored} stored"));

    let window = owner
        .channel()
        .recent(&group.id)
        .instrument(owner_span)
        .await?;
    let ordered = window.windows(2).all(|w| w[0].created_at <= w[1].created_at);
    report.check("window ascending", ordered, format!("{} in window", window.len()));

    let conv = world.conversation(&group.id).await?;
    // Concurrent senders race on the summary write, so it names some stored
    // message but not necessarily the newest one.
    let summary_matches = match conv.last_message.as_ref() {
        Some(summary) => window.iter().any(|m| m.sender_id == summary.sender_id),
        None => window.is_empty(),
    };
    report.check(
        "summary names a stored message",
        summary_matches,
        conv.last_message
            .as_ref()
            .map(|m| m.text.clone())
            .unwrap_or_default(),
    );

    let owner_id = UserId::parse("teacher")?;
    report.check(
        "unread for owner",
        expected == 0 || is_unread(&conv, &owner_id),
        "owner has not opened the group",
    );
    Ok(report)
}

/// Typing signals appear for the other side and expire after the TTL.
pub async fn run_typing(world: &SimWorld) -> anyhow::Result<ScenarioReport> {
    info!("Running typing");
    let mut report = ScenarioReport::new("typing");
    let ana_ctx = world.context("ana")?;
    let (ben, ben_span) = world.actor("ben")?;
    let ana_id = UserId::parse("ana")?;
    let ana_span = client_span(&ana_id);
    let conv = ben
        .directory()
        .open_or_create_dm(&ana_id)
        .instrument(ben_span)
        .await?;

    let signal = TypingSignal::new(ana_ctx, conv.id.clone(), ana_id.clone());
    let first = signal.bump().instrument(ana_span.clone()).await?;
    let second = signal.bump().instrument(ana_span.clone()).await?;
    report.check("first keystroke writes", first, format!("wrote: {first}"));
    report.check("burst throttled", !second, format!("wrote: {second}"));

    let ttl = world.config.typing_ttl;
    let ttl_millis = i64::try_from(ttl.as_millis())?;
    let snapshot = world.conversation(&conv.id).await?;
    let now = world.clock.now();
    report.check(
        "visible to the other side",
        is_typing(&snapshot, &ana_id, now, ttl),
        "fresh entry",
    );

    world.clock.advance_millis(ttl_millis + 1);
    let later = world.clock.now();
    report.check(
        "expires after ttl",
        !is_typing(&snapshot, &ana_id, later, ttl),
        format!("ttl {}ms", ttl_millis),
    );

    signal.clear().instrument(ana_span).await?;
    let cleared = world.conversation(&conv.id).await?;
    report.check(
        "cleared entry removed",
        cleared.typing_at(&ana_id).is_none(),
        "after clear",
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aula_logging::{EventFields, UserContextLayer, jsonl_layer};
    use aula_messaging::MessagingConfig;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_log_lines_name_the_acting_client() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let subscriber = tracing_subscriber::registry()
            .with(UserContextLayer::new())
            .with(jsonl_layer(
                move || SharedBuf(sink.clone()),
                EventFields::default(),
            ));
        let _default = tracing::subscriber::set_default(subscriber);

        let report = run_approval_join(&SimWorld::new(), 3).await.unwrap();
        assert!(report.passed(), "{report}");

        let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let with_message = |message: &str| -> Vec<&serde_json::Value> {
            lines
                .iter()
                .filter(|line| line["fields"]["message"] == message)
                .collect()
        };

        let filed = with_message("Filed join request");
        assert_eq!(filed.len(), 3);
        for line in filed {
            assert_eq!(line["user_id"], line["fields"]["user"]);
        }
        let approved = with_message("Approved join request");
        assert_eq!(approved.len(), 3);
        assert!(approved.iter().all(|line| line["user_id"] == "teacher"));
    }

    #[tokio::test]
    async fn test_dm_race_passes() {
        let report = run_dm_race(&SimWorld::new(), 4).await.unwrap();
        assert!(report.passed(), "{report}");
    }

    #[tokio::test]
    async fn test_approval_join_passes() {
        let report = run_approval_join(&SimWorld::new(), 5).await.unwrap();
        assert!(report.passed(), "{report}");
    }

    #[tokio::test]
    async fn test_capacity_passes() {
        let world = SimWorld::with_config(MessagingConfig::default().with_group_capacity(4));
        let report = run_capacity(&world, 10).await.unwrap();
        assert!(report.passed(), "{report}");
    }

    #[tokio::test]
    async fn test_send_passes() {
        let report = run_send(&SimWorld::new(), 3, 4).await.unwrap();
        assert!(report.passed(), "{report}");
    }

    #[tokio::test]
    async fn test_typing_passes() {
        let report = run_typing(&SimWorld::new()).await.unwrap();
        assert!(report.passed(), "{report}");
    }
}
