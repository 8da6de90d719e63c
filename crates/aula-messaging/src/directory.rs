//! Conversation directory: lists, search and find-or-create.
//!
//! DM and support threads use their deterministic key as document id and are
//! created with a conditional create, so two clients racing to open the same
//! thread share one document.

use aula_core::{Conversation, ConversationKind, JoinMode, UserId};
use aula_store::{ConversationQuery, StoreEvent};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::context::{MessagingContext, rejected};
use crate::error::{MessagingError, Result};
use crate::presence::is_unread;
use crate::profile::Profile;

/// Title used for support threads.
pub const SUPPORT_TITLE: &str = "Support";

/// Parameters for a new group.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub title: String,
    pub public: bool,
    pub join_mode: JoinMode,
}

impl NewGroup {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            public: true,
            join_mode: JoinMode::Open,
        }
    }

    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    pub fn with_join_mode(mut self, mode: JoinMode) -> Self {
        self.join_mode = mode;
        self
    }
}

/// Image shown next to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Avatar {
    Photo(String),
    Initials(String),
}

impl Avatar {
    /// Up to two uppercase initials of `name`.
    pub fn initials(name: &str) -> Self {
        let initials: String = name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect();
        Self::Initials(if initials.is_empty() {
            "?".to_string()
        } else {
            initials
        })
    }
}

/// One row of a conversation list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub title: String,
    pub unread: bool,
}

/// Lists and opens conversations for the current user.
#[derive(Clone)]
pub struct ConversationDirectory {
    ctx: MessagingContext,
}

impl ConversationDirectory {
    pub fn new(ctx: MessagingContext) -> Self {
        Self { ctx }
    }

    /// Conversations the current user participates in, most recent first.
    pub async fn list_mine(&self) -> Result<Vec<Conversation>> {
        let me = self.ctx.require_user()?;
        query(&self.ctx, &ListKind::Mine(me.uid)).await
    }

    /// Public groups, most recent first.
    pub async fn list_public_groups(&self) -> Result<Vec<Conversation>> {
        self.ctx.require_user()?;
        query(&self.ctx, &ListKind::PublicGroups).await
    }

    /// Prefix search for people by display name or handle.
    pub async fn search(&self, term: &str) -> Result<Vec<Profile>> {
        self.ctx.require_user()?;
        let limit = self.ctx.config().list_window;
        self.ctx.profiles().search(term, limit).await.map_err(|e| {
            warn!(error = %e, "Profile search failed");
            MessagingError::from(e)
        })
    }

    /// Open the one-to-one conversation with `other`, creating it if needed.
    #[instrument(skip_all, fields(other = %other))]
    pub async fn open_or_create_dm(&self, other: &UserId) -> Result<Conversation> {
        let me = self.ctx.require_user()?;
        if &me.uid == other {
            return Err(MessagingError::InvalidInput(
                "cannot start a conversation with yourself".into(),
            ));
        }
        let draft = Conversation::direct(&me.uid, other, self.ctx.clock().now());
        let id = draft.id.clone();
        let outcome = self
            .ctx
            .store()
            .create_conversation(draft)
            .await
            .map_err(rejected("create_dm", &id))?;
        if outcome.was_created() {
            info!(conversation = %id, "Created direct conversation");
        }
        Ok(outcome.into_conversation())
    }

    /// Open the current user's support thread, creating it if needed.
    #[instrument(skip_all)]
    pub async fn open_or_create_support(&self) -> Result<Conversation> {
        let me = self.ctx.require_user()?;
        let draft = Conversation::support(&me.uid, self.ctx.clock().now());
        let id = draft.id.clone();
        let outcome = self
            .ctx
            .store()
            .create_conversation(draft)
            .await
            .map_err(rejected("create_support", &id))?;
        if outcome.was_created() {
            info!(conversation = %id, "Created support thread");
        }
        Ok(outcome.into_conversation())
    }

    /// Create a group owned and moderated by the current user.
    #[instrument(skip_all, fields(public = group.public, join_mode = ?group.join_mode))]
    pub async fn create_group(&self, group: NewGroup) -> Result<Conversation> {
        let me = self.ctx.require_user()?;
        let title = group.title.trim();
        if title.is_empty() {
            return Err(MessagingError::InvalidInput("group title is blank".into()));
        }
        let draft = Conversation::group(
            &me.uid,
            title,
            group.public,
            group.join_mode,
            self.ctx.clock().now(),
        );
        let id = draft.id.clone();
        let conv = self
            .ctx
            .store()
            .create_conversation(draft)
            .await
            .map_err(rejected("create_group", &id))?
            .into_conversation();
        info!(conversation = %id, "Created group");
        Ok(conv)
    }

    /// Name of `conv` as seen by `viewer`.
    pub async fn display_title(&self, conv: &Conversation, viewer: &UserId) -> String {
        match conv.kind {
            ConversationKind::Group => conv.title.clone().unwrap_or_else(|| "Group".into()),
            ConversationKind::Dm => match conv.other_participants(viewer).next() {
                Some(other) => self.ctx.profiles().display_name(other).await,
                None => self.ctx.profiles().display_name(viewer).await,
            },
            ConversationKind::Support => {
                if &conv.owner_id == viewer {
                    SUPPORT_TITLE.to_string()
                } else {
                    let name = self.ctx.profiles().display_name(&conv.owner_id).await;
                    format!("{SUPPORT_TITLE}: {name}")
                }
            }
        }
    }

    /// Avatar of `conv` as seen by `viewer`.
    pub async fn avatar(&self, conv: &Conversation, viewer: &UserId) -> Avatar {
        let person = match conv.kind {
            ConversationKind::Dm => conv.other_participants(viewer).next(),
            ConversationKind::Support if &conv.owner_id != viewer => Some(&conv.owner_id),
            _ => None,
        };
        if let Some(uid) = person
            && let Some(url) = self
                .ctx
                .profiles()
                .profile(uid)
                .await
                .and_then(|p| p.photo_url)
        {
            return Avatar::Photo(url);
        }
        Avatar::initials(&self.display_title(conv, viewer).await)
    }

    /// List rows with titles and unread flags for `viewer`.
    pub async fn summaries_for(
        &self,
        convs: &[Conversation],
        viewer: &UserId,
    ) -> Vec<ConversationSummary> {
        let mut rows = Vec::with_capacity(convs.len());
        for conv in convs {
            rows.push(ConversationSummary {
                title: self.display_title(conv, viewer).await,
                unread: is_unread(conv, viewer),
                conversation: conv.clone(),
            });
        }
        rows
    }

    /// Live version of [`list_mine`](Self::list_mine).
    pub async fn watch_mine(&self) -> Result<ConversationListWatch> {
        let me = self.ctx.require_user()?;
        ConversationListWatch::spawn(self.ctx.clone(), ListKind::Mine(me.uid)).await
    }

    /// Live version of [`list_public_groups`](Self::list_public_groups).
    pub async fn watch_public_groups(&self) -> Result<ConversationListWatch> {
        self.ctx.require_user()?;
        ConversationListWatch::spawn(self.ctx.clone(), ListKind::PublicGroups).await
    }
}

#[derive(Debug, Clone)]
enum ListKind {
    Mine(UserId),
    PublicGroups,
}

impl ListKind {
    fn query(&self, limit: usize) -> ConversationQuery {
        let query = match self {
            Self::Mine(uid) => ConversationQuery::new().participant(uid.clone()),
            Self::PublicGroups => ConversationQuery::new()
                .kind(ConversationKind::Group)
                .public(true),
        };
        query.limit(limit)
    }

    /// Whether a change to `conv` can alter a list that currently holds `shown`.
    fn affected_by(&self, conv: &Conversation, shown: &[Conversation]) -> bool {
        if shown.iter().any(|c| c.id == conv.id) {
            return true;
        }
        match self {
            Self::Mine(uid) => conv.is_participant(uid),
            Self::PublicGroups => conv.is_group() && conv.public,
        }
    }
}

async fn query(ctx: &MessagingContext, kind: &ListKind) -> Result<Vec<Conversation>> {
    let query = kind.query(ctx.config().list_window);
    ctx.store().query_conversations(&query).await.map_err(|e| {
        warn!(list = ?kind, error = %e, "Conversation list query failed");
        MessagingError::from(e)
    })
}

/// A conversation list kept current by a background task.
///
/// On a failed re-query the last good list stays published.
pub struct ConversationListWatch {
    rx: watch::Receiver<Vec<Conversation>>,
    task: JoinHandle<()>,
}

impl ConversationListWatch {
    async fn spawn(ctx: MessagingContext, kind: ListKind) -> Result<Self> {
        let events = ctx.store().events();
        let initial = query(&ctx, &kind).await?;
        let (tx, rx) = watch::channel(initial);

        let watcher = ListWatcher {
            ctx,
            kind,
            tx,
            events,
        };
        let task = tokio::spawn(watcher.run());
        Ok(Self { rx, task })
    }

    /// The current list.
    pub fn current(&self) -> Vec<Conversation> {
        self.rx.borrow().clone()
    }

    /// A receiver that sees every republished list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Conversation>> {
        self.rx.clone()
    }

    /// Wait for the next republished list.
    pub async fn changed(&mut self) -> Option<Vec<Conversation>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl Drop for ConversationListWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ListWatcher {
    ctx: MessagingContext,
    kind: ListKind,
    tx: watch::Sender<Vec<Conversation>>,
    events: broadcast::Receiver<StoreEvent>,
}

impl ListWatcher {
    fn affects(&self, conv: &Conversation) -> bool {
        self.kind.affected_by(conv, &self.tx.borrow())
    }

    async fn run(mut self) {
        loop {
            let refresh = match self.events.recv().await {
                Ok(StoreEvent::ConversationChanged(conv)) => self.affects(&conv),
                Ok(_) => false,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(list = ?self.kind, skipped, "List watch lagged");
                    true
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if refresh
                && let Ok(list) = query(&self.ctx, &self.kind).await
            {
                self.tx.send_if_modified(|current| {
                    if *current == list {
                        false
                    } else {
                        *current = list;
                        true
                    }
                });
            }
        }
        debug!(list = ?self.kind, "List watch stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aula_core::ManualClock;
    use aula_store::InMemoryDocumentStore;

    use super::*;
    use crate::config::MessagingConfig;
    use crate::identity::{CurrentUser, StaticIdentity};
    use crate::profile::InMemoryProfileDirectory;

    fn uid(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn directory_for(store: Arc<InMemoryDocumentStore>, user: &str) -> ConversationDirectory {
        directory_with(store, user, MessagingConfig::default())
    }

    fn directory_with(
        store: Arc<InMemoryDocumentStore>,
        user: &str,
        config: MessagingConfig,
    ) -> ConversationDirectory {
        let profiles = InMemoryProfileDirectory::new();
        profiles.insert(Profile::new(uid("ana"), "Ana Torres").with_photo("https://img/ana.png"));
        profiles.insert(Profile::new(uid("ben"), "Ben Ortiz"));
        let ctx = MessagingContext::builder(store)
            .identity(Arc::new(StaticIdentity::signed_in(CurrentUser::new(
                uid(user),
                user,
            ))))
            .profiles(Arc::new(profiles))
            .config(config)
            .build();
        ConversationDirectory::new(ctx)
    }

    fn store() -> Arc<InMemoryDocumentStore> {
        Arc::new(InMemoryDocumentStore::new(Arc::new(ManualClock::default())))
    }

    #[test]
    fn test_initials() {
        assert_eq!(Avatar::initials("ana maría torres"), Avatar::Initials("AM".into()));
        assert_eq!(Avatar::initials("  "), Avatar::Initials("?".into()));
    }

    #[tokio::test]
    async fn test_dm_with_self_rejected() {
        let dir = directory_for(store(), "ana");
        assert!(matches!(
            dir.open_or_create_dm(&uid("ana")).await,
            Err(MessagingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_dm_titles_and_avatars_per_viewer() {
        let store = store();
        let ana = directory_for(store.clone(), "ana");
        let conv = ana.open_or_create_dm(&uid("ben")).await.unwrap();

        assert_eq!(ana.display_title(&conv, &uid("ana")).await, "Ben Ortiz");
        assert_eq!(ana.display_title(&conv, &uid("ben")).await, "Ana Torres");
        assert_eq!(
            ana.avatar(&conv, &uid("ana")).await,
            Avatar::Initials("BO".into())
        );
        assert_eq!(
            ana.avatar(&conv, &uid("ben")).await,
            Avatar::Photo("https://img/ana.png".into())
        );
    }

    #[tokio::test]
    async fn test_support_title_for_owner_and_agent() {
        let dir = directory_for(store(), "ana");
        let conv = dir.open_or_create_support().await.unwrap();
        assert_eq!(dir.display_title(&conv, &uid("ana")).await, "Support");
        assert_eq!(
            dir.display_title(&conv, &uid("agent")).await,
            "Support: Ana Torres"
        );
    }

    #[tokio::test]
    async fn test_blank_group_title_rejected() {
        let dir = directory_for(store(), "ana");
        assert!(matches!(
            dir.create_group(NewGroup::new("   ")).await,
            Err(MessagingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_public_group_listing_excludes_private() {
        let dir = directory_for(store(), "ana");
        dir.create_group(NewGroup::new("Open Chem")).await.unwrap();
        dir.create_group(NewGroup::new("Staff").private()).await.unwrap();

        let listed = dir.list_public_groups().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title.as_deref(), Some("Open Chem"));
        assert_eq!(dir.list_mine().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lists_capped_at_list_window() {
        let dir = directory_with(store(), "ana", MessagingConfig::default().with_list_window(2));
        for title in ["Chem", "Physics", "Biology"] {
            dir.create_group(NewGroup::new(title)).await.unwrap();
        }

        assert_eq!(dir.list_public_groups().await.unwrap().len(), 2);
        assert_eq!(dir.list_mine().await.unwrap().len(), 2);
        assert_eq!(dir.watch_mine().await.unwrap().current().len(), 2);
    }

    #[tokio::test]
    async fn test_signed_out_blocked() {
        let ctx = MessagingContext::builder(store()).build();
        let dir = ConversationDirectory::new(ctx);
        assert!(matches!(
            dir.list_mine().await,
            Err(MessagingError::NotSignedIn { .. })
        ));
    }

    #[tokio::test]
    async fn test_watch_mine_picks_up_new_dm() {
        let store = store();
        let ana = directory_for(store.clone(), "ana");
        let ben = directory_for(store, "ben");

        let mut watch = ben.watch_mine().await.unwrap();
        assert!(watch.current().is_empty());

        ana.open_or_create_dm(&uid("ben")).await.unwrap();
        let list = tokio::time::timeout(std::time::Duration::from_secs(1), watch.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id.as_str(), "ana__ben");
    }

    #[tokio::test]
    async fn test_watch_public_groups_picks_up_new_group() {
        let store = store();
        let ana = directory_for(store.clone(), "ana");
        let ben = directory_for(store, "ben");

        let mut watch = ben.watch_public_groups().await.unwrap();
        assert!(watch.current().is_empty());

        ana.create_group(NewGroup::new("Staff room").private()).await.unwrap();
        ana.create_group(NewGroup::new("Open Chem")).await.unwrap();
        let list = tokio::time::timeout(std::time::Duration::from_secs(1), watch.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title.as_deref(), Some("Open Chem"));
    }
}
