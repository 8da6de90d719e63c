//! Shared fixtures: several clients over one in-memory store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use aula_core::{ConversationId, ManualClock, UserId};
use aula_messaging::{
    CurrentUser, InMemoryProfileDirectory, MessagingClient, MessagingConfig, MessagingContext,
    Profile, StaticIdentity,
};
use aula_store::{BlobStore, InMemoryBlobStore, InMemoryDocumentStore};
use tokio::sync::watch;

pub fn uid(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

/// Display name used for a test user: the id, capitalized.
pub fn name_of(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct World {
    pub store: Arc<InMemoryDocumentStore>,
    pub clock: ManualClock,
    pub profiles: Arc<InMemoryProfileDirectory>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub config: MessagingConfig,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(MessagingConfig::default())
    }

    pub fn with_config(config: MessagingConfig) -> Self {
        aula_logging::init_testing();
        let clock = ManualClock::default();
        Self {
            store: Arc::new(config.in_memory_store(Arc::new(clock.clone()))),
            clock,
            profiles: Arc::new(InMemoryProfileDirectory::new()),
            blobs: Arc::new(InMemoryBlobStore::new()),
            config,
        }
    }

    pub fn context(&self, user: &str) -> MessagingContext {
        self.context_with_blobs(user, self.blobs.clone())
    }

    pub fn context_with_blobs(&self, user: &str, blobs: Arc<dyn BlobStore>) -> MessagingContext {
        self.profiles.insert(Profile::new(uid(user), name_of(user)).with_handle(user));
        MessagingContext::builder(self.store.clone())
            .identity(Arc::new(StaticIdentity::signed_in(CurrentUser::new(
                uid(user),
                name_of(user),
            ))))
            .profiles(self.profiles.clone())
            .blobs(blobs)
            .clock(Arc::new(self.clock.clone()))
            .config(self.config.clone())
            .build()
    }

    pub fn client(&self, user: &str) -> MessagingClient {
        MessagingClient::new(self.context(user))
    }

    pub async fn conversation(&self, id: &ConversationId) -> aula_core::Conversation {
        use aula_store::DocumentStore;
        self.store.get_conversation(id).await.unwrap().unwrap()
    }
}

/// Wait until the watched value satisfies `pred`, failing after two seconds.
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let value = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("timed out waiting for watched value")
        .expect("watch sender dropped");
    value.clone()
}

/// Poll `check` every few milliseconds until it holds, failing after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
