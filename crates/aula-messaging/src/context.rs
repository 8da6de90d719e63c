//! Shared handles every messaging component works with.

use std::sync::Arc;

use aula_core::{Clock, Conversation, ConversationId, SystemClock};
use aula_store::{BlobStore, DocumentStore, InMemoryBlobStore, StorageError};
use tracing::warn;

use crate::authz::Authorizer;
use crate::config::MessagingConfig;
use crate::error::{MessagingError, Result};
use crate::identity::{CurrentUser, IdentityProvider, StaticIdentity};
use crate::profile::{InMemoryProfileDirectory, ProfileCache, ProfileDirectory};

/// Path signed-out users return to after logging in.
pub const MESSAGES_PATH: &str = "/messages";

/// Cloneable bundle of collaborators for one client.
///
/// Components hold a context rather than individual handles, so a
/// [`MessagingClient`](crate::MessagingClient) and every session it opens see
/// the same store, identity and profile cache.
#[derive(Clone)]
pub struct MessagingContext {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<ProfileCache>,
    authz: Arc<Authorizer>,
    clock: Arc<dyn Clock>,
    config: Arc<MessagingConfig>,
}

impl MessagingContext {
    /// Start building a context around a document store.
    pub fn builder(store: Arc<dyn DocumentStore>) -> MessagingContextBuilder {
        MessagingContextBuilder::new(store)
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn profiles(&self) -> &ProfileCache {
        &self.profiles
    }

    pub fn authz(&self) -> &Authorizer {
        &self.authz
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// The signed-in user, or `NotSignedIn` pointing back at `next`.
    pub fn current_user_for(&self, next: &str) -> Result<CurrentUser> {
        self.identity
            .current_user()
            .ok_or_else(|| MessagingError::NotSignedIn {
                login_url: self.config.login_url(next),
            })
    }

    /// The signed-in user, or `NotSignedIn` pointing back at the messages page.
    pub fn require_user(&self) -> Result<CurrentUser> {
        self.current_user_for(MESSAGES_PATH)
    }

    /// Fetch a conversation that must exist.
    pub async fn conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.store
            .get_conversation(id)
            .await
            .map_err(rejected("get_conversation", id))?
            .ok_or_else(|| MessagingError::ConversationNotFound { id: id.to_string() })
    }
}

/// Log a store failure with its operation and conversation, then convert it.
pub(crate) fn rejected<'a>(
    operation: &'static str,
    conversation: &'a ConversationId,
) -> impl FnOnce(StorageError) -> MessagingError + 'a {
    move |e| {
        warn!(operation, conversation = %conversation, error = %e, "Store rejected operation");
        MessagingError::from(e)
    }
}

/// Builder for [`MessagingContext`].
pub struct MessagingContextBuilder {
    store: Arc<dyn DocumentStore>,
    blobs: Option<Arc<dyn BlobStore>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    profiles: Option<Arc<dyn ProfileDirectory>>,
    clock: Option<Arc<dyn Clock>>,
    config: MessagingConfig,
}

impl MessagingContextBuilder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            blobs: None,
            identity: None,
            profiles: None,
            clock: None,
            config: MessagingConfig::default(),
        }
    }

    /// Blob store for attachments (default: in-memory).
    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Identity provider (default: signed out).
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Profile directory (default: empty in-memory directory).
    pub fn profiles(mut self, profiles: Arc<dyn ProfileDirectory>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Clock for client-side time checks (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: MessagingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> MessagingContext {
        let profiles = self
            .profiles
            .unwrap_or_else(|| Arc::new(InMemoryProfileDirectory::new()));
        MessagingContext {
            store: self.store,
            blobs: self
                .blobs
                .unwrap_or_else(|| Arc::new(InMemoryBlobStore::new())),
            identity: self
                .identity
                .unwrap_or_else(|| Arc::new(StaticIdentity::signed_out())),
            profiles: Arc::new(ProfileCache::new(profiles)),
            authz: Arc::new(Authorizer::new(self.config.support_agents.clone())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: Arc::new(self.config),
        }
    }
}
