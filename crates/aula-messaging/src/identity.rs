//! Identity provider collaborator.
//!
//! Sign-in itself happens elsewhere. Messaging only needs to know who is
//! signed in right now and to hear about sign-in/out transitions.

use aula_core::UserId;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::info;

/// The signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub uid: UserId,
    pub display_name: String,
    pub email: Option<String>,
}

impl CurrentUser {
    pub fn new(uid: UserId, display_name: impl Into<String>) -> Self {
        Self {
            uid,
            display_name: display_name.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Session transitions emitted by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(CurrentUser),
    SignedOut,
}

/// Source of the current user.
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, if any.
    fn current_user(&self) -> Option<CurrentUser>;

    /// Subscribe to sign-in/out transitions.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Identity provider whose user is set explicitly.
///
/// Used by tests and the simulator, where each in-process client has its own
/// `StaticIdentity`.
pub struct StaticIdentity {
    user: RwLock<Option<CurrentUser>>,
    events: broadcast::Sender<AuthEvent>,
}

impl StaticIdentity {
    /// Provider with nobody signed in.
    pub fn signed_out() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            user: RwLock::new(None),
            events,
        }
    }

    /// Provider with `user` already signed in.
    pub fn signed_in(user: CurrentUser) -> Self {
        let identity = Self::signed_out();
        *identity.user.write() = Some(user);
        identity
    }

    pub fn sign_in(&self, user: CurrentUser) {
        info!(user = %user.uid, "Signed in");
        *self.user.write() = Some(user.clone());
        let _ = self.events.send(AuthEvent::SignedIn(user));
    }

    pub fn sign_out(&self) {
        if self.user.write().take().is_some() {
            info!("Signed out");
            let _ = self.events.send(AuthEvent::SignedOut);
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<CurrentUser> {
        self.user.read().clone()
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
