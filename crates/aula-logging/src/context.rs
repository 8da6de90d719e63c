//! User context injection
//!
//! Several simulated clients often share one process. This module keeps the
//! acting user in thread-local storage so every span opened inside a scope can
//! be attributed to that user and client session.

use std::cell::RefCell;

use aula_core::UserId;
use tracing::Span;
use uuid::Uuid;

/// User context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContextData {
    /// The signed-in user's id
    pub user_id: String,
    /// Unique id of this client session
    pub session_id: Uuid,
}

thread_local! {
    static USER_CONTEXT: RefCell<Option<UserContextData>> = const { RefCell::new(None) };
}

/// RAII guard for user context
///
/// Sets the user context for the current thread on creation and restores the
/// previous context (if any) on drop.
///
/// # Example
///
/// ```ignore
/// use aula_logging::UserContextGuard;
///
/// let _guard = UserContextGuard::new(&alice);
/// tracing::info!("Sending message"); // spans carry user_id = "alice"
/// ```
pub struct UserContextGuard {
    previous: Option<UserContextData>,
}

impl UserContextGuard {
    /// Enter a scope acting as `user` with a fresh session id
    pub fn new(user: &UserId) -> Self {
        Self::with_session_id(user, Uuid::new_v4())
    }

    /// Enter a scope acting as `user` within an existing session
    pub fn with_session_id(user: &UserId, session_id: Uuid) -> Self {
        let previous = Self::current();
        let data = UserContextData {
            user_id: user.to_string(),
            session_id,
        };
        USER_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(data));
        Self { previous }
    }

    /// Get the current user context (if any)
    pub fn current() -> Option<UserContextData> {
        USER_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_user_id() -> Option<String> {
        Self::current().map(|ctx| ctx.user_id)
    }

    pub fn current_session_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.session_id)
    }
}

impl Drop for UserContextGuard {
    fn drop(&mut self) {
        USER_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Span for one client's work, attributed to `user` under a fresh session id
///
/// Events inside the span keep the attribution wherever the instrumented
/// future is polled.
///
/// ```ignore
/// client.send(&conversation, draft).instrument(client_span(&alice)).await?;
/// ```
pub fn client_span(user: &UserId) -> Span {
    let _guard = UserContextGuard::new(user);
    tracing::info_span!("client", user = %user)
}

/// Run a block with a user context in scope
///
/// ```ignore
/// with_user_context!(&alice, {
///     tracing::info!("Opening conversation");
/// });
/// ```
#[macro_export]
macro_rules! with_user_context {
    ($user:expr, $body:block) => {{
        let _guard = $crate::context::UserContextGuard::new($user);
        $body
    }};
}
