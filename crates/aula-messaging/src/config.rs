//! Configuration for messaging clients.
//!
//! Defaults match the limits the hosted deployment runs with. Use the builder
//! methods, or [`MessagingConfig::from_env`] for deployment overrides.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use aula_core::{Clock, UserId};
use aula_store::InMemoryDocumentStore;

use crate::error::{MessagingError, Result};

/// Tunables shared by every messaging component.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagingConfig {
    /// Maximum conversations in a list view.
    pub list_window: usize,
    /// Maximum messages kept in a conversation's live stream.
    pub message_window: usize,
    /// Maximum members per group.
    pub group_capacity: u32,
    /// Characters of message text kept in `lastMessage`.
    pub preview_chars: usize,
    /// Readers ignore typing entries older than this.
    pub typing_ttl: Duration,
    /// Writers clear their typing entry after this much inactivity.
    pub typing_idle_clear: Duration,
    /// Minimum spacing between typing writes.
    pub typing_throttle: Duration,
    /// Typers named in the indicator before "N more".
    pub max_typers_shown: usize,
    /// Users who staff the support channel.
    pub support_agents: BTreeSet<UserId>,
    /// Login entry point for signed-out users.
    pub login_path: String,
    /// Delete attachments already uploaded when a send fails.
    pub cleanup_orphaned_uploads: bool,
    /// Change events an in-memory store buffers per subscriber.
    pub event_channel_capacity: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            list_window: 60,
            message_window: 200,
            group_capacity: 200,
            preview_chars: 120,
            typing_ttl: Duration::from_secs(6),
            typing_idle_clear: Duration::from_secs(4),
            typing_throttle: Duration::from_millis(1500),
            max_typers_shown: 2,
            support_agents: BTreeSet::new(),
            login_path: "/login".to_string(),
            cleanup_orphaned_uploads: true,
            event_channel_capacity: 1024,
        }
    }
}

impl MessagingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `AULA_*` environment variables onto the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup` onto the defaults.
    ///
    /// Recognized keys: `AULA_GROUP_CAPACITY`, `AULA_MESSAGE_WINDOW`,
    /// `AULA_LIST_WINDOW`, `AULA_SUPPORT_AGENTS` (comma separated) and
    /// `AULA_LOGIN_PATH`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("AULA_GROUP_CAPACITY") {
            config.group_capacity = parse_var("AULA_GROUP_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("AULA_MESSAGE_WINDOW") {
            config.message_window = parse_var("AULA_MESSAGE_WINDOW", &raw)?;
        }
        if let Some(raw) = lookup("AULA_LIST_WINDOW") {
            config.list_window = parse_var("AULA_LIST_WINDOW", &raw)?;
        }
        if let Some(raw) = lookup("AULA_SUPPORT_AGENTS") {
            config.support_agents = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    UserId::parse(s).map_err(|e| {
                        MessagingError::Config(format!("AULA_SUPPORT_AGENTS: {e}"))
                    })
                })
                .collect::<Result<_>>()?;
        }
        if let Some(raw) = lookup("AULA_LOGIN_PATH") {
            if !raw.starts_with('/') {
                return Err(MessagingError::Config(format!(
                    "AULA_LOGIN_PATH must start with '/': {raw}"
                )));
            }
            config.login_path = raw;
        }

        Ok(config)
    }

    /// Set the group capacity.
    pub fn with_group_capacity(mut self, capacity: u32) -> Self {
        self.group_capacity = capacity;
        self
    }

    /// Set the message window.
    pub fn with_message_window(mut self, window: usize) -> Self {
        self.message_window = window;
        self
    }

    /// Set the list window.
    pub fn with_list_window(mut self, window: usize) -> Self {
        self.list_window = window;
        self
    }

    /// Set the change broadcast capacity.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// In-memory document store sized by `event_channel_capacity`.
    pub fn in_memory_store(&self, clock: Arc<dyn Clock>) -> InMemoryDocumentStore {
        InMemoryDocumentStore::with_event_capacity(clock, self.event_channel_capacity)
    }

    /// Add a support agent.
    pub fn with_support_agent(mut self, uid: UserId) -> Self {
        self.support_agents.insert(uid);
        self
    }

    /// Enable or disable orphaned-upload cleanup.
    pub fn with_upload_cleanup(mut self, enabled: bool) -> Self {
        self.cleanup_orphaned_uploads = enabled;
        self
    }

    /// Login URL that returns the user to `next` after signing in.
    pub fn login_url(&self, next: &str) -> String {
        format!("{}?next={}", self.login_path, urlencoding::encode(next))
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| MessagingError::Config(format!("{key}: cannot parse {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MessagingConfig::default();
        assert_eq!(config.group_capacity, 200);
        assert_eq!(config.message_window, 200);
        assert_eq!(config.list_window, 60);
        assert_eq!(config.typing_ttl, Duration::from_secs(6));
        assert_eq!(config.typing_throttle, Duration::from_millis(1500));
    }

    #[test]
    fn test_env_overlay() {
        let config = MessagingConfig::from_lookup(lookup(&[
            ("AULA_GROUP_CAPACITY", "50"),
            ("AULA_SUPPORT_AGENTS", "agent1, agent2,"),
            ("AULA_LOGIN_PATH", "/auth/login"),
        ]))
        .unwrap();

        assert_eq!(config.group_capacity, 50);
        assert_eq!(config.support_agents.len(), 2);
        assert_eq!(config.login_path, "/auth/login");
        assert_eq!(config.message_window, 200);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let result = MessagingConfig::from_lookup(lookup(&[("AULA_MESSAGE_WINDOW", "lots")]));
        assert!(matches!(result, Err(MessagingError::Config(_))));

        let result = MessagingConfig::from_lookup(lookup(&[("AULA_LOGIN_PATH", "login")]));
        assert!(matches!(result, Err(MessagingError::Config(_))));
    }

    #[test]
    fn test_login_url_encodes_next() {
        let config = MessagingConfig::default();
        assert_eq!(
            config.login_url("/messages?c=a b"),
            "/login?next=%2Fmessages%3Fc%3Da%20b"
        );
    }
}
