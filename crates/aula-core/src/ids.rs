//! Typed identifiers and deterministic conversation keys
//!
//! One-to-one and support conversations are deduplicated by a key that every
//! client computes the same way. The key doubles as the document id, which
//! turns "find or create" into a single conditional create.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentityError;

/// Separator used inside deterministic keys.
pub const KEY_SEPARATOR: &str = "__";

/// Prefix of every support thread key.
const SUPPORT_PREFIX: &str = "support";

/// Identity-provider user id.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Parse a user id, rejecting values that would make keys ambiguous.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        if raw.contains(KEY_SEPARATOR) {
            return Err(IdentityError::InvalidFormat(format!(
                "{raw:?} contains the reserved separator {KEY_SEPARATOR:?}"
            )));
        }
        Ok(Self(raw))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short_id(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Document id of a conversation.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Random id for conversations without a deterministic key (groups).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Store-assigned message id.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display("{_0}")]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Deterministic key of the one-to-one conversation between `a` and `b`.
///
/// Order-independent: `dm_key(a, b) == dm_key(b, a)`.
pub fn dm_key(a: &UserId, b: &UserId) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{first}{KEY_SEPARATOR}{second}")
}

/// Deterministic key of a user's support thread.
pub fn support_key(uid: &UserId) -> String {
    format!("{SUPPORT_PREFIX}{KEY_SEPARATOR}{uid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    #[test]
    fn test_user_id_rejects_empty_and_separator() {
        assert_eq!(UserId::parse("  "), Err(IdentityError::Empty));
        assert!(matches!(
            UserId::parse("a__b"),
            Err(IdentityError::InvalidFormat(_))
        ));
        assert!(UserId::parse("a_b").is_ok());
    }

    #[test]
    fn test_dm_key_is_order_independent() {
        let a = uid("A");
        let b = uid("B");
        assert_eq!(dm_key(&a, &b), "A__B");
        assert_eq!(dm_key(&b, &a), "A__B");
    }

    #[test]
    fn test_support_key() {
        assert_eq!(support_key(&uid("u42")), "support__u42");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&uid("alice")).unwrap();
        assert_eq!(json, "\"alice\"");
        assert_eq!(ConversationId::from("c1").to_string(), "c1");
    }
}
