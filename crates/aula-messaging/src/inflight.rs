//! Same-client duplicate submission guard.
//!
//! A UI disables an action's control until its write settles. `InFlight` is
//! that rule without a UI: while a guard for a key is alive, a second
//! `begin` with the same key fails with `Busy`.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MessagingError, Result};

/// Set of actions currently in progress.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` until the returned guard is dropped.
    pub fn begin(&self, key: impl Into<String>) -> Result<InFlightGuard> {
        let key = key.into();
        if !self.keys.lock().insert(key.clone()) {
            return Err(MessagingError::Busy);
        }
        Ok(InFlightGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}
