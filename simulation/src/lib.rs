//! # Aula Simulation
//!
//! Drives several messaging clients against one shared in-memory document
//! store and checks that the shared state stays consistent.
//!
//! ## Architecture
//!
//! - **SimWorld** (`lib.rs`): shared store, manual clock and profiles, plus a
//!   client factory that pairs each client with its logging span
//! - **Scenarios** (`scenarios.rs`): the scripted runs, each producing a
//!   [`ScenarioReport`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use aula_simulation::{SimWorld, scenarios};
//!
//! let report = scenarios::run_dm_race(&SimWorld::new(), 8).await?;
//! assert!(report.passed());
//! ```

pub mod scenarios;

use std::fmt;
use std::sync::Arc;

use aula_core::{ConversationId, ManualClock, UserId};
use aula_logging::client_span;
use aula_messaging::{
    CurrentUser, InMemoryProfileDirectory, MessagingClient, MessagingConfig, MessagingContext,
    Profile, StaticIdentity,
};
use aula_store::{DocumentStore, InMemoryBlobStore, InMemoryDocumentStore};
use serde::Serialize;
use tracing::Span;

/// Everything the simulated clients share.
pub struct SimWorld {
    pub store: Arc<InMemoryDocumentStore>,
    pub clock: ManualClock,
    pub profiles: Arc<InMemoryProfileDirectory>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub config: MessagingConfig,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::with_config(MessagingConfig::default())
    }

    pub fn with_config(config: MessagingConfig) -> Self {
        let clock = ManualClock::default();
        Self {
            store: Arc::new(config.in_memory_store(Arc::new(clock.clone()))),
            clock,
            profiles: Arc::new(InMemoryProfileDirectory::new()),
            blobs: Arc::new(InMemoryBlobStore::new()),
            config,
        }
    }

    /// A signed-in context for `user`, registering their profile.
    pub fn context(&self, user: &str) -> anyhow::Result<MessagingContext> {
        let uid = UserId::parse(user)?;
        let name = display_name(user);
        self.profiles
            .insert(Profile::new(uid.clone(), name.clone()).with_handle(user));
        Ok(MessagingContext::builder(self.store.clone())
            .identity(Arc::new(StaticIdentity::signed_in(CurrentUser::new(uid, name))))
            .profiles(self.profiles.clone())
            .blobs(self.blobs.clone())
            .clock(Arc::new(self.clock.clone()))
            .config(self.config.clone())
            .build())
    }

    pub fn client(&self, user: &str) -> anyhow::Result<MessagingClient> {
        Ok(MessagingClient::new(self.context(user)?))
    }

    /// A client for `user` and the span its work is logged under.
    ///
    /// Every log line emitted inside the span carries the user's id and a
    /// session id of its own.
    pub fn actor(&self, user: &str) -> anyhow::Result<(MessagingClient, Span)> {
        let client = self.client(user)?;
        Ok((client, client_span(&UserId::parse(user)?)))
    }

    pub async fn conversation(&self, id: &ConversationId) -> anyhow::Result<aula_core::Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("conversation {id} disappeared"))
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// "student7" shows as "Student7".
pub fn display_name(user: &str) -> String {
    let mut chars = user.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One checked property of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Outcome of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub checks: Vec<Check>,
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            checks: Vec::new(),
        }
    }

    /// Record a check.
    pub fn check(&mut self, name: impl Into<String>, passed: bool, detail: impl Into<String>) {
        self.checks.push(Check {
            name: name.into(),
            passed,
            detail: detail.into(),
        });
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.scenario)?;
        for check in &self.checks {
            let mark = if check.passed { "ok  " } else { "FAIL" };
            writeln!(f, "  [{mark}] {}: {}", check.name, check.detail)?;
        }
        Ok(())
    }
}
