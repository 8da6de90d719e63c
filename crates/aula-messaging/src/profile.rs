//! Profile directory collaborator and per-session cache.
//!
//! Profiles are read-only here: display name, handle and photo for a user id,
//! plus prefix search over the name and handle indexes.

use std::sync::Arc;

use async_trait::async_trait;
use aula_core::UserId;
use aula_store::StorageResult;
use dashmap::DashMap;
use tracing::{debug, warn};

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub uid: UserId,
    pub display_name: String,
    pub handle: Option<String>,
    pub photo_url: Option<String>,
}

impl Profile {
    pub fn new(uid: UserId, display_name: impl Into<String>) -> Self {
        Self {
            uid,
            display_name: display_name.into(),
            handle: None,
            photo_url: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_photo(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// Read-only lookup of user profiles.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn profile(&self, uid: &UserId) -> StorageResult<Option<Profile>>;

    /// Profiles whose lowercased display name starts with `prefix`.
    async fn search_by_name_prefix(&self, prefix: &str, limit: usize)
    -> StorageResult<Vec<Profile>>;

    /// Profiles whose lowercased handle starts with `prefix`.
    async fn search_by_handle_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> StorageResult<Vec<Profile>>;
}

/// In-memory profile directory.
#[derive(Default)]
pub struct InMemoryProfileDirectory {
    profiles: DashMap<UserId, Profile>,
}

impl InMemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles.insert(profile.uid.clone(), profile);
    }

    fn search<F>(&self, limit: usize, key: F) -> Vec<Profile>
    where
        F: Fn(&Profile) -> bool,
    {
        let mut hits: Vec<Profile> = self
            .profiles
            .iter()
            .filter(|p| key(p.value()))
            .map(|p| p.value().clone())
            .collect();
        hits.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.uid.cmp(&b.uid)));
        hits.truncate(limit);
        hits
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryProfileDirectory {
    async fn profile(&self, uid: &UserId) -> StorageResult<Option<Profile>> {
        Ok(self.profiles.get(uid).map(|p| p.clone()))
    }

    async fn search_by_name_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> StorageResult<Vec<Profile>> {
        Ok(self.search(limit, |p| {
            p.display_name.to_lowercase().starts_with(prefix)
        }))
    }

    async fn search_by_handle_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> StorageResult<Vec<Profile>> {
        Ok(self.search(limit, |p| {
            p.handle
                .as_deref()
                .is_some_and(|h| h.to_lowercase().starts_with(prefix))
        }))
    }
}

/// Session-scoped cache in front of a [`ProfileDirectory`].
pub struct ProfileCache {
    directory: Arc<dyn ProfileDirectory>,
    cache: DashMap<UserId, Profile>,
}

impl ProfileCache {
    pub fn new(directory: Arc<dyn ProfileDirectory>) -> Self {
        Self {
            directory,
            cache: DashMap::new(),
        }
    }

    /// Resolve a profile, hitting the directory at most once per user.
    ///
    /// Lookup failures are logged and treated as unknown.
    pub async fn profile(&self, uid: &UserId) -> Option<Profile> {
        if let Some(hit) = self.cache.get(uid) {
            return Some(hit.clone());
        }
        match self.directory.profile(uid).await {
            Ok(Some(profile)) => {
                self.cache.insert(uid.clone(), profile.clone());
                Some(profile)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(user = %uid, error = %e, "Profile lookup failed");
                None
            }
        }
    }

    /// Display name, falling back to the short user id.
    pub async fn display_name(&self, uid: &UserId) -> String {
        match self.profile(uid).await {
            Some(profile) => profile.display_name,
            None => uid.short_id(),
        }
    }

    /// Prefix search over names and handles, merged and deduplicated by user id.
    ///
    /// A leading `@` is ignored when matching handles.
    pub async fn search(&self, term: &str, limit: usize) -> StorageResult<Vec<Profile>> {
        let term = term.trim().to_lowercase();
        if term.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let handle_term = term.trim_start_matches('@');

        let by_name = self.directory.search_by_name_prefix(&term, limit).await?;
        let by_handle = self
            .directory
            .search_by_handle_prefix(handle_term, limit)
            .await?;

        let mut merged: Vec<Profile> = Vec::with_capacity(by_name.len() + by_handle.len());
        for profile in by_name.into_iter().chain(by_handle) {
            if merged.iter().any(|p| p.uid == profile.uid) {
                continue;
            }
            self.cache.insert(profile.uid.clone(), profile.clone());
            merged.push(profile);
        }
        merged.truncate(limit);

        debug!(term = %term, hits = merged.len(), "Profile search");
        Ok(merged)
    }
}
