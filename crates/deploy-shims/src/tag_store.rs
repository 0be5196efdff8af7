//! `ReleaseStore` backed by release tags on the build system.
//!
//! The binding is written by the build itself (the tag set is passed to
//! `push`), so `record` only needs to remember it for the rest of the
//! invocation. Lookups query the build system for successful releases
//! carrying the key's tags.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use release_state::{
    select_match, MatchPolicy, ReleaseId, ReleaseKey, ReleaseStore, StorageResult, StoreError,
    StoredRelease,
};
use tracing::debug;

use crate::balena_api::BalenaClient;
use crate::tags::ReleaseTags;

/// Rows requested per lookup. Two are enough to tell a unique match from
/// an ambiguous one under either policy.
const LOOKUP_LIMIT: usize = 2;

/// Query for releases by identity tags (newest first).
#[async_trait]
pub trait ReleaseQuery: Send + Sync {
    async fn releases_by_tags(
        &self,
        fleet: &str,
        tags: &ReleaseTags,
        limit: usize,
    ) -> crate::Result<Vec<StoredRelease>>;
}

#[async_trait]
impl ReleaseQuery for BalenaClient {
    async fn releases_by_tags(
        &self,
        fleet: &str,
        tags: &ReleaseTags,
        limit: usize,
    ) -> crate::Result<Vec<StoredRelease>> {
        BalenaClient::releases_by_tags(self, fleet, tags, limit).await
    }
}

#[async_trait]
impl<Q: ReleaseQuery + ?Sized> ReleaseQuery for Arc<Q> {
    async fn releases_by_tags(
        &self,
        fleet: &str,
        tags: &ReleaseTags,
        limit: usize,
    ) -> crate::Result<Vec<StoredRelease>> {
        (**self).releases_by_tags(fleet, tags, limit).await
    }
}

/// Tag-backed release store with an in-process overlay.
pub struct TagReleaseStore<Q: ReleaseQuery> {
    query: Q,
    policy: MatchPolicy,
    bindings: Mutex<HashMap<ReleaseKey, StoredRelease>>,
    finalized: Mutex<HashSet<ReleaseId>>,
}

impl<Q: ReleaseQuery> TagReleaseStore<Q> {
    pub fn new(query: Q) -> Self {
        Self::with_policy(query, MatchPolicy::Strict)
    }

    pub fn with_policy(query: Q, policy: MatchPolicy) -> Self {
        Self {
            query,
            policy,
            bindings: Mutex::default(),
            finalized: Mutex::default(),
        }
    }

    fn overlay(&self, release: StoredRelease) -> StoredRelease {
        let finalized = self.finalized.lock().unwrap().contains(&release.id);
        StoredRelease {
            id: release.id,
            is_final: release.is_final || finalized,
        }
    }
}

#[async_trait]
impl<Q: ReleaseQuery> ReleaseStore for TagReleaseStore<Q> {
    async fn find(&self, key: &ReleaseKey) -> StorageResult<Option<StoredRelease>> {
        let cached = self.bindings.lock().unwrap().get(key).copied();
        if let Some(release) = cached {
            debug!(key = %key, release_id = %release.id, "binding known from this run");
            return Ok(Some(self.overlay(release)));
        }

        let candidates = self
            .query
            .releases_by_tags(&key.fleet, &ReleaseTags::from_key(key), LOOKUP_LIMIT)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let found = select_match(key, candidates, self.policy)?.map(|r| self.overlay(r));
        if let Some(release) = found {
            self.bindings.lock().unwrap().insert(key.clone(), release);
        }
        Ok(found)
    }

    async fn record(&self, key: &ReleaseKey, release: StoredRelease) -> StorageResult<()> {
        debug!(key = %key, release_id = %release.id, "binding carried by release tags");
        self.bindings.lock().unwrap().insert(key.clone(), release);
        Ok(())
    }

    async fn mark_finalized(&self, id: ReleaseId) -> StorageResult<()> {
        self.finalized.lock().unwrap().insert(id);
        for release in self.bindings.lock().unwrap().values_mut() {
            if release.id == id {
                release.is_final = true;
            }
        }
        Ok(())
    }
}
