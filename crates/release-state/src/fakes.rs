//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryReleaseStore` and `MemoryStatusChannel` that satisfy the
//! trait contracts without any external service.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::status_blob::StatusChannel;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryReleaseStore
// ---------------------------------------------------------------------------

/// In-memory release store backed by a `HashMap<ReleaseKey, candidates>`.
///
/// Candidates are kept newest first so an inconsistent backing (several
/// releases for one key) can be simulated with [`MemoryReleaseStore::seed`].
#[derive(Debug, Default)]
pub struct MemoryReleaseStore {
    bindings: Mutex<HashMap<ReleaseKey, Vec<StoredRelease>>>,
    policy: MatchPolicy,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: MatchPolicy) -> Self {
        Self {
            bindings: Mutex::default(),
            policy,
        }
    }

    /// Install raw candidates for a key, bypassing upsert semantics.
    pub fn seed(&self, key: ReleaseKey, candidates: Vec<StoredRelease>) {
        self.bindings.lock().unwrap().insert(key, candidates);
    }

    /// Number of keys currently bound.
    pub fn len(&self) -> usize {
        self.bindings.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn find(&self, key: &ReleaseKey) -> StorageResult<Option<StoredRelease>> {
        let candidates = self
            .bindings
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default();
        select_match(key, candidates, self.policy)
    }

    async fn record(&self, key: &ReleaseKey, release: StoredRelease) -> StorageResult<()> {
        self.bindings
            .lock()
            .unwrap()
            .insert(key.clone(), vec![release]);
        Ok(())
    }

    async fn mark_finalized(&self, id: ReleaseId) -> StorageResult<()> {
        let mut bindings = self.bindings.lock().unwrap();
        for release in bindings.values_mut().flatten() {
            if release.id == id {
                release.is_final = true;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStatusChannel
// ---------------------------------------------------------------------------

/// Status side-channel held in memory; counts writes for assertions.
#[derive(Debug, Default)]
pub struct MemoryStatusChannel {
    text: Mutex<Option<String>>,
    writes: Mutex<usize>,
}

impl MemoryStatusChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(Some(text.into())),
            writes: Mutex::new(0),
        }
    }

    /// Current raw payload.
    pub fn text(&self) -> Option<String> {
        self.text.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl StatusChannel for MemoryStatusChannel {
    async fn read(&self) -> StorageResult<Option<String>> {
        Ok(self.text())
    }

    async fn write(&self, text: String) -> StorageResult<()> {
        *self.text.lock().unwrap() = Some(text);
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}
