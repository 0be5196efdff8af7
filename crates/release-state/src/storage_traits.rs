//! Storage trait definitions for release bindings
//!
//! `ReleaseStore` maps a release identity (`ReleaseKey`) to the release the
//! build system produced for it. Implementations may persist the binding as
//! tags on the release itself or as an auxiliary status payload; callers see
//! the same semantics either way.
//!
//! An in-memory implementation is provided for testing via the `fakes`
//! module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Result type for store operations
pub type StorageResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identifier assigned to a release by the build system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(pub u64);

impl std::fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ReleaseId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(ReleaseId)
    }
}

/// Lookup key for a release binding.
///
/// A key with a pull request id is draft-scoped; a key without one belongs
/// to a direct build of the tracked branch and is keyed by sha only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseKey {
    pub fleet: String,
    pub sha: String,
    pub pull_request_id: Option<u64>,
}

impl ReleaseKey {
    /// Key for a build of the tracked branch.
    pub fn new(fleet: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            fleet: fleet.into(),
            sha: sha.into(),
            pull_request_id: None,
        }
    }

    /// Key for a pull-request scoped build.
    pub fn for_pull_request(
        fleet: impl Into<String>,
        sha: impl Into<String>,
        pull_request_id: u64,
    ) -> Self {
        Self {
            fleet: fleet.into(),
            sha: sha.into(),
            pull_request_id: Some(pull_request_id),
        }
    }

    /// Slot name within a fleet: `<sha>` or `<sha>:<pull request id>`.
    pub fn slot(&self) -> String {
        match self.pull_request_id {
            Some(id) => format!("{}:{}", self.sha, id),
            None => self.sha.clone(),
        }
    }
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.fleet, self.sha)?;
        if let Some(id) = self.pull_request_id {
            write!(f, "#pr{id}")?;
        }
        Ok(())
    }
}

/// The persisted side of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRelease {
    pub id: ReleaseId,
    /// `false` = draft, `true` = finalized. Only ever moves false -> true.
    pub is_final: bool,
}

impl StoredRelease {
    pub fn draft(id: ReleaseId) -> Self {
        Self {
            id,
            is_final: false,
        }
    }

    pub fn finalized(id: ReleaseId) -> Self {
        Self { id, is_final: true }
    }
}

// ---------------------------------------------------------------------------
// Match policy
// ---------------------------------------------------------------------------

/// How to treat a lookup that yields more than one candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Multiple matches are a consistency error.
    #[default]
    Strict,
    /// Take the newest candidate. Explicit opt-in only.
    MostRecent,
}

/// Reduce backend candidates (newest first) to at most one release.
pub fn select_match(
    key: &ReleaseKey,
    mut candidates: Vec<StoredRelease>,
    policy: MatchPolicy,
) -> StorageResult<Option<StoredRelease>> {
    match (candidates.len(), policy) {
        (0, _) => Ok(None),
        (1, _) => Ok(candidates.pop()),
        (_, MatchPolicy::MostRecent) => {
            tracing::warn!(
                key = %key,
                count = candidates.len(),
                "multiple releases matched; using most recent"
            );
            Ok(Some(candidates.remove(0)))
        }
        (count, MatchPolicy::Strict) => Err(StoreError::Ambiguous {
            key: key.to_string(),
            count,
        }),
    }
}

// ---------------------------------------------------------------------------
// ReleaseStore
// ---------------------------------------------------------------------------

/// Keyed store of release bindings.
///
/// Guarantees:
/// - `find` returns `Ok(None)` when nothing matches and
///   `StoreError::Ambiguous` when the backing yields several matches.
/// - `record` is an idempotent upsert: recording the same key twice leaves
///   exactly one binding.
/// - `mark_finalized` is reflected by subsequent `find` calls on the same
///   store without another external query. It is a no-op for ids the store
///   has never seen.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Look up the release bound to `key`.
    async fn find(&self, key: &ReleaseKey) -> StorageResult<Option<StoredRelease>>;

    /// Bind `release` to `key`, replacing any earlier binding.
    async fn record(&self, key: &ReleaseKey, release: StoredRelease) -> StorageResult<()>;

    /// Flip the persisted binding(s) for `id` to final.
    async fn mark_finalized(&self, id: ReleaseId) -> StorageResult<()>;
}
