//! Release-State: cross-run release bindings for fleet-deploy
//!
//! Every orchestrator invocation is a fresh, stateless process. This crate
//! owns the one piece of durable state the lifecycle needs: which release
//! was built for a given `(fleet, commit sha, pull request id)` identity.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: at most one authoritative binding per key, idempotent writes.
//!
//! ## Key Components
//!
//! - `ReleaseStore`: backend-agnostic lookup/record/finalize contract
//! - `StatusBlobStore`: bindings serialized into a status side-channel
//! - `MemoryReleaseStore`: in-process store used by tests

mod error;
pub mod fakes;
pub mod status_blob;
pub mod storage_traits;

pub use error::StoreError;
pub use status_blob::{StatusBlobStore, StatusChannel};
pub use storage_traits::{
    select_match, MatchPolicy, ReleaseId, ReleaseKey, ReleaseStore, StorageResult, StoredRelease,
};
