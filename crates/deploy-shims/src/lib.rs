//! Deploy-Shims: thin adapters to the external build system and source host
//!
//! Nothing in this crate makes lifecycle decisions. Each adapter turns one
//! request into one external call (a CLI process or an HTTP request) and
//! maps the response back into typed values or a `ShimError`.
//!
//! ## Layer 1 - I/O
//!
//! - `BalenaCli`: `push`, `release finalize`, `login` via the build CLI
//! - `BalenaClient`: release-by-tags query and version lookup over REST
//! - `TagReleaseStore`: `ReleaseStore` backed by release tags
//! - `GitCli`: `fetch` / `checkout` in the workspace
//! - `GitHubClient`: check runs, ref creation, check-run output channel

pub mod balena_api;
pub mod balena_cli;
mod error;
pub mod git;
pub mod github;
pub mod process;
pub mod tag_store;
pub mod tags;

pub use balena_api::BalenaClient;
pub use balena_cli::{parse_release_id, BalenaCli, PushRequest};
pub use error::ShimError;
pub use git::GitCli;
pub use github::{CheckRun, CheckRunChannel, CheckRunOutput, GitHubClient};
pub use process::{Cancellation, CommandOutput, CommandRunner, CommandSpec};
pub use tag_store::{ReleaseQuery, TagReleaseStore};
pub use tags::ReleaseTags;

/// Result type for shim operations
pub type Result<T> = std::result::Result<T, ShimError>;
