//! Fleet Deploy Core
//!
//! The release lifecycle state machine. Given a repository event it decides
//! whether to build a draft, build a final release, finalize an earlier
//! draft, or do nothing, and it carries the decision out through the
//! collaborator traits in [`collaborators`].
//!
//! Component layering (leaf first):
//!
//! - [`identity`]: event payload -> [`RepoContext`]
//! - [`versionbot`]: bounded wait for the versioning-bot branch
//! - [`lifecycle`]: classification, decision and execution

pub mod adapters;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fakes;
pub mod identity;
pub mod lifecycle;
pub mod outputs;
pub mod telemetry;
pub mod versionbot;

pub use collaborators::{
    BuildExecutor, CheckLookup, Collaborators, RefCreator, ReleaseFinalizer, SourceControl,
    VersionLookup,
};
pub use config::{DeployConfig, WaitConfig};
pub use error::{LifecycleError, Result};
pub use identity::{resolve, EventPayload, PullRequest, RepoContext, WorkflowEvent};
pub use lifecycle::{classify, Decision, LifecycleEngine, LifecycleState, RunOutcome};
pub use outputs::{GitHubOutputFile, OutputSink, StdoutOutputs};
pub use telemetry::init_tracing;
pub use versionbot::{versionbot_branch, BranchWaiter, WaitError};

pub use deploy_shims::ReleaseTags;
pub use release_state::{MatchPolicy, ReleaseId, ReleaseKey, ReleaseStore, StoredRelease};
