//! Seams between the lifecycle engine and the outside world.
//!
//! Each trait is implemented for the matching client in `deploy-shims`
//! (see [`crate::adapters`]) and by recording doubles in [`crate::fakes`].

use std::sync::Arc;

use async_trait::async_trait;
use deploy_shims::{CheckRun, PushRequest, ShimError};
use release_state::{ReleaseId, ReleaseStore};

use crate::identity::RepoContext;
use crate::outputs::OutputSink;

type ShimResult<T> = std::result::Result<T, ShimError>;

/// Builds and uploads a release from source.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn push(&self, request: &PushRequest) -> ShimResult<ReleaseId>;
}

/// Promotes a draft release to final.
#[async_trait]
pub trait ReleaseFinalizer: Send + Sync {
    async fn finalize(&self, id: ReleaseId) -> ShimResult<()>;
}

/// Reads the version the build system derived for a release.
#[async_trait]
pub trait VersionLookup: Send + Sync {
    async fn release_version(&self, id: ReleaseId) -> ShimResult<String>;
}

/// Creates a tag reference in the source repository.
#[async_trait]
pub trait RefCreator: Send + Sync {
    /// Tag `repo.sha` as `tag`; returns the new reference's URL.
    async fn create_tag(&self, repo: &RepoContext, tag: &str) -> ShimResult<String>;
}

/// Lists the check runs on the repository's commit.
#[async_trait]
pub trait CheckLookup: Send + Sync {
    async fn check_runs(&self, repo: &RepoContext) -> ShimResult<Vec<CheckRun>>;
}

/// Working-tree operations.
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn fetch(&self) -> ShimResult<()>;
    async fn checkout(&self, reference: &str) -> ShimResult<()>;
}

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ReleaseStore>,
    pub builder: Arc<dyn BuildExecutor>,
    pub finalizer: Arc<dyn ReleaseFinalizer>,
    pub versions: Arc<dyn VersionLookup>,
    pub refs: Arc<dyn RefCreator>,
    pub checks: Arc<dyn CheckLookup>,
    pub source: Arc<dyn SourceControl>,
    pub outputs: Arc<dyn OutputSink>,
}
