//! Collaborator implementations for the `deploy-shims` clients.

use async_trait::async_trait;
use deploy_shims::{BalenaCli, BalenaClient, CheckRun, GitCli, GitHubClient, PushRequest, ShimError};
use release_state::ReleaseId;

use crate::collaborators::{
    BuildExecutor, CheckLookup, RefCreator, ReleaseFinalizer, SourceControl, VersionLookup,
};
use crate::identity::RepoContext;

#[async_trait]
impl BuildExecutor for BalenaCli {
    async fn push(&self, request: &PushRequest) -> Result<ReleaseId, ShimError> {
        BalenaCli::push(self, request).await
    }
}

#[async_trait]
impl ReleaseFinalizer for BalenaCli {
    async fn finalize(&self, id: ReleaseId) -> Result<(), ShimError> {
        BalenaCli::finalize(self, id).await
    }
}

#[async_trait]
impl VersionLookup for BalenaClient {
    async fn release_version(&self, id: ReleaseId) -> Result<String, ShimError> {
        BalenaClient::release_version(self, id).await
    }
}

#[async_trait]
impl RefCreator for GitHubClient {
    async fn create_tag(&self, repo: &RepoContext, tag: &str) -> Result<String, ShimError> {
        GitHubClient::create_tag(self, &repo.owner, &repo.name, tag, &repo.sha).await
    }
}

#[async_trait]
impl CheckLookup for GitHubClient {
    async fn check_runs(&self, repo: &RepoContext) -> Result<Vec<CheckRun>, ShimError> {
        self.list_check_runs(&repo.owner, &repo.name, &repo.sha)
            .await
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn fetch(&self) -> Result<(), ShimError> {
        GitCli::fetch(self).await
    }

    async fn checkout(&self, reference: &str) -> Result<(), ShimError> {
        GitCli::checkout(self, reference).await
    }
}
