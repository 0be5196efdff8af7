//! Release tags: the identity metadata attached to every build.

use release_state::ReleaseKey;
use serde::{Deserialize, Serialize};

/// Tag key carrying the commit sha.
pub const TAG_COMMIT_SHA: &str = "balena-ci-commit-sha";

/// Tag key carrying the pull request id.
pub const TAG_PULL_REQUEST_ID: &str = "balena-ci-id";

/// Tag key carrying the git tag name for tag-ref pushes.
pub const TAG_GIT_TAG: &str = "balena-ci-git-tag";

/// Ordered tag set for a build. The commit sha is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTags {
    pub sha: String,
    pub pull_request_id: Option<u64>,
    pub git_tag: Option<String>,
}

impl ReleaseTags {
    pub fn for_commit(sha: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            pull_request_id: None,
            git_tag: None,
        }
    }

    pub fn for_pull_request(sha: impl Into<String>, pull_request_id: u64) -> Self {
        Self {
            sha: sha.into(),
            pull_request_id: Some(pull_request_id),
            git_tag: None,
        }
    }

    pub fn with_git_tag(mut self, tag: impl Into<String>) -> Self {
        self.git_tag = Some(tag.into());
        self
    }

    /// Tags identifying the release for a store key (no git tag).
    pub fn from_key(key: &ReleaseKey) -> Self {
        Self {
            sha: key.sha.clone(),
            pull_request_id: key.pull_request_id,
            git_tag: None,
        }
    }

    /// Store key these tags bind to within `fleet`.
    pub fn key(&self, fleet: &str) -> ReleaseKey {
        ReleaseKey {
            fleet: fleet.to_string(),
            sha: self.sha.clone(),
            pull_request_id: self.pull_request_id,
        }
    }

    /// `(key, value)` pairs in wire order.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(TAG_COMMIT_SHA, self.sha.clone())];
        if let Some(id) = self.pull_request_id {
            pairs.push((TAG_PULL_REQUEST_ID, id.to_string()));
        }
        if let Some(tag) = &self.git_tag {
            pairs.push((TAG_GIT_TAG, tag.clone()));
        }
        pairs
    }
}
