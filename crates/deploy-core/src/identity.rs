//! Repository and pull-request identity resolved from a workflow event.
//!
//! The payload is the raw JSON the CI host writes for the triggering event.
//! Only the fields the lifecycle reads are modelled; everything else is
//! ignored.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

/// `owner` appears as an object on real events and as a bare login in some
/// hand-written payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OwnerPayload {
    Account { login: String },
    Login(String),
}

impl OwnerPayload {
    pub fn login(&self) -> &str {
        match self {
            OwnerPayload::Account { login } | OwnerPayload::Login(login) => login,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryPayload {
    pub name: String,
    pub owner: OwnerPayload,
    #[serde(default)]
    pub master_branch: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeadPayload {
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequestPayload {
    pub id: u64,
    pub number: u64,
    #[serde(default)]
    pub merged: Option<bool>,
    pub head: HeadPayload,
}

/// Event payload as delivered by the CI host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub repository: Option<RepositoryPayload>,
    #[serde(default)]
    pub pull_request: Option<PullRequestPayload>,
}

/// A triggering event: name, ref, commit and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowEvent {
    pub name: String,
    pub git_ref: String,
    pub sha: String,
    pub payload: EventPayload,
}

impl WorkflowEvent {
    pub fn new(
        name: impl Into<String>,
        git_ref: impl Into<String>,
        sha: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            name: name.into(),
            git_ref: git_ref.into(),
            sha: sha.into(),
            payload,
        }
    }

    /// Parse the payload from JSON text.
    pub fn from_json(
        name: impl Into<String>,
        git_ref: impl Into<String>,
        sha: impl Into<String>,
        payload: &str,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self::new(name, git_ref, sha, serde_json::from_str(payload)?))
    }

    /// Read the payload from the event file written by the CI host.
    pub fn from_file(
        name: impl Into<String>,
        git_ref: impl Into<String>,
        sha: impl Into<String>,
        path: &Path,
    ) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(name, git_ref, sha, &text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn is_pull_request(&self) -> bool {
        matches!(self.name.as_str(), "pull_request" | "pull_request_target")
    }

    pub fn is_closed(&self) -> bool {
        self.payload.action.as_deref() == Some("closed")
    }

    /// Tag name when the ref is `refs/tags/<name>`.
    pub fn tag_name(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/tags/")
    }
}

/// Pull request identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    /// Host-wide id. Used in release tags.
    pub id: u64,
    /// Per-repository number. Used in branch names.
    pub number: u64,
    pub merged: bool,
}

/// Normalized repository identity for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoContext {
    pub owner: String,
    pub name: String,
    /// Pull request head when the event carries one, else the event commit.
    pub sha: String,
    pub pull_request: Option<PullRequest>,
    /// Default branch named by the payload, if any.
    pub default_branch: Option<String>,
}

impl RepoContext {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Resolve repository and pull-request identity from an event.
pub fn resolve(event: &WorkflowEvent) -> Result<RepoContext> {
    let repository = event
        .payload
        .repository
        .as_ref()
        .ok_or(LifecycleError::MissingRepository)?;

    let pull_request = event.payload.pull_request.as_ref();

    Ok(RepoContext {
        owner: repository.owner.login().to_string(),
        name: repository.name.clone(),
        sha: pull_request
            .map(|pr| pr.head.sha.clone())
            .unwrap_or_else(|| event.sha.clone()),
        pull_request: pull_request.map(|pr| PullRequest {
            id: pr.id,
            number: pr.number,
            merged: pr.merged.unwrap_or(false),
        }),
        default_branch: repository
            .master_branch
            .clone()
            .or_else(|| repository.default_branch.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PR_PAYLOAD: &str = r#"{
        "action": "opened",
        "repository": {
            "name": "fleet-app",
            "owner": { "login": "acme" },
            "default_branch": "main"
        },
        "pull_request": {
            "id": 810938017,
            "number": 44,
            "merged": false,
            "head": { "sha": "4ea7a6a7e47d0e1a8c8b0d1e8a7e2f1a3b4c5d6e" }
        }
    }"#;

    #[test]
    fn resolves_pull_request_identity() {
        let event =
            WorkflowEvent::from_json("pull_request", "refs/pull/44/merge", "merge-sha", PR_PAYLOAD)
                .unwrap();
        let repo = resolve(&event).unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "fleet-app");
        assert_eq!(repo.slug(), "acme/fleet-app");
        assert_eq!(repo.sha, "4ea7a6a7e47d0e1a8c8b0d1e8a7e2f1a3b4c5d6e");
        assert_eq!(
            repo.pull_request,
            Some(PullRequest {
                id: 810938017,
                number: 44,
                merged: false
            })
        );
        assert_eq!(repo.default_branch.as_deref(), Some("main"));
    }

    #[test]
    fn push_uses_event_sha() {
        let payload = r#"{"repository":{"name":"fleet-app","owner":"acme","master_branch":"master"}}"#;
        let event =
            WorkflowEvent::from_json("push", "refs/heads/master", "fba0317", payload).unwrap();
        let repo = resolve(&event).unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.sha, "fba0317");
        assert!(repo.pull_request.is_none());
        assert_eq!(repo.default_branch.as_deref(), Some("master"));
    }

    #[test]
    fn missing_repository_is_error() {
        let event = WorkflowEvent::from_json("push", "refs/heads/master", "abc", "{}").unwrap();
        let err = resolve(&event).unwrap_err();
        assert!(matches!(err, LifecycleError::MissingRepository));
        assert_eq!(err.to_string(), "Workflow payload was missing repository object");
    }

    #[test]
    fn tag_ref_name() {
        let event = WorkflowEvent::new("push", "refs/tags/v1.2.0", "abc", EventPayload::default());
        assert_eq!(event.tag_name(), Some("v1.2.0"));
        let event = WorkflowEvent::new("push", "refs/heads/main", "abc", EventPayload::default());
        assert_eq!(event.tag_name(), None);
    }

    #[test]
    fn from_file_reads_event_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, PR_PAYLOAD).unwrap();
        let event = WorkflowEvent::from_file("pull_request", "refs/pull/44/merge", "x", &path)
            .unwrap();
        assert!(event.is_pull_request());
        assert!(!event.is_closed());
    }
}
