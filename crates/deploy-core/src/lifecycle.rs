//! Release lifecycle: classify the event, decide, execute.
//!
//! ```text
//! pull_request opened/synchronize  -> build draft   (tags: sha, pr id)
//! pull_request closed, merged      -> finalize the PR's draft
//! pull_request closed, not merged  -> nothing
//! push to target branch or a tag   -> build final   (tags: sha [, git tag])
//! workflow_dispatch                -> build final   (tags: sha)
//! anything else                    -> error
//! ```
//!
//! Every successful build or finalize emits `version` then `release_id`.

use deploy_shims::{PushRequest, ReleaseTags, ShimError};
use release_state::{ReleaseId, ReleaseKey, StoredRelease};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::collaborators::Collaborators;
use crate::config::DeployConfig;
use crate::error::{LifecycleError, Result};
use crate::identity::{self, RepoContext, WorkflowEvent};
use crate::versionbot::BranchWaiter;

/// Where an event sits in the release lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum LifecycleState {
    ClosedMerged,
    ClosedUnmerged,
    PushToTarget { git_tag: Option<String> },
    PushOther { reference: String },
    PullRequestOpen,
    ManualDispatch,
    Unrecognized { event: String },
}

/// Classify an event. `target` is the branch direct pushes must land on.
pub fn classify(event: &WorkflowEvent, repo: &RepoContext, target: Option<&str>) -> LifecycleState {
    match event.name.as_str() {
        "pull_request" | "pull_request_target" => match &repo.pull_request {
            Some(pr) if event.is_closed() && pr.merged => LifecycleState::ClosedMerged,
            _ if event.is_closed() => LifecycleState::ClosedUnmerged,
            Some(_) => LifecycleState::PullRequestOpen,
            None => LifecycleState::Unrecognized {
                event: event.name.clone(),
            },
        },
        "push" => {
            if let Some(tag) = event.tag_name() {
                return LifecycleState::PushToTarget {
                    git_tag: Some(tag.to_string()),
                };
            }
            match target {
                Some(branch) if event.git_ref == format!("refs/heads/{branch}") => {
                    LifecycleState::PushToTarget { git_tag: None }
                }
                _ => LifecycleState::PushOther {
                    reference: event.git_ref.clone(),
                },
            }
        }
        "workflow_dispatch" => LifecycleState::ManualDispatch,
        other => LifecycleState::Unrecognized {
            event: other.to_string(),
        },
    }
}

/// What to do about an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum Decision {
    FinalizeRelease { release_id: ReleaseId },
    BuildDraft { tags: ReleaseTags },
    BuildFinal { tags: ReleaseTags },
    NoOp { reason: String },
}

/// Result of executing a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    Built {
        release_id: ReleaseId,
        version: String,
        draft: bool,
        reused: bool,
        tag_url: Option<String>,
    },
    Finalized {
        release_id: ReleaseId,
        version: String,
        tag_url: Option<String>,
    },
    Skipped {
        reason: String,
    },
}

/// Drives one event through the lifecycle.
pub struct LifecycleEngine {
    config: DeployConfig,
    deps: Collaborators,
    waiter: BranchWaiter,
}

impl LifecycleEngine {
    pub fn new(config: DeployConfig, deps: Collaborators) -> Self {
        let waiter = BranchWaiter::new(deps.checks.clone(), config.wait.clone());
        Self {
            config,
            deps,
            waiter,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    fn target_branch<'a>(&'a self, repo: &'a RepoContext) -> Option<&'a str> {
        self.config
            .default_branch
            .as_deref()
            .or(repo.default_branch.as_deref())
    }

    /// Decide what to do without side effects beyond reading the store.
    pub async fn decide(&self, event: &WorkflowEvent, repo: &RepoContext) -> Result<Decision> {
        let target = self.target_branch(repo);
        let state = classify(event, repo, target);
        info!(event = %event.name, git_ref = %event.git_ref, ?state, "classified event");

        match state {
            LifecycleState::ClosedMerged => {
                let pr = repo
                    .pull_request
                    .as_ref()
                    .ok_or_else(|| LifecycleError::UnsupportedEvent {
                        event: event.name.clone(),
                    })?;
                let key = ReleaseKey::for_pull_request(&self.config.fleet, &repo.sha, pr.id);
                match self.deps.store.find(&key).await? {
                    None => Err(LifecycleError::ReleaseNotFound { key }),
                    Some(release) if release.is_final => Ok(Decision::NoOp {
                        reason: format!("Release {} is already finalized", release.id),
                    }),
                    Some(release) => Ok(Decision::FinalizeRelease {
                        release_id: release.id,
                    }),
                }
            }
            LifecycleState::ClosedUnmerged => Ok(Decision::NoOp {
                reason: "Pull request was closed without merging".to_string(),
            }),
            LifecycleState::PullRequestOpen => {
                let pr = repo
                    .pull_request
                    .as_ref()
                    .ok_or_else(|| LifecycleError::UnsupportedEvent {
                        event: event.name.clone(),
                    })?;
                Ok(Decision::BuildDraft {
                    tags: ReleaseTags::for_pull_request(&repo.sha, pr.id),
                })
            }
            LifecycleState::PushToTarget { git_tag } => {
                let mut tags = ReleaseTags::for_commit(&repo.sha);
                if let Some(tag) = git_tag {
                    tags = tags.with_git_tag(tag);
                }
                Ok(Decision::BuildFinal { tags })
            }
            LifecycleState::ManualDispatch => Ok(Decision::BuildFinal {
                tags: ReleaseTags::for_commit(&repo.sha),
            }),
            LifecycleState::PushOther { reference } => match target {
                Some(target) => Err(LifecycleError::UnexpectedPushRef {
                    target: target.to_string(),
                    actual: reference,
                }),
                None => Err(LifecycleError::MissingTargetBranch { actual: reference }),
            },
            LifecycleState::Unrecognized { event } => {
                Err(LifecycleError::UnsupportedEvent { event })
            }
        }
    }

    /// Resolve, decide and execute one event.
    pub async fn run(&self, event: &WorkflowEvent) -> Result<RunOutcome> {
        let repo = identity::resolve(event)?;
        info!(
            repository = %repo.slug(),
            sha = %repo.sha,
            fleet = %self.config.fleet,
            "processing event"
        );

        match self.decide(event, &repo).await? {
            Decision::NoOp { reason } => {
                info!(%reason, "nothing to do");
                Ok(RunOutcome::Skipped { reason })
            }
            Decision::FinalizeRelease { release_id } => self.finalize(&repo, release_id).await,
            Decision::BuildDraft { tags } => self.build(&repo, tags, true).await,
            Decision::BuildFinal { tags } => self.build(&repo, tags, false).await,
        }
    }

    async fn finalize(&self, repo: &RepoContext, id: ReleaseId) -> Result<RunOutcome> {
        info!(release_id = %id, "Finalizing release");
        self.deps
            .finalizer
            .finalize(id)
            .await
            .map_err(LifecycleError::Finalize)?;
        self.deps.store.mark_finalized(id).await?;

        let version = self.publish(id).await?;
        let tag_url = self.tag_release(repo, &version).await?;
        Ok(RunOutcome::Finalized {
            release_id: id,
            version,
            tag_url,
        })
    }

    async fn build(&self, repo: &RepoContext, tags: ReleaseTags, draft: bool) -> Result<RunOutcome> {
        if draft && self.config.versionbot {
            let branch = self.waiter.wait(repo).await?;
            self.deps.source.fetch().await.map_err(LifecycleError::Git)?;
            self.deps
                .source
                .checkout(&branch)
                .await
                .map_err(LifecycleError::Git)?;
            info!(%branch, "checked out versionbot branch");
        }

        let key = tags.key(&self.config.fleet);
        let cached = if self.config.cache {
            self.deps.store.find(&key).await?
        } else {
            None
        };

        let (release_id, reused) = match cached {
            Some(release) => {
                info!(release_id = %release.id, key = %key, "Found release matching commit, skipping build");
                (release.id, true)
            }
            None => {
                let id = self.push(tags, draft).await?;
                self.deps
                    .store
                    .record(&key, StoredRelease { id, is_final: !draft })
                    .await?;
                (id, false)
            }
        };

        let version = self.publish(release_id).await?;
        let tag_url = if draft {
            None
        } else {
            self.tag_release(repo, &version).await?
        };

        Ok(RunOutcome::Built {
            release_id,
            version,
            draft,
            reused,
            tag_url,
        })
    }

    async fn push(&self, tags: ReleaseTags, draft: bool) -> Result<ReleaseId> {
        let request = PushRequest {
            fleet: self.config.fleet.clone(),
            source: self.config.source.clone(),
            tags,
            draft,
            no_cache: !self.config.layer_cache,
            multi_dockerignore: self.config.multi_dockerignore,
        };
        info!(fleet = %request.fleet, draft, "Building release");

        match self.deps.builder.push(&request).await {
            Ok(id) => {
                info!(release_id = %id, "Build complete");
                Ok(id)
            }
            Err(e) => {
                error!(error = %e, "build failed");
                Err(LifecycleError::BuildExecution(e))
            }
        }
    }

    /// Look up the release's version and emit `version` then `release_id`.
    async fn publish(&self, id: ReleaseId) -> Result<String> {
        let version = self
            .deps
            .versions
            .release_version(id)
            .await
            .map_err(LifecycleError::Version)?;
        self.deps.outputs.set_output("version", &version)?;
        self.deps.outputs.set_output("release_id", &id.to_string())?;
        Ok(version)
    }

    async fn tag_release(&self, repo: &RepoContext, version: &str) -> Result<Option<String>> {
        if !self.config.create_tag {
            return Ok(None);
        }
        match self.deps.refs.create_tag(repo, version).await {
            Ok(url) => {
                info!(%url, "Git reference created");
                Ok(Some(url))
            }
            Err(ShimError::RefAlreadyExists { reference }) => {
                warn!(%reference, "Git reference already exists");
                Ok(None)
            }
            Err(e) => Err(LifecycleError::RefCreation(e)),
        }
    }
}
