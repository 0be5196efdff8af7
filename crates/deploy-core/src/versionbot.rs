//! Waiting for the versioning bot.
//!
//! Before building a pull request the bot may need to commit a version bump
//! to `versionbot/pr/<number>`. The waiter polls the commit's check runs
//! until the bot's run has completed, then hands back that branch name.

use std::sync::Arc;

use deploy_shims::{CheckRun, ShimError};
use thiserror::Error;
use tracing::{debug, info};

use crate::collaborators::CheckLookup;
use crate::config::WaitConfig;
use crate::identity::RepoContext;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Cannot find Versionbot branch for non-PR context: {context}")]
    NotPullRequest { context: String },

    #[error("Timed out waiting for {branch} after {attempts} attempts")]
    Timeout { branch: String, attempts: u32 },

    #[error("failed to list check runs: {0}")]
    Lookup(#[source] ShimError),
}

/// Branch the bot pushes its version bump to.
pub fn versionbot_branch(pull_request_number: u64) -> String {
    format!("versionbot/pr/{pull_request_number}")
}

fn bot_finished(runs: &[CheckRun], marker: &str) -> bool {
    let marker = marker.to_lowercase();
    runs.iter()
        .any(|run| run.name.to_lowercase().contains(&marker) && run.status == "completed")
}

/// Bounded poller for the bot's check run.
pub struct BranchWaiter {
    checks: Arc<dyn CheckLookup>,
    config: WaitConfig,
}

impl BranchWaiter {
    pub fn new(checks: Arc<dyn CheckLookup>, config: WaitConfig) -> Self {
        Self { checks, config }
    }

    /// Poll until the bot's check run completes; returns the bot branch.
    ///
    /// A lookup failure ends the wait immediately.
    pub async fn wait(&self, repo: &RepoContext) -> Result<String, WaitError> {
        let pr = repo.pull_request.as_ref().ok_or_else(|| WaitError::NotPullRequest {
            context: serde_json::to_string(repo).unwrap_or_else(|_| repo.slug()),
        })?;
        let branch = versionbot_branch(pr.number);
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            let runs = self
                .checks
                .check_runs(repo)
                .await
                .map_err(WaitError::Lookup)?;

            if bot_finished(&runs, &self.config.marker) {
                info!(%branch, attempt, "Versionbot has finished");
                return Ok(branch);
            }

            if attempt < attempts {
                debug!(
                    %branch,
                    attempt,
                    "Did not find branch. Retrying in {} seconds...",
                    self.config.interval.as_secs()
                );
                tokio::time::sleep(self.config.interval).await;
            }
        }

        Err(WaitError::Timeout { branch, attempts })
    }
}
