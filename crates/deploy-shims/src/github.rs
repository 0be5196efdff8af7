//! Source-host (GitHub) REST client
//!
//! Covers the three source-host calls the lifecycle makes: listing check
//! runs on a commit, creating a tag reference, and reading/writing the
//! output of the current job's check run (the status side-channel used by
//! `StatusBlobStore`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use release_state::{StatusChannel, StorageResult, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{Result, ShimError};

/// Default public API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Output section of a check run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub text: Option<String>,
}

/// A check run attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub output: CheckRunOutput,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CheckRunList {
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct CreatedRef {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

/// Authenticated GitHub API client.
pub struct GitHubClient {
    api_url: String,
    token: String,
    http_client: reqwest::Client,
}

impl GitHubClient {
    /// Create a client for `api_url` authenticated with `token`.
    pub fn initialize(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("fleet-deploy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(GitHubClient {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http_client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.request_url(method, &format!("{}{}", self.api_url, path))
    }

    fn request_url(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Check runs reported on `sha`, following `Link` pagination.
    pub async fn list_check_runs(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<CheckRun>> {
        let mut url = format!(
            "{}/repos/{owner}/{repo}/commits/{sha}/check-runs?per_page=100",
            self.api_url
        );
        let mut runs = Vec::new();

        loop {
            let response = self
                .request_url(reqwest::Method::GET, &url)
                .send()
                .await
                .map_err(|e| {
                    ShimError::Http(format!(
                        "Failed to fetch check runs for: {owner}/{repo}:{sha}: {e}"
                    ))
                })?;

            if !response.status().is_success() {
                return Err(api_error(response).await);
            }

            let next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_page_url);
            let list: CheckRunList = response.json().await?;
            runs.extend(list.check_runs);

            match next {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!(count = runs.len(), %sha, "fetched check runs");
        Ok(runs)
    }

    /// Create `refs/tags/<tag>` at `sha`; returns the ref's URL.
    pub async fn create_tag(&self, owner: &str, repo: &str, tag: &str, sha: &str) -> Result<String> {
        let reference = format!("refs/tags/{tag}");
        info!(%reference, %sha, "creating git reference");

        let response = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{repo}/git/refs"))
            .json(&json!({ "ref": reference, "sha": sha }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            if is_ref_exists(&body) {
                return Err(ShimError::RefAlreadyExists { reference });
            }
            return Err(ShimError::Api {
                status: 422,
                message: body,
            });
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let created: CreatedRef = response.json().await?;
        Ok(created.url)
    }

    /// Replace the output of check run `check_run_id`.
    pub async fn update_check_run_output(
        &self,
        owner: &str,
        repo: &str,
        check_run_id: u64,
        output: &CheckRunOutput,
    ) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/repos/{owner}/{repo}/check-runs/{check_run_id}"),
            )
            .json(&json!({ "output": output }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}

async fn api_error(response: reqwest::Response) -> ShimError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiMessage>(&body)
        .map(|m| m.message)
        .unwrap_or(body);
    ShimError::Api { status, message }
}

fn is_ref_exists(body: &str) -> bool {
    serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message == "Reference already exists")
        .unwrap_or(false)
}

/// Target of the `rel="next"` entry in a `Link` header.
fn next_page_url(link: &str) -> Option<String> {
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        parts
            .any(|param| param.trim() == r#"rel="next""#)
            .then(|| target.to_string())
    })
}

/// The most recently completed check run named `job`.
pub fn select_job_check<'a>(runs: &'a [CheckRun], job: &str) -> Option<&'a CheckRun> {
    runs.iter()
        .filter(|run| run.name == job)
        .max_by_key(|run| run.completed_at)
}

/// Status side-channel stored in the current job's check-run output text.
pub struct CheckRunChannel {
    client: Arc<GitHubClient>,
    owner: String,
    repo: String,
    sha: String,
    job: String,
}

impl CheckRunChannel {
    pub fn new(
        client: Arc<GitHubClient>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        sha: impl Into<String>,
        job: impl Into<String>,
    ) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
            sha: sha.into(),
            job: job.into(),
        }
    }

    async fn this_check(&self) -> StorageResult<CheckRun> {
        let runs = self
            .client
            .list_check_runs(&self.owner, &self.repo, &self.sha)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        select_job_check(&runs, &self.job).cloned().ok_or_else(|| {
            StoreError::Backend(format!(
                "Unable to find target {} in checks ran on commit {}.",
                self.job, self.sha
            ))
        })
    }
}

#[async_trait]
impl StatusChannel for CheckRunChannel {
    async fn read(&self) -> StorageResult<Option<String>> {
        Ok(self.this_check().await?.output.text)
    }

    async fn write(&self, text: String) -> StorageResult<()> {
        let check = self.this_check().await?;
        let output = CheckRunOutput {
            title: Some("Build release".to_string()),
            summary: Some("Successfully built a release!".to_string()),
            text: Some(text),
        };
        self.client
            .update_check_run_output(&self.owner, &self.repo, check.id, &output)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
