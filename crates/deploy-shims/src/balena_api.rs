//! Build-system REST client
//!
//! Read-only queries against the build system's API: finding releases by
//! their identity tags and reading a release's derived version.

use release_state::{ReleaseId, StoredRelease};
use serde::Deserialize;
use tracing::{debug, info};

use crate::tags::{ReleaseTags, TAG_PULL_REQUEST_ID};
use crate::{Result, ShimError};

/// OData collection envelope.
#[derive(Debug, Deserialize)]
struct Collection<T> {
    d: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ReleaseRow {
    id: u64,
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct VersionRow {
    raw_version: String,
}

/// Authenticated build-system API client.
pub struct BalenaClient {
    api_url: String,
    token: String,
    http_client: reqwest::Client,
}

impl BalenaClient {
    /// Create a client for `https://api.<endpoint>` and verify the token.
    pub async fn initialize(endpoint: &str, token: &str) -> Result<Self> {
        info!("Initializing SDK for https://api.{}", endpoint);
        let client = Self::with_api_url(format!("https://api.{endpoint}"), token)?;
        client.whoami().await?;
        Ok(client)
    }

    /// Create a client for an explicit API base URL without a network call.
    pub fn with_api_url(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("fleet-deploy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(BalenaClient {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http_client,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn whoami(&self) -> Result<()> {
        let url = format!("{}/actor/v1/whoami", self.api_url);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::UNAUTHORIZED => Err(ShimError::Unauthenticated(
                "build-system token was rejected".to_string(),
            )),
            status => Err(api_error(status, response).await),
        }
    }

    /// Successful releases of `fleet` carrying `tags`, newest first.
    pub async fn releases_by_tags(
        &self,
        fleet: &str,
        tags: &ReleaseTags,
        limit: usize,
    ) -> Result<Vec<StoredRelease>> {
        let filter = release_filter(fleet, tags);
        debug!(%filter, limit, "querying releases by tags");

        let url = format!("{}/v6/release", self.api_url);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("$select", "id,is_final".to_string()),
                ("$filter", filter),
                ("$orderby", "created_at desc".to_string()),
                ("$top", limit.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response.status(), response).await);
        }

        let rows: Collection<ReleaseRow> = response.json().await?;
        Ok(rows
            .d
            .into_iter()
            .map(|row| StoredRelease {
                id: ReleaseId(row.id),
                is_final: row.is_final,
            })
            .collect())
    }

    /// Derived version string of a release.
    pub async fn release_version(&self, id: ReleaseId) -> Result<String> {
        let url = format!("{}/v6/release({})", self.api_url, id);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("$select", "raw_version")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response.status(), response).await);
        }

        let rows: Collection<VersionRow> = response.json().await?;
        rows.d
            .into_iter()
            .next()
            .map(|row| row.raw_version)
            .ok_or_else(|| ShimError::Api {
                status: 404,
                message: format!("release {id} not found"),
            })
    }
}

async fn api_error(status: reqwest::StatusCode, response: reqwest::Response) -> ShimError {
    let message = response.text().await.unwrap_or_default();
    ShimError::Api {
        status: status.as_u16(),
        message: message.trim().to_string(),
    }
}

/// Quote a string literal for an OData filter.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn tag_clause(key: &str, value: &str) -> String {
    format!(
        "release_tag/any(rt:(rt/tag_key eq {}) and (rt/value eq {}))",
        quote(key),
        quote(value)
    )
}

/// OData `$filter` selecting successful releases of `fleet` tagged `tags`.
///
/// A sha-only tag set excludes pull-request scoped releases so that a draft
/// built from a pull request never satisfies a lookup for a direct build.
pub fn release_filter(fleet: &str, tags: &ReleaseTags) -> String {
    let mut clauses = vec![
        format!("belongs_to__application/any(a:a/slug eq {})", quote(fleet)),
        "status eq 'success'".to_string(),
    ];
    clauses.extend(tags.pairs().iter().map(|(k, v)| tag_clause(k, v)));
    if tags.pull_request_id.is_none() {
        clauses.push(format!(
            "not(release_tag/any(rt:rt/tag_key eq {}))",
            quote(TAG_PULL_REQUEST_ID)
        ));
    }
    clauses.join(" and ")
}
