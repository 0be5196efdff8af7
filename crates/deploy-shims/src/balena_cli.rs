//! Build-system CLI adapter.
//!
//! Wraps the `balena` CLI for the three calls the lifecycle needs:
//! `login`, `push` (the build executor) and `release finalize`.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use release_state::ReleaseId;
use tracing::{error, info};

use crate::process::{Cancellation, CommandRunner, CommandSpec};
use crate::tags::ReleaseTags;
use crate::{Result, ShimError};

/// Environment variable the CLI reads its API endpoint from.
const ENDPOINT_ENV: &str = "BALENARC_BALENA_URL";

/// Parameters of one `push`.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub fleet: String,
    pub source: PathBuf,
    pub tags: ReleaseTags,
    pub draft: bool,
    pub no_cache: bool,
    pub multi_dockerignore: bool,
}

impl PushRequest {
    /// CLI arguments for this push.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "push".to_string(),
            self.fleet.clone(),
            "--source".to_string(),
            self.source.to_string_lossy().to_string(),
            "--release-tag".to_string(),
        ];
        for (key, value) in self.tags.pairs() {
            args.push(key.to_string());
            args.push(value);
        }
        if self.draft {
            args.push("--draft".to_string());
        }
        if self.no_cache {
            args.push("--nocache".to_string());
        }
        if self.multi_dockerignore {
            args.push("--multi-dockerignore".to_string());
        }
        args
    }
}

/// `balena` CLI client.
#[derive(Debug, Clone)]
pub struct BalenaCli {
    program: String,
    endpoint: String,
    cancel: Cancellation,
}

impl BalenaCli {
    /// Client for the given API endpoint (e.g. `balena-cloud.com`).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            program: "balena".to_string(),
            endpoint: endpoint.into(),
            cancel: Cancellation::new(),
        }
    }

    /// Use a different executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Stop a running `push` when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    fn spec(&self) -> CommandSpec {
        CommandSpec::new(&self.program).env(ENDPOINT_ENV, &self.endpoint)
    }

    /// Authenticate the CLI session with an API token.
    pub async fn login(&self, token: &str) -> Result<()> {
        info!(endpoint = %self.endpoint, "logging in to build CLI");
        let spec = self.spec().args(["login", "--token", token]).sensitive();
        let output = CommandRunner::run(&spec).await?;
        if !output.passed() {
            return Err(ShimError::Unauthenticated(output.stderr.trim().to_string()));
        }
        Ok(())
    }

    /// Build and upload a release; returns its id.
    pub async fn push(&self, request: &PushRequest) -> Result<ReleaseId> {
        let spec = self.spec().args(request.args());
        let output = CommandRunner::run_streaming(&spec, &self.cancel).await?;

        if !output.passed() {
            error!(exit_code = output.exit_code, "build process failed");
            return Err(ShimError::BuildExecution(
                "Build process returned non-0 exit code".to_string(),
            ));
        }

        parse_release_id(&output.stdout).ok_or_else(|| {
            ShimError::BuildExecution(
                "Was unable to find release ID from the build process.".to_string(),
            )
        })
    }

    /// Promote a draft release to final.
    pub async fn finalize(&self, id: ReleaseId) -> Result<()> {
        info!(release_id = %id, "finalizing release");
        let spec = self
            .spec()
            .args(["release", "finalize"])
            .arg(id.to_string());
        let output = CommandRunner::run(&spec).await?;
        if !output.passed() {
            return Err(ShimError::Finalize {
                release_id: id.0,
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Extract the release id from build output.
///
/// The CLI announces the release as `Release: <hash> (id: <n>)`, possibly
/// wrapped in ANSI colour codes.
pub fn parse_release_id(output: &str) -> Option<ReleaseId> {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    static MARKER: OnceLock<Regex> = OnceLock::new();

    let ansi = ANSI
        .get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ansi pattern is valid"));
    let marker = MARKER.get_or_init(|| {
        Regex::new(r"Release:\s+\S+\s+\(id:\s*(\d+)\)").expect("release marker pattern is valid")
    });

    let plain = ansi.replace_all(output, "");
    marker
        .captures_iter(&plain)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
