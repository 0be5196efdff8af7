//! Run configuration.

use std::path::PathBuf;
use std::time::Duration;

use release_state::MatchPolicy;
use serde::{Deserialize, Serialize};

/// Bounds for the versioning-bot branch wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Polls before giving up. Always at least one.
    pub max_attempts: u32,
    /// Pause between polls.
    pub interval: Duration,
    /// Case-insensitive substring identifying the bot's check run.
    pub marker: String,
}

impl Default for WaitConfig {
    fn default() -> Self {
        // 150 polls, 4 seconds apart: ten minutes.
        Self {
            max_attempts: 150,
            interval: Duration::from_secs(4),
            marker: "versionbot".to_string(),
        }
    }
}

/// What the lifecycle engine needs to know about this deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Fleet slug (`org/fleet`) releases are built for.
    pub fleet: String,
    /// Source directory handed to the build.
    pub source: PathBuf,
    /// Target branch override; falls back to the payload's default branch.
    pub default_branch: Option<String>,
    /// Reuse an existing release for the same identity instead of rebuilding.
    pub cache: bool,
    /// Wait for and check out the versioning-bot branch before PR builds.
    pub versionbot: bool,
    /// Create a git tag named after the version of final releases.
    pub create_tag: bool,
    /// Let the builder reuse image layers. `false` passes `--nocache`.
    pub layer_cache: bool,
    pub multi_dockerignore: bool,
    pub match_policy: MatchPolicy,
    pub wait: WaitConfig,
}

impl DeployConfig {
    pub fn new(fleet: impl Into<String>) -> Self {
        Self {
            fleet: fleet.into(),
            source: PathBuf::from("."),
            default_branch: None,
            cache: true,
            versionbot: false,
            create_tag: false,
            layer_cache: true,
            multi_dockerignore: false,
            match_policy: MatchPolicy::Strict,
            wait: WaitConfig::default(),
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = Some(branch.into());
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_versionbot(mut self, versionbot: bool) -> Self {
        self.versionbot = versionbot;
        self
    }

    pub fn with_create_tag(mut self, create_tag: bool) -> Self {
        self.create_tag = create_tag;
        self
    }

    pub fn with_layer_cache(mut self, layer_cache: bool) -> Self {
        self.layer_cache = layer_cache;
        self
    }

    pub fn with_multi_dockerignore(mut self, multi_dockerignore: bool) -> Self {
        self.multi_dockerignore = multi_dockerignore;
        self
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }
}
