//! Git operations on the checked-out workspace.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::process::{CommandRunner, CommandSpec};
use crate::{Result, ShimError};

/// System `git` bound to a working tree.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn spec(&self) -> CommandSpec {
        CommandSpec::new("git").current_dir(&self.workdir)
    }

    /// Fetch remote branches.
    pub async fn fetch(&self) -> Result<()> {
        let output = CommandRunner::run(&self.spec().arg("fetch")).await?;
        if !output.passed() {
            debug!(stderr = %output.stderr.trim(), "git fetch failed");
            return Err(ShimError::Git("Failed to fetch remote branches.".to_string()));
        }
        Ok(())
    }

    /// Check out a branch or commit.
    pub async fn checkout(&self, reference: &str) -> Result<()> {
        let output = CommandRunner::run(&self.spec().args(["checkout", reference])).await?;
        if !output.passed() {
            debug!(stderr = %output.stderr.trim(), "git checkout failed");
            return Err(ShimError::Git(format!(
                "Failed to checkout {reference} branch/commit."
            )));
        }
        Ok(())
    }
}
