//! External process execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Result, ShimError};

/// An external command to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments, in order.
    pub args: Vec<String>,

    /// Extra environment variables.
    pub envs: Vec<(String, String)>,

    /// Working directory (inherits the caller's when unset).
    pub current_dir: Option<PathBuf>,

    /// Keep arguments out of the logs (tokens on the command line).
    pub sensitive: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            sensitive: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Loggable rendering of the command line.
    pub fn display(&self) -> String {
        if self.sensitive {
            format!("{} <redacted>", self.program)
        } else {
            std::iter::once(self.program.as_str())
                .chain(self.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Cancellation shared between the invocation boundary and running
/// commands.
///
/// The binary owns signal handling and calls [`Cancellation::cancel`];
/// `run_streaming` watches for it and stops its child. Clones share state.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// Reason passed to [`Cancellation::cancel`], if it was called.
    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Resolves with the reason once cancellation is requested.
    pub async fn cancelled(&self) -> String {
        let mut rx = self.tx.subscribe();
        let result = rx
            .wait_for(Option::is_some)
            .await
            .map(|reason| reason.clone().unwrap_or_default());
        match result {
            Ok(reason) => reason,
            // The sender lives in `self`, so this arm is unreachable.
            Err(_) => std::future::pending().await,
        }
    }
}

/// Runs external commands for the shims.
pub struct CommandRunner;

impl CommandRunner {
    /// Run a command to completion and capture its output.
    pub async fn run(spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(command = %spec.display(), "running command");

        let output = spec.command().spawn()?.wait_with_output().await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run a long-lived command, streaming its output into the log.
    ///
    /// stdout lines are logged at INFO, stderr lines at WARN. When `cancel`
    /// fires while the command runs, the child is killed and reaped and
    /// `ShimError::Interrupted` is returned.
    pub async fn run_streaming(spec: &CommandSpec, cancel: &Cancellation) -> Result<CommandOutput> {
        if let Some(reason) = cancel.reason() {
            return Err(ShimError::Interrupted {
                program: spec.program.clone(),
                signal: reason,
            });
        }

        let start = Instant::now();
        info!(command = %spec.display(), "starting command");

        let mut child = spec.command().spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShimError::Io(std::io::Error::other("child stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ShimError::Io(std::io::Error::other("child stderr not captured")))?;

        let stdout_task = collect_lines(stdout, false);
        let stderr_task = collect_lines(stderr, true);

        let status = tokio::select! {
            status = child.wait() => status?,
            reason = cancel.cancelled() => {
                warn!(program = %spec.program, %reason, "run cancelled, stopping child process");
                child.kill().await?;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ShimError::Interrupted {
                    program: spec.program.clone(),
                    signal: reason,
                });
            }
        };

        let stdout = join_lines(stdout_task).await?;
        let stderr = join_lines(stderr_task).await?;

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn collect_lines<R>(reader: R, diagnostic: bool) -> JoinHandle<std::io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut collected = String::new();
        while let Some(line) = lines.next_line().await? {
            if diagnostic {
                warn!("{line}");
            } else {
                info!("{line}");
            }
            collected.push_str(&line);
            collected.push('\n');
        }
        Ok(collected)
    })
}

async fn join_lines(task: JoinHandle<std::io::Result<String>>) -> Result<String> {
    task.await
        .map_err(|e| ShimError::Io(std::io::Error::other(e)))?
        .map_err(ShimError::Io)
}
