//! Fleet Deploy CLI
//!
//! `fleet-deploy` runs one step of the release lifecycle for the workflow
//! event that triggered it. Inputs come from flags or from the Actions
//! environment (`INPUT_*`, `GITHUB_*`).
//!
//! ## Commands
//!
//! - `run` (default): build, reuse or finalize a release and set outputs
//! - `plan`: print the decision for the event without acting on it

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use deploy_core::{
    Collaborators, DeployConfig, LifecycleEngine, OutputSink, RepoContext, RunOutcome,
    WaitConfig, WorkflowEvent,
};
use deploy_shims::{
    BalenaCli, BalenaClient, Cancellation, CheckRunChannel, GitCli, GitHubClient, ReleaseQuery,
    TagReleaseStore,
};
use release_state::{MatchPolicy, ReleaseStore, StatusBlobStore};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "fleet-deploy")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, reuse and finalize fleet releases from CI events", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    inputs: Inputs,

    #[command(flatten)]
    event: EventContext,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq, Debug)]
enum Commands {
    /// Resolve, decide and execute the lifecycle step
    Run,
    /// Print the decision for the event as JSON and exit
    Plan,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
enum StoreKind {
    /// Query the build system for releases by tag
    Tags,
    /// Keep bindings in the current job's check-run output
    CheckRun,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
enum Policy {
    Strict,
    MostRecent,
}

impl From<Policy> for MatchPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Strict => MatchPolicy::Strict,
            Policy::MostRecent => MatchPolicy::MostRecent,
        }
    }
}

/// Deployment inputs.
#[derive(Args, Debug)]
struct Inputs {
    /// Fleet slug to build releases for (org/fleet)
    #[arg(long, env = "INPUT_FLEET")]
    fleet: String,

    /// Build-system domain
    #[arg(long, env = "INPUT_ENVIRONMENT", default_value = "balena-cloud.com")]
    environment: String,

    /// Build-system API token
    #[arg(long, env = "INPUT_BALENA_TOKEN", hide_env_values = true)]
    balena_token: String,

    /// Source-host API token
    #[arg(long, env = "INPUT_GITHUB_TOKEN", hide_env_values = true)]
    github_token: String,

    /// Directory to build from
    #[arg(long, env = "INPUT_SOURCE", default_value = ".")]
    source: PathBuf,

    /// Branch direct pushes must target (default: the repository's)
    #[arg(long, env = "INPUT_DEFAULT_BRANCH")]
    default_branch: Option<String>,

    /// Reuse a matching release instead of rebuilding
    #[arg(long, env = "INPUT_CACHE", default_value_t = true, action = ArgAction::Set)]
    cache: bool,

    /// Wait for and build from the versionbot branch on pull requests
    #[arg(long, env = "INPUT_VERSIONBOT", default_value_t = false, action = ArgAction::Set)]
    versionbot: bool,

    /// Tag the commit with the version of final releases
    #[arg(long, env = "INPUT_CREATE_TAG", default_value_t = false, action = ArgAction::Set)]
    create_tag: bool,

    /// Let the builder reuse image layers
    #[arg(long, env = "INPUT_LAYER_CACHE", default_value_t = true, action = ArgAction::Set)]
    layer_cache: bool,

    /// Honour per-service .dockerignore files
    #[arg(long, env = "INPUT_MULTI_DOCKERIGNORE", default_value_t = false, action = ArgAction::Set)]
    multi_dockerignore: bool,

    /// How to treat several releases matching one commit
    #[arg(long, env = "INPUT_MATCH_POLICY", value_enum, default_value = "strict")]
    match_policy: Policy,

    /// Where release bindings are kept between runs
    #[arg(long, env = "INPUT_STORE", value_enum, default_value = "tags")]
    store: StoreKind,

    /// Versionbot polls before giving up
    #[arg(long, env = "INPUT_VERSIONBOT_MAX_ATTEMPTS", default_value_t = 150)]
    versionbot_max_attempts: u32,

    /// Seconds between versionbot polls
    #[arg(long, env = "INPUT_VERSIONBOT_INTERVAL", default_value_t = 4)]
    versionbot_interval: u64,
}

impl Inputs {
    fn deploy_config(&self) -> DeployConfig {
        let mut config = DeployConfig::new(&self.fleet)
            .with_source(&self.source)
            .with_cache(self.cache)
            .with_versionbot(self.versionbot)
            .with_create_tag(self.create_tag)
            .with_layer_cache(self.layer_cache)
            .with_multi_dockerignore(self.multi_dockerignore)
            .with_match_policy(self.match_policy.into())
            .with_wait(WaitConfig {
                max_attempts: self.versionbot_max_attempts,
                interval: Duration::from_secs(self.versionbot_interval),
                ..WaitConfig::default()
            });
        if let Some(branch) = &self.default_branch {
            config = config.with_default_branch(branch);
        }
        config
    }
}

/// The triggering event as described by the runner.
#[derive(Args, Debug)]
struct EventContext {
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    event_name: String,

    #[arg(long = "ref", env = "GITHUB_REF")]
    git_ref: String,

    #[arg(long, env = "GITHUB_SHA")]
    sha: String,

    /// Path to the event payload JSON
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: PathBuf,

    /// Current job id; names the check run used by `--store check-run`
    #[arg(long, env = "GITHUB_JOB")]
    job: Option<String>,

    #[arg(long, env = "GITHUB_API_URL", default_value = deploy_shims::github::DEFAULT_API_URL)]
    api_url: String,

    /// File step outputs are appended to; stdout when unset
    #[arg(long, env = "GITHUB_OUTPUT")]
    output: Option<PathBuf>,
}

impl EventContext {
    fn load(&self) -> Result<WorkflowEvent> {
        WorkflowEvent::from_file(&self.event_name, &self.git_ref, &self.sha, &self.event_path)
            .with_context(|| format!("Failed to read event payload: {:?}", self.event_path))
    }

    fn outputs(&self) -> Arc<dyn OutputSink> {
        match &self.output {
            Some(path) => Arc::new(deploy_core::GitHubOutputFile::new(path)),
            None => Arc::new(deploy_core::StdoutOutputs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    deploy_core::init_tracing(cli.json, level);

    let cancel = Cancellation::new();
    install_signal_handlers(cancel.clone())?;

    let event = cli.event.load()?;
    let repo = deploy_core::resolve(&event)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&cli, &event, &repo, &cancel).await,
        Commands::Plan => cmd_plan(&cli, &event, &repo, &cancel).await,
    }
}

/// Turn SIGINT/SIGTERM into a cancellation for the whole process lifetime.
fn install_signal_handlers(cancel: Cancellation) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            warn!(signal = name, "received termination signal, cancelling run");
            cancel.cancel(name);
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(signal = "SIGINT", "received termination signal, cancelling run");
            cancel.cancel("SIGINT");
        }
    });

    Ok(())
}

/// Build, reuse or finalize a release for the event
async fn cmd_run(
    cli: &Cli,
    event: &WorkflowEvent,
    repo: &RepoContext,
    cancel: &Cancellation,
) -> Result<()> {
    let engine = connect(cli, repo, cancel, true).await?;

    // A running build sees the cancellation first and stops its child;
    // any other step is dropped where it stands.
    let outcome = tokio::select! {
        biased;
        outcome = engine.run(event) => outcome?,
        reason = cancel.cancelled() => anyhow::bail!("Run cancelled by {reason}"),
    };

    match &outcome {
        RunOutcome::Built {
            release_id,
            version,
            draft,
            reused,
            ..
        } => info!(%release_id, %version, draft, reused, "release ready"),
        RunOutcome::Finalized {
            release_id,
            version,
            ..
        } => info!(%release_id, %version, "release finalized"),
        RunOutcome::Skipped { reason } => info!(%reason, "no release action taken"),
    }
    Ok(())
}

/// Print what `run` would do
async fn cmd_plan(
    cli: &Cli,
    event: &WorkflowEvent,
    repo: &RepoContext,
    cancel: &Cancellation,
) -> Result<()> {
    let engine = connect(cli, repo, cancel, false).await?;
    let decision = tokio::select! {
        decision = engine.decide(event, repo) => decision?,
        reason = cancel.cancelled() => anyhow::bail!("Plan cancelled by {reason}"),
    };
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Initialise clients and wire them into an engine.
async fn connect(
    cli: &Cli,
    repo: &RepoContext,
    cancel: &Cancellation,
    login: bool,
) -> Result<LifecycleEngine> {
    let inputs = &cli.inputs;
    let config = inputs.deploy_config();

    let balena_cli =
        Arc::new(BalenaCli::new(&inputs.environment).with_cancellation(cancel.clone()));
    if login {
        balena_cli
            .login(&inputs.balena_token)
            .await
            .context("Failed to log in to the build CLI")?;
    }
    let balena_api = Arc::new(
        BalenaClient::initialize(&inputs.environment, &inputs.balena_token)
            .await
            .context("Failed to initialize build-system client")?,
    );
    let github = Arc::new(
        GitHubClient::initialize(&cli.event.api_url, &inputs.github_token)
            .context("Failed to initialize source-host client")?,
    );

    let store = open_store(
        inputs.store,
        &config,
        balena_api.clone(),
        github.clone(),
        repo,
        cli.event.job.as_deref(),
    )?;

    let deps = Collaborators {
        store,
        builder: balena_cli.clone(),
        finalizer: balena_cli,
        versions: balena_api,
        refs: github.clone(),
        checks: github,
        source: Arc::new(GitCli::new(&inputs.source)),
        outputs: cli.event.outputs(),
    };
    Ok(LifecycleEngine::new(config, deps))
}

/// Tag-backed store honouring the configured tie-break.
fn tag_store<Q: ReleaseQuery>(config: &DeployConfig, query: Q) -> TagReleaseStore<Q> {
    TagReleaseStore::with_policy(query, config.match_policy)
}

fn open_store(
    kind: StoreKind,
    config: &DeployConfig,
    balena_api: Arc<BalenaClient>,
    github: Arc<GitHubClient>,
    repo: &RepoContext,
    job: Option<&str>,
) -> Result<Arc<dyn ReleaseStore>> {
    match kind {
        StoreKind::Tags => Ok(Arc::new(tag_store(config, balena_api))),
        StoreKind::CheckRun => {
            let job = job.context("GITHUB_JOB is required for the check-run store")?;
            let channel = CheckRunChannel::new(github, &repo.owner, &repo.name, &repo.sha, job);
            Ok(Arc::new(StatusBlobStore::new(channel)))
        }
    }
}
