//! CLI command definitions and dispatch.

pub mod dry_run;
pub mod validate;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use brewdock_common::config::BrewdockConfig;
use brewdock_compose::definition::EnvironmentDefinition;
use brewdock_compose::validator;
use brewdock_runtime::builder::StackBuilder;
use brewdock_runtime::docker::DockerRuntime;
use brewdock_runtime::runtime::ContainerRuntime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

/// brewdock — declarative multi-container dev environments.
#[derive(Parser, Debug)]
#[command(name = "bdk", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Seconds each container gets to stop before it is killed.
    #[arg(long, global = true, env = "BDK_GRACE_SECS")]
    pub grace_secs: Option<u64>,

    /// Seconds to wait between teardown and rebuild on reload.
    #[arg(long, global = true, env = "BDK_RELOAD_DELAY_SECS")]
    pub reload_delay_secs: Option<u64>,

    /// Seconds to wait for removed containers to disappear.
    #[arg(long, global = true, env = "BDK_REMOVAL_TIMEOUT_SECS")]
    pub removal_timeout_secs: Option<u64>,
}

impl Cli {
    /// Builds the tunables from defaults and command-line overrides.
    #[must_use]
    pub fn config(&self) -> BrewdockConfig {
        let mut config = BrewdockConfig::default();
        if let Some(secs) = self.grace_secs {
            config.stop_grace_secs = secs;
        }
        if let Some(secs) = self.reload_delay_secs {
            config.reload_delay_ms = secs.saturating_mul(1_000);
        }
        if let Some(secs) = self.removal_timeout_secs {
            config.removal_timeout_secs = secs;
        }
        config
    }
}

/// Format of log lines written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the stack, then tear it down immediately.
    DryRun(dry_run::DryRunArgs),
    /// Build the stack and keep it running, rebuilding on change.
    Watch(watch::WatchArgs),
    /// Decode and validate a definition without touching the runtime.
    Validate(validate::ValidateArgs),
}

/// Location of the definition file.
#[derive(Args, Debug, Clone)]
pub struct DefinitionArgs {
    /// Directory holding the definition file.
    #[arg(short = 'c', long = "context", default_value = ".")]
    pub context: PathBuf,

    /// Definition file name, relative to the context directory.
    #[arg(short = 'f', long = "file", default_value = "brewdock.yaml")]
    pub file: PathBuf,
}

impl DefinitionArgs {
    /// Full path of the definition file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.context.join(&self.file)
    }

    /// Loads and validates the definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed, or invalid.
    pub fn load(&self) -> anyhow::Result<EnvironmentDefinition> {
        let path = self.path();
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Definition file not found: {}\n\
                 Specify one with: bdk <command> -c <dir> -f <file>",
                path.display()
            ));
        }
        let definition = EnvironmentDefinition::load(&path)?;
        validator::validate(&definition)?;
        Ok(definition)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    match cli.command {
        Command::DryRun(args) => dry_run::execute(args, config).await,
        Command::Watch(args) => watch::execute(args, config).await,
        Command::Validate(args) => validate::execute(&args),
    }
}

/// Connects to Docker and returns a builder on it.
fn docker_builder(config: BrewdockConfig) -> anyhow::Result<StackBuilder> {
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect(config.default_wait_timeout())?);
    Ok(StackBuilder::new(runtime, config))
}

/// Returns a token cancelled on Ctrl+C.
fn ctrl_c_token() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received");
        handler_token.cancel();
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;
    Ok(token)
}
