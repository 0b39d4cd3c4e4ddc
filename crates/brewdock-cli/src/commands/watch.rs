//! `bdk watch` — Build the stack and supervise it until quit.

use std::time::Instant;

use brewdock_common::config::BrewdockConfig;
use brewdock_runtime::supervisor::Supervisor;
use clap::Args;
use tokio::sync::mpsc;

use super::DefinitionArgs;
use crate::{input, output, watcher};

/// Capacity of the control channel shared by the watcher and stdin.
const CONTROL_CHANNEL_CAPACITY: usize = 32;

/// Arguments for the `watch` command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Definition location.
    #[command(flatten)]
    pub definition: DefinitionArgs,

    /// Write the decoded definition into the context directory on the initial build.
    #[arg(short, long)]
    pub dump: bool,
}

/// Executes the `watch` command.
///
/// # Errors
///
/// Returns an error if the initial build, a reload, or the final teardown
/// fails.
pub async fn execute(args: WatchArgs, config: BrewdockConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    output::print_header();

    let path = args.definition.path();
    let definition = args.definition.load()?;
    let builder = super::docker_builder(config)?.with_dump(args.dump);
    let cancel = super::ctrl_c_token()?;

    let stack = match builder.build(&definition, &cancel).await {
        Ok(stack) => stack,
        Err(failure) => {
            output::print_failure("Build failed, tearing down what was created");
            return Err(failure.cleanup().await.into());
        }
    };
    output::print_stack(&stack, started);

    let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let _watch = watcher::watch_file(&path, tx.clone(), cancel.clone())?;
    input::spawn(tx, cancel.clone());
    output::print_controls(&path);

    let supervisor = Supervisor::new(builder, &path).with_printer(output::print_snapshot);
    supervisor.run(stack, rx, cancel).await?;

    output::print_done("Stack removed.");
    Ok(())
}
