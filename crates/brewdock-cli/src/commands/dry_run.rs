//! `bdk dry-run` — Build the stack, report it, and tear it down.

use std::time::Instant;

use brewdock_common::config::BrewdockConfig;
use clap::Args;

use super::DefinitionArgs;
use crate::output;

/// Arguments for the `dry-run` command.
#[derive(Args, Debug)]
pub struct DryRunArgs {
    /// Definition location.
    #[command(flatten)]
    pub definition: DefinitionArgs,
}

/// Executes the `dry-run` command.
///
/// # Errors
///
/// Returns an error if the definition is invalid, the build fails, or
/// teardown leaves resources behind.
pub async fn execute(args: DryRunArgs, config: BrewdockConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    output::print_header();

    let definition = args.definition.load()?;
    let builder = super::docker_builder(config)?;
    let cancel = super::ctrl_c_token()?;

    let mut stack = match builder.build(&definition, &cancel).await {
        Ok(stack) => stack,
        Err(failure) => {
            output::print_failure("Build failed, tearing down what was created");
            return Err(failure.cleanup().await.into());
        }
    };
    output::print_stack(&stack, started);

    output::print_step("Tearing down...");
    stack.teardown().await?;
    output::print_done("Stack removed.");
    Ok(())
}
