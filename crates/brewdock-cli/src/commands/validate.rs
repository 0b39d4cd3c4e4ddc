//! `bdk validate` — Check a definition and show the build plan.

use brewdock_compose::definition::ReplacementValue;
use clap::Args;

use super::DefinitionArgs;

/// Arguments for the `validate` command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Definition location.
    #[command(flatten)]
    pub definition: DefinitionArgs,
}

/// Executes the `validate` command.
///
/// # Errors
///
/// Returns an error if the definition cannot be decoded or is invalid.
pub fn execute(args: &ValidateArgs) -> anyhow::Result<()> {
    let definition = args.definition.load()?;

    println!("Build plan for: {}", args.definition.path().display());
    println!("  context: {}", definition.context.display());
    println!();

    for (idx, dep) in definition.dependencies.iter().enumerate() {
        println!("  {}. {}", idx + 1, dep.display_name());
        println!("       image: {}", dep.image_ref());
        if let Some(alias) = &dep.alias {
            println!("       alias: {alias}");
        }
        if !dep.expose_ports.is_empty() {
            let ports: Vec<&str> = dep.expose_ports.iter().map(String::as_str).collect();
            println!("       ports: {}", ports.join(", "));
        }
        if let Some(wait) = &dep.wait_for {
            println!("       wait:  {}", wait.kind());
        }
        for rule in &dep.replace_config {
            println!(
                "       config: {} -> {}",
                rule.config_origin_path.display(),
                rule.target_path
            );
            for replacement in &rule.replacements {
                match &replacement.value {
                    ReplacementValue::Derived(d) => println!(
                        "         {} <- {} {}",
                        replacement.key, d.from_container, d.property_path
                    ),
                    ReplacementValue::Literal(v) => {
                        println!("         {} = <{}>", replacement.key, v.kind());
                    }
                }
            }
        }
    }

    println!();
    println!(
        "  {} dependency(ies), built in the order above.",
        definition.dependencies.len()
    );
    Ok(())
}
