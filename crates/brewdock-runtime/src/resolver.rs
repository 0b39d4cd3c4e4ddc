//! Config resolution engine.
//!
//! Rewrites a dependency's config files with literal values and with values
//! read from siblings that are already part of the stack, then writes the
//! results into the stack's scratch directory for injection.

use std::path::PathBuf;

use brewdock_common::error::{BrewdockError, Result};
use brewdock_compose::definition::{ConfigReplacement, DerivedValueRef, ReplacementValue};
use brewdock_compose::tree::{self, ConfigValue};

use crate::extract::{extract, substitute_network};
use crate::stack::Stack;

/// A rewritten config file ready to be copied into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Origin file, as resolved against the work directory.
    pub origin: PathBuf,
    /// Rewritten file inside the scratch directory.
    pub host_file: PathBuf,
    /// Destination inside the container.
    pub target_path: String,
}

/// Resolves every rule of `dependency` against the components already
/// registered on `stack`.
///
/// Rules and their replacements apply in list order. Derived values can
/// only read components built before `dependency`.
///
/// # Errors
///
/// Returns the first failure: an unreadable or unsupported origin file, a
/// key path that does not resolve, a reference to a component that is not
/// registered yet, or a failed descriptor query.
pub async fn resolve(
    stack: &Stack,
    dependency: &str,
    rules: &[ConfigReplacement],
) -> Result<Vec<ResolvedConfig>> {
    let mut resolved = Vec::with_capacity(rules.len());
    for rule in rules {
        resolved.push(resolve_rule(stack, dependency, rule).await?);
    }
    Ok(resolved)
}

async fn resolve_rule(
    stack: &Stack,
    dependency: &str,
    rule: &ConfigReplacement,
) -> Result<ResolvedConfig> {
    let origin = stack.work_dir().join(&rule.config_origin_path);
    let (format, mut config) = tree::load_config_file(&origin)?;

    for replacement in &rule.replacements {
        let value = match &replacement.value {
            ReplacementValue::Literal(value) => value.clone(),
            ReplacementValue::Derived(reference) => derive_value(stack, dependency, reference)
                .await?
                .unwrap_or(ConfigValue::Null),
        };
        tracing::debug!(
            dependency,
            key = %replacement.key,
            kind = value.kind(),
            "replacing config key"
        );
        config.set_path(&replacement.key, value)?;
    }

    let file_name = origin.file_name().ok_or_else(|| BrewdockError::Config {
        message: format!("config origin {} has no file name", origin.display()),
    })?;
    let host_file = stack.scratch_dir().join(file_name);
    tree::write_config_file(&host_file, format, &config)?;
    tracing::info!(
        dependency,
        origin = %origin.display(),
        target = %rule.target_path,
        "config file resolved"
    );

    Ok(ResolvedConfig {
        origin,
        host_file,
        target_path: rule.target_path.clone(),
    })
}

/// Reads the value a derived reference points at.
///
/// The referenced component must already be registered on the stack. Its
/// descriptor is fetched with one inspect call and queried after the
/// `{NETWORK_ID}` token is replaced with its primary network.
///
/// # Errors
///
/// Returns [`BrewdockError::ForwardReference`] if the component is not
/// registered, or a runtime or extraction error.
pub async fn derive_value(
    stack: &Stack,
    dependency: &str,
    reference: &DerivedValueRef,
) -> Result<Option<ConfigValue>> {
    let sibling = stack
        .components()
        .iter()
        .find(|c| c.name == reference.from_container)
        .ok_or_else(|| BrewdockError::ForwardReference {
            dependency: dependency.to_string(),
            reference: reference.from_container.clone(),
        })?;
    let network = sibling
        .primary_network()
        .unwrap_or_else(|| stack.network().as_str());
    let query = substitute_network(&reference.property_path, network);
    let descriptor = stack.runtime().inspect(&sibling.container_id).await?;
    let value = extract(&descriptor, &query)?;
    tracing::debug!(
        dependency,
        sibling = %sibling.name,
        query = %query,
        found = value.is_some(),
        "derived value extracted"
    );
    Ok(value)
}
