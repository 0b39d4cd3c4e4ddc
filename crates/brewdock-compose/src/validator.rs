//! Static validation of a decoded definition.
//!
//! Catches configuration mistakes before any container is created:
//! missing image coordinates, ambiguous file injections, duplicate names,
//! and derived values that point at siblings which would not be running yet.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use brewdock_common::error::{BrewdockError, Result};

use crate::definition::{Dependency, EnvironmentDefinition, FileSource};
use crate::tree::ConfigFormat;

/// Validates a definition for semantic correctness.
///
/// # Checks performed
///
/// 1. Every dependency declares an image and a version.
/// 2. No two dependencies share an explicit name.
/// 3. Every file injection has exactly one source.
/// 4. Config replacement rules use a supported format and non-empty keys.
/// 5. Files generated into the scratch directory for one dependency have
///    distinct base names.
/// 6. Derived values only reference explicitly named dependencies declared
///    earlier.
///
/// # Errors
///
/// Returns the first failing check, wrapped with the dependency name.
pub fn validate(definition: &EnvironmentDefinition) -> Result<()> {
    tracing::info!(
        dependencies = definition.dependencies.len(),
        "validating environment definition"
    );
    check_duplicate_names(definition)?;

    let positions: HashMap<&str, usize> = definition
        .dependencies
        .iter()
        .enumerate()
        .filter_map(|(idx, dep)| dep.name.as_deref().map(|name| (name, idx)))
        .collect();

    for (idx, dep) in definition.dependencies.iter().enumerate() {
        check_dependency(dep)
            .and_then(|()| check_references(dep, idx, &positions))
            .map_err(|e| e.in_dependency(dep.display_name()))?;
    }
    Ok(())
}

fn check_duplicate_names(definition: &EnvironmentDefinition) -> Result<()> {
    let mut seen = HashSet::new();
    for name in definition.dependencies.iter().filter_map(|d| d.name.as_deref()) {
        if !seen.insert(name) {
            return Err(BrewdockError::Config {
                message: format!("duplicate dependency name: \"{name}\""),
            });
        }
    }
    Ok(())
}

fn check_dependency(dep: &Dependency) -> Result<()> {
    if dep.image.trim().is_empty() || dep.version.trim().is_empty() {
        return Err(BrewdockError::Config {
            message: "image and version are required".into(),
        });
    }

    let mut scratch_names = HashSet::new();
    for file in &dep.files {
        if let FileSource::Inline(_) = file.source()? {
            claim_scratch_name(&mut scratch_names, Path::new(&file.target_path))?;
        }
    }

    for rule in &dep.replace_config {
        let _ = ConfigFormat::from_path(&rule.config_origin_path)?;
        claim_scratch_name(&mut scratch_names, &rule.config_origin_path)?;
        if let Some(empty) = rule.replacements.iter().find(|r| r.key.trim().is_empty()) {
            return Err(BrewdockError::PathResolution {
                key: empty.key.clone(),
                segment: String::new(),
                reason: format!(
                    "empty key in rule for {}",
                    rule.config_origin_path.display()
                ),
            });
        }
    }
    Ok(())
}

fn claim_scratch_name<'a>(seen: &mut HashSet<&'a std::ffi::OsStr>, path: &'a Path) -> Result<()> {
    let name = path.file_name().ok_or_else(|| BrewdockError::Config {
        message: format!("{} has no file name", path.display()),
    })?;
    if seen.insert(name) {
        Ok(())
    } else {
        Err(BrewdockError::Config {
            message: format!(
                "two generated files share the base name \"{}\"",
                name.to_string_lossy()
            ),
        })
    }
}

fn check_references(dep: &Dependency, idx: usize, positions: &HashMap<&str, usize>) -> Result<()> {
    for reference in dep.derived_refs() {
        match positions.get(reference.from_container.as_str()) {
            Some(&target) if target < idx => {}
            Some(_) => {
                return Err(BrewdockError::ForwardReference {
                    dependency: dep.display_name().to_string(),
                    reference: reference.from_container.clone(),
                });
            }
            None => {
                return Err(BrewdockError::NotFound {
                    kind: "dependency",
                    id: reference.from_container.clone(),
                });
            }
        }
    }
    Ok(())
}
