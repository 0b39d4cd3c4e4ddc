//! Environment definition model.
//!
//! An [`EnvironmentDefinition`] is the immutable, decoded form of the
//! environment document: a context directory and an ordered list of
//! [`Dependency`] records. Declaration order is build order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use brewdock_common::constants::DEFAULT_FILE_MODE;
use brewdock_common::error::{BrewdockError, Result};
use serde::{Deserialize, Serialize};

use crate::tree::ConfigValue;
use crate::wait::WaitStrategy;

/// Root of an environment document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDefinition {
    /// Base directory for relative file references.
    #[serde(default)]
    pub context: PathBuf,
    /// Containers to create, in build order.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// One declared container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Image repository.
    pub image: String,
    /// Image tag.
    pub version: String,
    /// Explicit container name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Name under which the container is reachable on the stack network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Container ports to publish on the host, e.g. `5432/tcp`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub expose_ports: BTreeSet<String>,
    /// Build the image from a Dockerfile instead of pulling it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
    /// Readiness check; the container is ready once started when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<WaitStrategy>,
    /// Files copied into the container before it starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileInjection>,
    /// Config files rewritten with literal or derived values before injection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace_config: Vec<ConfigReplacement>,
}

impl Dependency {
    /// Name used in logs and error messages: the explicit name, else the image.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.image)
    }

    /// Full image reference, `image:version`.
    #[must_use]
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }

    /// Iterates over every derived-value reference in this dependency's rules.
    pub fn derived_refs(&self) -> impl Iterator<Item = &DerivedValueRef> {
        self.replace_config
            .iter()
            .flat_map(|rule| rule.replacements.iter())
            .filter_map(|r| match &r.value {
                ReplacementValue::Derived(d) => Some(d),
                ReplacementValue::Literal(_) => None,
            })
    }
}

/// Dockerfile build settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Dockerfile path, relative to the context directory.
    pub dockerfile: String,
    /// Build arguments; a null value leaves the Dockerfile default in place.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, Option<String>>,
    /// Echo the build output.
    #[serde(default)]
    pub build_log: bool,
}

/// A file to place inside the container.
///
/// Exactly one of `content` and `host_file_path` is set; see
/// [`FileInjection::source`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInjection {
    /// Absolute path inside the container.
    pub target_path: String,
    /// Unix file mode.
    #[serde(default = "default_mode")]
    pub mode: u32,
    /// Inline file content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Host file to copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_file_path: Option<PathBuf>,
}

const fn default_mode() -> u32 {
    DEFAULT_FILE_MODE
}

/// Where the bytes of a [`FileInjection`] come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource<'a> {
    /// Inline content written to the scratch directory first.
    Inline(&'a str),
    /// An existing host file.
    Host(&'a Path),
}

impl FileInjection {
    /// Returns the single source of this injection.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::Config`] when both or neither of inline
    /// content and host path are set.
    pub fn source(&self) -> Result<FileSource<'_>> {
        match (&self.content, &self.host_file_path) {
            (Some(content), None) => Ok(FileSource::Inline(content)),
            (None, Some(path)) => Ok(FileSource::Host(path)),
            (Some(_), Some(_)) => Err(BrewdockError::Config {
                message: format!(
                    "file \"{}\" sets both content and hostFilePath",
                    self.target_path
                ),
            }),
            (None, None) => Err(BrewdockError::Config {
                message: format!(
                    "file \"{}\" sets neither content nor hostFilePath",
                    self.target_path
                ),
            }),
        }
    }
}

/// A config file to rewrite before injection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigReplacement {
    /// Origin config file, relative to the context directory.
    pub config_origin_path: PathBuf,
    /// Absolute path of the rewritten file inside the container.
    pub target_path: String,
    /// Replacements applied in order.
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

/// A single key rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replacement {
    /// Dotted key path inside the config tree.
    pub key: String,
    /// New value.
    pub value: ReplacementValue,
}

/// Value written by a [`Replacement`].
///
/// A mapping with exactly `fromContainer` and `propertyName` is a derived
/// reference; anything else is a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplacementValue {
    /// Value read from a sibling's live runtime descriptor.
    Derived(DerivedValueRef),
    /// Literal value.
    Literal(ConfigValue),
}

/// Reference to a value of an already-running sibling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DerivedValueRef {
    /// Resolved name of the sibling component.
    pub from_container: String,
    /// JSONPath query into the sibling's runtime descriptor. May contain
    /// the `{NETWORK_ID}` token.
    #[serde(rename = "propertyName")]
    pub property_path: String,
}

impl EnvironmentDefinition {
    /// Decodes a definition document.
    ///
    /// JSON is chosen for a `.json` path, YAML otherwise. `origin` is only
    /// used for error messages.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::Decode`] on malformed syntax or an unknown
    /// wait strategy discriminator.
    pub fn decode(text: &str, origin: &Path) -> Result<Self> {
        let is_json = origin.extension().is_some_and(|e| e == "json");
        let decoded = if is_json {
            serde_json::from_str(text).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(text).map_err(|e| e.to_string())
        };
        decoded.map_err(|message| BrewdockError::Decode {
            path: origin.to_path_buf(),
            message,
        })
    }

    /// Reads and decodes a definition file.
    ///
    /// A relative (or missing) `context` is resolved against the
    /// directory holding the definition file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading environment definition");
        let text = std::fs::read_to_string(path).map_err(|e| BrewdockError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut definition = Self::decode(&text, path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if definition.context.is_relative() {
            definition.context = base.join(&definition.context);
        }
        tracing::debug!(
            context = %definition.context.display(),
            dependencies = definition.dependencies.len(),
            "definition loaded"
        );
        Ok(definition)
    }

    /// Encodes the definition as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::Encode`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| BrewdockError::Encode {
            path: self.context.clone(),
            message: e.to_string(),
        })
    }
}
