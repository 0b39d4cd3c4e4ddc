//! Unified error types for the brewdock workspace.
//!
//! Every failure of the build pipeline, the config resolution engine, and
//! stack teardown is reported through [`BrewdockError`], carrying enough
//! context (dependency, rule key, file path) to locate the offending entry.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BrewdockError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A definition or config document could not be decoded.
    #[error("failed to decode {path}: {message}")]
    Decode {
        /// Document that failed to decode.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// A config tree could not be encoded back to its format.
    #[error("failed to encode {path}: {message}")]
    Encode {
        /// Destination of the encoded document.
        path: PathBuf,
        /// Encoder message.
        message: String,
    },

    /// A config file extension is not handled.
    #[error("unsupported config format for {path} (expected .yaml, .yml or .json)")]
    UnsupportedFormat {
        /// Offending config file.
        path: PathBuf,
    },

    /// A dotted key path does not resolve inside the target config tree.
    #[error("cannot resolve key \"{key}\" at segment \"{segment}\": {reason}")]
    PathResolution {
        /// Full dotted key of the replacement.
        key: String,
        /// Segment where the walk stopped.
        segment: String,
        /// Why the segment did not resolve.
        reason: String,
    },

    /// A derived value references a sibling that has not been built yet.
    #[error(
        "dependency \"{dependency}\" references \"{reference}\", which is not declared before it"
    )]
    ForwardReference {
        /// Dependency holding the reference.
        dependency: String,
        /// Name of the referenced sibling.
        reference: String,
    },

    /// A query against a runtime descriptor failed.
    #[error("failed to extract \"{query}\": {reason}")]
    Extraction {
        /// Query path after token substitution.
        query: String,
        /// Why the extraction failed.
        reason: String,
    },

    /// The container runtime rejected an operation.
    #[error("runtime failed to {operation} {target}: {reason}")]
    Runtime {
        /// Operation that failed (e.g. "create container").
        operation: &'static str,
        /// Container, network or image the operation targeted.
        target: String,
        /// Runtime message.
        reason: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Teardown finished with one or more failures.
    #[error("teardown left resources behind: {}", .failures.join("; "))]
    Teardown {
        /// One entry per failed stop, removal, or network removal.
        failures: Vec<String>,
    },

    /// Containers were still listed when the removal deadline expired.
    #[error("containers not removed before deadline: {}", .ids.join(", "))]
    RemovalTimeout {
        /// Container ids still reported by the runtime.
        ids: Vec<String>,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// An error raised while processing a specific dependency.
    #[error("dependency \"{dependency}\": {source}")]
    Dependency {
        /// Display name of the dependency.
        dependency: String,
        /// Underlying error.
        #[source]
        source: Box<BrewdockError>,
    },
}

impl BrewdockError {
    /// Builds a [`BrewdockError::Runtime`] from any displayable cause.
    pub fn runtime(operation: &'static str, target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Runtime {
            operation,
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Attaches the dependency name to an error, unless it already has one.
    #[must_use]
    pub fn in_dependency(self, dependency: impl Into<String>) -> Self {
        match self {
            Self::Dependency { .. } => self,
            other => Self::Dependency {
                dependency: dependency.into(),
                source: Box::new(other),
            },
        }
    }

    /// Returns whether this error means the resource is already gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Dependency { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Returns the innermost error, skipping dependency context.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Dependency { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BrewdockError>;
