//! Domain primitive types used across the brewdock workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a container assigned by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the private network shared by the components of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkName(String);

impl NetworkName {
    /// Creates a network name from a string value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generates a unique network name with the workspace prefix.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!(
            "{}-{}",
            crate::constants::NETWORK_PREFIX,
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_network_names_are_prefixed_and_unique() {
        let a = NetworkName::generate();
        let b = NetworkName::generate();
        assert!(a.as_str().starts_with("brewdock-"));
        assert_ne!(a, b);
    }

    #[test]
    fn container_id_serializes_as_plain_string() {
        let id = ContainerId::new("abc123");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"abc123\"");
    }
}
