//! Live handle to a built environment.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use brewdock_common::config::BrewdockConfig;
use brewdock_common::error::{BrewdockError, Result};
use brewdock_common::types::{ContainerId, NetworkName};
use brewdock_compose::definition::Dependency;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::removal::confirm_removed;
use crate::runtime::{ContainerRuntime, ContainerSnapshot, PortBinding};

/// Materialized result of one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackComponent {
    /// Resolved container name.
    pub name: String,
    /// Runtime container id.
    pub container_id: ContainerId,
    /// Image repository.
    pub image: String,
    /// Image tag.
    pub version: String,
    /// Networks joined, the stack network first.
    pub networks: Vec<String>,
    /// Aliases per network.
    pub network_aliases: BTreeMap<String, Vec<String>>,
    /// Address on the stack network.
    pub internal_ip: String,
    /// Full container port to host bindings map.
    pub ports: BTreeMap<String, Vec<PortBinding>>,
    /// Exposed port to assigned host port, empty when none was allocated.
    pub mapped_ports: BTreeMap<String, String>,
    /// When the component became ready.
    pub created_at: DateTime<Utc>,
}

impl StackComponent {
    /// Builds a component from a runtime snapshot.
    #[must_use]
    pub fn from_snapshot(
        snapshot: ContainerSnapshot,
        dependency: &Dependency,
        network: &NetworkName,
        mapped_ports: BTreeMap<String, String>,
    ) -> Self {
        let mut networks = snapshot.networks;
        networks.sort_by_key(|n| n != network.as_str());
        let internal_ip = snapshot
            .addresses
            .get(network.as_str())
            .cloned()
            .unwrap_or_default();
        Self {
            name: snapshot.name,
            container_id: snapshot.id,
            image: dependency.image.clone(),
            version: dependency.version.clone(),
            networks,
            network_aliases: snapshot.aliases,
            internal_ip,
            ports: snapshot.ports,
            mapped_ports,
            created_at: Utc::now(),
        }
    }

    /// Primary network of the component.
    #[must_use]
    pub fn primary_network(&self) -> Option<&str> {
        self.networks.first().map(String::as_str)
    }
}

/// A network plus the containers created on it, torn down as one unit.
///
/// Components are appended in build order and never reordered or removed
/// individually.
pub struct Stack {
    network: NetworkName,
    components: Vec<StackComponent>,
    work_dir: PathBuf,
    scratch_dir: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    config: BrewdockConfig,
    torn_down: bool,
}

impl Stack {
    pub(crate) fn new(
        network: NetworkName,
        work_dir: PathBuf,
        runtime: Arc<dyn ContainerRuntime>,
        config: BrewdockConfig,
    ) -> Self {
        let scratch_dir = work_dir.join(&config.scratch_dir_name);
        Self {
            network,
            components: Vec::new(),
            work_dir,
            scratch_dir,
            runtime,
            config,
            torn_down: false,
        }
    }

    /// The stack network.
    #[must_use]
    pub const fn network(&self) -> &NetworkName {
        &self.network
    }

    /// Base directory for relative file references.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Directory holding generated config files during a build.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Components in build order.
    #[must_use]
    pub fn components(&self) -> &[StackComponent] {
        &self.components
    }

    /// Runtime the stack was built on.
    #[must_use]
    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Whether [`Stack::teardown`] has completed.
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub(crate) fn push_component(&mut self, component: StackComponent) {
        tracing::debug!(
            component = %component.name,
            index = self.components.len(),
            "component registered"
        );
        self.components.push(component);
    }

    /// Looks up a component by resolved name.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::NotFound`] if no component has that name.
    pub fn get_component(&self, name: &str) -> Result<&StackComponent> {
        self.components
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| BrewdockError::NotFound {
                kind: "component",
                id: name.to_string(),
            })
    }

    /// Serializes the component list as YAML for diagnostics.
    ///
    /// Returns an empty string if serialization fails.
    #[must_use]
    pub fn print(&self) -> String {
        serde_yaml::to_string(&self.components).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize stack");
            String::new()
        })
    }

    /// Stops and removes every component, then removes the network.
    ///
    /// Components are stopped in reverse build order. A failure on one
    /// component does not stop the others from being processed; every
    /// failure is collected. The network is only removed once every
    /// component is confirmed gone. Resources that are already gone count
    /// as removed, so calling this again after a partial failure retries
    /// only what is left.
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::Teardown`] listing every failure.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        tracing::info!(
            network = %self.network,
            components = self.components.len(),
            "tearing down stack"
        );

        let runtime = self.runtime.as_ref();
        let grace = self.config.stop_grace();
        let mut failures = Vec::new();

        for component in self.components.iter().rev() {
            match runtime.stop(&component.container_id, grace).await {
                Ok(()) => tracing::info!(component = %component.name, "stopped"),
                Err(e) if e.is_not_found() => {}
                Err(e) => failures.push(format!("stop {}: {e}", component.name)),
            }
        }

        let mut requested = Vec::new();
        let mut rejected = false;
        for component in self.components.iter().rev() {
            match runtime.remove(&component.container_id).await {
                Ok(()) => requested.push(component.container_id.clone()),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    rejected = true;
                    failures.push(format!("remove {}: {e}", component.name));
                }
            }
        }

        let confirmed = match confirm_removed(runtime, &requested, &self.config.removal_policy()).await {
            Ok(()) => true,
            Err(e) => {
                failures.push(e.to_string());
                false
            }
        };

        if confirmed && !rejected {
            match runtime.remove_network(&self.network).await {
                Ok(()) => tracing::info!(network = %self.network, "network removed"),
                Err(e) if e.is_not_found() => {}
                Err(e) => failures.push(format!("remove network {}: {e}", self.network)),
            }
        } else {
            tracing::warn!(network = %self.network, "network kept, components remain");
        }

        if failures.is_empty() {
            self.torn_down = true;
            Ok(())
        } else {
            for failure in &failures {
                tracing::error!(failure = %failure, "teardown failure");
            }
            Err(BrewdockError::Teardown { failures })
        }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("network", &self.network)
            .field("components", &self.components)
            .field("work_dir", &self.work_dir)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if !self.torn_down && !self.components.is_empty() {
            tracing::warn!(
                network = %self.network,
                components = self.components.len(),
                "stack dropped without teardown, containers left running"
            );
        }
    }
}
