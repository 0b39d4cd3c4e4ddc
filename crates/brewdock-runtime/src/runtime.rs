//! Container runtime abstraction.
//!
//! The build pipeline and stack teardown only talk to the runtime through
//! [`ContainerRuntime`]. Descriptors are the raw JSON documents returned by
//! an inspect call, shaped like the Docker Engine API.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use brewdock_common::error::{BrewdockError, Result};
use brewdock_common::types::{ContainerId, NetworkName};
use brewdock_compose::wait::WaitStrategy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A host file copied into a container before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFile {
    /// Source on the host.
    pub host_path: PathBuf,
    /// Destination inside the container.
    pub container_path: String,
    /// Unix file mode.
    pub mode: u32,
}

/// Image build performed before the container is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild {
    /// Build context directory.
    pub context: PathBuf,
    /// Dockerfile path relative to the context.
    pub dockerfile: String,
    /// Repository of the produced image.
    pub repo: String,
    /// Tag of the produced image.
    pub tag: String,
    /// Build arguments.
    pub build_args: BTreeMap<String, Option<String>>,
    /// Echo build output.
    pub build_log: bool,
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Explicit container name; the runtime picks one when absent.
    pub name: Option<String>,
    /// Image reference, `image:version`.
    pub image: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Network to join.
    pub network: NetworkName,
    /// Aliases on that network.
    pub aliases: Vec<String>,
    /// Container ports to publish on random host ports.
    pub exposed_ports: Vec<String>,
    /// Readiness check to pass before the call returns.
    pub wait_for: Option<WaitStrategy>,
    /// Build the image first.
    pub build: Option<ImageBuild>,
    /// Files to inject before start.
    pub files: Vec<ContainerFile>,
}

/// One host binding of a container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    /// Host interface.
    pub host_ip: String,
    /// Host port.
    pub host_port: String,
}

/// Runtime state of a started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    /// Runtime identifier.
    pub id: ContainerId,
    /// Resolved name, without a leading `/`.
    pub name: String,
    /// Networks joined, in descriptor order.
    pub networks: Vec<String>,
    /// Aliases per network.
    pub aliases: BTreeMap<String, Vec<String>>,
    /// IP address per network.
    pub addresses: BTreeMap<String, String>,
    /// Container port to host bindings.
    pub ports: BTreeMap<String, Vec<PortBinding>>,
}

/// Selection criteria for [`ContainerRuntime::list`]. Unset fields match all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    /// Match a single container id.
    pub id: Option<ContainerId>,
}

impl ContainerFilter {
    /// Filter matching one container id.
    #[must_use]
    pub fn by_id(id: &ContainerId) -> Self {
        Self {
            id: Some(id.clone()),
        }
    }
}

/// Platform-agnostic container runtime.
///
/// Operations on resources that no longer exist report
/// [`BrewdockError::NotFound`] so callers can treat them as already done.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a private network with a unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be created.
    async fn create_network(&self) -> Result<NetworkName>;

    /// Removes a network.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be removed.
    async fn remove_network(&self, network: &NetworkName) -> Result<()>;

    /// Creates and starts a container, then blocks until its wait strategy
    /// reports ready or times out.
    ///
    /// # Errors
    ///
    /// Returns an error if building, creating, injecting, starting, or
    /// waiting fails.
    async fn create_and_start(&self, request: &ContainerRequest) -> Result<ContainerSnapshot>;

    /// Returns the raw runtime descriptor of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    async fn inspect(&self, id: &ContainerId) -> Result<Value>;

    /// Stops a container, giving it `grace` before it is killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be stopped.
    async fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()>;

    /// Requests removal of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal request is rejected.
    async fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Lists container ids matching a filter, stopped ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerId>>;

    /// Returns the host port bound to a container port, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    async fn mapped_port(&self, id: &ContainerId, port: &str) -> Result<Option<String>>;
}

/// Reads a [`ContainerSnapshot`] out of an inspect descriptor.
///
/// # Errors
///
/// Returns [`BrewdockError::Runtime`] if the descriptor has no `Id`.
pub fn snapshot_from_descriptor(descriptor: &Value) -> Result<ContainerSnapshot> {
    let id = descriptor
        .get("Id")
        .and_then(Value::as_str)
        .ok_or_else(|| BrewdockError::runtime("read descriptor", "container", "missing Id"))?;
    let name = descriptor
        .get("Name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();

    let mut networks = Vec::new();
    let mut aliases = BTreeMap::new();
    let mut addresses = BTreeMap::new();
    if let Some(nets) = descriptor
        .pointer("/NetworkSettings/Networks")
        .and_then(Value::as_object)
    {
        for (net, settings) in nets {
            networks.push(net.clone());
            let list = settings
                .get("Aliases")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default();
            let _ = aliases.insert(net.clone(), list);
            let ip = settings
                .get("IPAddress")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let _ = addresses.insert(net.clone(), ip.to_string());
        }
    }

    Ok(ContainerSnapshot {
        id: ContainerId::new(id),
        name,
        networks,
        aliases,
        addresses,
        ports: ports_from_descriptor(descriptor),
    })
}

/// Reads the `NetworkSettings.Ports` map of a descriptor.
#[must_use]
pub fn ports_from_descriptor(descriptor: &Value) -> BTreeMap<String, Vec<PortBinding>> {
    let Some(ports) = descriptor
        .pointer("/NetworkSettings/Ports")
        .and_then(Value::as_object)
    else {
        return BTreeMap::new();
    };
    ports
        .iter()
        .map(|(port, bindings)| {
            let list = bindings
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|b| PortBinding {
                            host_ip: field(b, "HostIp"),
                            host_port: field(b, "HostPort"),
                        })
                        .collect()
                })
                .unwrap_or_default();
            (port.clone(), list)
        })
        .collect()
}

fn field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
