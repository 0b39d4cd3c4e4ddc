//! In-memory container runtime.
//!
//! Deterministic stand-in for a container engine: it allocates IPs and
//! host ports sequentially, reads injected files at creation time, records
//! every call in an event journal, and can be told to fail specific
//! operations. Used by tests and for exercising definitions offline.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use brewdock_common::constants::normalize_port;
use brewdock_common::error::{BrewdockError, Result};
use brewdock_common::types::{ContainerId, NetworkName};
use serde_json::{Map, Value, json};

use crate::runtime::{
    ContainerFilter, ContainerRequest, ContainerRuntime, ContainerSnapshot,
    snapshot_from_descriptor,
};

/// First host port handed out for published container ports.
const FIRST_HOST_PORT: u32 = 40_000;

/// A call observed by the runtime, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A network was created.
    NetworkCreated(String),
    /// A network was removed.
    NetworkRemoved(String),
    /// A container was created and started.
    Created(String),
    /// A container passed its wait strategy.
    Ready(String),
    /// A container descriptor was read.
    Inspected(String),
    /// A container was stopped.
    Stopped(String),
    /// Removal of a container was requested.
    Removed(String),
}

/// An operation the runtime should fail. Container faults match by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail network creation.
    CreateNetwork,
    /// Fail network removal.
    RemoveNetwork,
    /// Fail creation of the named container.
    Create(String),
    /// Fail the wait strategy of the named container.
    Wait(String),
    /// Fail inspection of the named container.
    Inspect(String),
    /// Fail stopping the named container.
    Stop(String),
    /// Reject removal of the named container.
    Remove(String),
    /// Accept removal of the named container but keep listing it forever.
    StuckRemoval(String),
}

#[derive(Debug)]
struct MemoryContainer {
    id: ContainerId,
    name: String,
    image: String,
    env: BTreeMap<String, String>,
    network: String,
    aliases: Vec<String>,
    ip: String,
    ports: BTreeMap<String, String>,
    files: BTreeMap<String, Vec<u8>>,
    running: bool,
    /// Remaining `list` calls that still report the container after removal.
    removal_pending: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryState {
    networks: BTreeSet<String>,
    containers: BTreeMap<ContainerId, MemoryContainer>,
    events: Vec<RuntimeEvent>,
    faults: Vec<Fault>,
    next_seq: u32,
    next_port: u32,
    removal_lag: usize,
}

impl MemoryState {
    fn has_fault(&self, fault: &Fault) -> bool {
        self.faults.contains(fault)
    }

    fn container(&self, id: &ContainerId) -> Result<&MemoryContainer> {
        self.containers
            .get(id)
            .filter(|c| c.removal_pending.is_none())
            .ok_or_else(|| not_found(id))
    }

    fn container_mut(&mut self, id: &ContainerId) -> Result<&mut MemoryContainer> {
        self.containers
            .get_mut(id)
            .filter(|c| c.removal_pending.is_none())
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: &ContainerId) -> BrewdockError {
    BrewdockError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}

fn injected(operation: &'static str, target: &str) -> BrewdockError {
    BrewdockError::runtime(operation, target, "injected fault")
}

/// Runtime that keeps every container and network in process memory.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    state: Mutex<MemoryState>,
}

impl MemoryRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps removed containers listed for `polls` further `list` calls.
    #[must_use]
    pub fn with_removal_lag(self, polls: usize) -> Self {
        self.state().removal_lag = polls;
        self
    }

    /// Makes the runtime fail the given operation from now on.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Clears every injected fault.
    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Returns the journal of observed calls.
    #[must_use]
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.state().events.clone()
    }

    /// Returns the names of live networks.
    #[must_use]
    pub fn networks(&self) -> Vec<String> {
        self.state().networks.iter().cloned().collect()
    }

    /// Returns the number of containers not yet removed.
    #[must_use]
    pub fn container_count(&self) -> usize {
        self.state()
            .containers
            .values()
            .filter(|c| c.removal_pending.is_none())
            .count()
    }

    /// Returns the content injected at `path` into the named container.
    #[must_use]
    pub fn injected_file(&self, container: &str, path: &str) -> Option<String> {
        self.state()
            .containers
            .values()
            .find(|c| c.name == container)
            .and_then(|c| c.files.get(path))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn descriptor(c: &MemoryContainer) -> Value {
    let mut networks = Map::new();
    let _ = networks.insert(
        c.network.clone(),
        json!({ "NetworkID": c.network, "IPAddress": c.ip, "Aliases": c.aliases }),
    );
    let mut ports = Map::new();
    for (port, host_port) in &c.ports {
        let _ = ports.insert(
            port.clone(),
            json!([{ "HostIp": "0.0.0.0", "HostPort": host_port }]),
        );
    }
    let env: Vec<String> = c.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    json!({
        "Id": c.id.as_str(),
        "Name": format!("/{}", c.name),
        "Config": { "Image": c.image, "Env": env },
        "State": {
            "Status": if c.running { "running" } else { "exited" },
            "Running": c.running
        },
        "NetworkSettings": { "Networks": networks, "Ports": ports }
    })
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create_network(&self) -> Result<NetworkName> {
        let mut state = self.state();
        if state.has_fault(&Fault::CreateNetwork) {
            return Err(injected("create network", "network"));
        }
        let name = NetworkName::generate();
        let _ = state.networks.insert(name.as_str().to_string());
        state.events.push(RuntimeEvent::NetworkCreated(name.as_str().to_string()));
        tracing::debug!(network = %name, "memory network created");
        Ok(name)
    }

    async fn remove_network(&self, network: &NetworkName) -> Result<()> {
        let mut state = self.state();
        if state.has_fault(&Fault::RemoveNetwork) {
            return Err(injected("remove network", network.as_str()));
        }
        if !state.networks.contains(network.as_str()) {
            return Err(BrewdockError::NotFound {
                kind: "network",
                id: network.to_string(),
            });
        }
        let attached = state
            .containers
            .values()
            .any(|c| c.network == network.as_str());
        if attached {
            return Err(BrewdockError::runtime(
                "remove network",
                network.as_str(),
                "network has active endpoints",
            ));
        }
        let _ = state.networks.remove(network.as_str());
        state.events.push(RuntimeEvent::NetworkRemoved(network.to_string()));
        Ok(())
    }

    async fn create_and_start(&self, request: &ContainerRequest) -> Result<ContainerSnapshot> {
        let mut state = self.state();
        if !state.networks.contains(request.network.as_str()) {
            return Err(BrewdockError::NotFound {
                kind: "network",
                id: request.network.to_string(),
            });
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let name = request.name.clone().unwrap_or_else(|| {
            let base = request
                .image
                .split(':')
                .next()
                .and_then(|repo| repo.rsplit('/').next())
                .unwrap_or("container");
            format!("{base}-{seq}")
        });
        if state.has_fault(&Fault::Create(name.clone())) {
            return Err(injected("create container", &name));
        }
        if state.containers.values().any(|c| c.name == name) {
            return Err(BrewdockError::runtime(
                "create container",
                &name,
                "name already in use",
            ));
        }

        let mut files = BTreeMap::new();
        for file in &request.files {
            let bytes = std::fs::read(&file.host_path).map_err(|e| BrewdockError::Io {
                path: file.host_path.clone(),
                source: e,
            })?;
            let _ = files.insert(file.container_path.clone(), bytes);
        }

        let mut ports = BTreeMap::new();
        for port in &request.exposed_ports {
            let host_port = FIRST_HOST_PORT + state.next_port;
            state.next_port += 1;
            let _ = ports.insert(normalize_port(port), host_port.to_string());
        }

        let id = ContainerId::new(format!("mem{seq:012}"));
        let container = MemoryContainer {
            id: id.clone(),
            name: name.clone(),
            image: request.image.clone(),
            env: request.env.clone(),
            network: request.network.to_string(),
            aliases: request.aliases.clone(),
            ip: format!("172.28.{}.{}", seq / 250, seq % 250 + 2),
            ports,
            files,
            running: true,
            removal_pending: None,
        };
        let snapshot = snapshot_from_descriptor(&descriptor(&container))?;
        let _ = state.containers.insert(id, container);
        state.events.push(RuntimeEvent::Created(name.clone()));

        if state.has_fault(&Fault::Wait(name.clone())) {
            let _ = state.containers.remove(&snapshot.id);
            return Err(BrewdockError::runtime(
                "wait for",
                &name,
                "wait strategy did not succeed",
            ));
        }
        state.events.push(RuntimeEvent::Ready(name));
        Ok(snapshot)
    }

    async fn inspect(&self, id: &ContainerId) -> Result<Value> {
        let mut state = self.state();
        let container = state.container(id)?;
        let name = container.name.clone();
        if state.has_fault(&Fault::Inspect(name.clone())) {
            return Err(injected("inspect container", &name));
        }
        let doc = descriptor(container);
        state.events.push(RuntimeEvent::Inspected(name));
        Ok(doc)
    }

    async fn stop(&self, id: &ContainerId, _grace: Duration) -> Result<()> {
        let mut state = self.state();
        let name = state.container(id)?.name.clone();
        if state.has_fault(&Fault::Stop(name.clone())) {
            return Err(injected("stop container", &name));
        }
        state.container_mut(id)?.running = false;
        state.events.push(RuntimeEvent::Stopped(name));
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.state();
        let name = state.container(id)?.name.clone();
        if state.has_fault(&Fault::Remove(name.clone())) {
            return Err(injected("remove container", &name));
        }
        let lag = state.removal_lag;
        if lag == 0 && !state.has_fault(&Fault::StuckRemoval(name.clone())) {
            let _ = state.containers.remove(id);
        } else {
            let container = state.container_mut(id)?;
            container.running = false;
            container.removal_pending = Some(lag);
        }
        state.events.push(RuntimeEvent::Removed(name));
        Ok(())
    }

    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerId>> {
        let mut guard = self.state();
        let state = &mut *guard;
        let stuck: BTreeSet<String> = state
            .faults
            .iter()
            .filter_map(|f| match f {
                Fault::StuckRemoval(name) => Some(name.clone()),
                _ => None,
            })
            .collect();

        let mut matched = Vec::new();
        let mut gone = Vec::new();
        for (id, container) in &mut state.containers {
            if filter.id.as_ref().is_some_and(|want| want != id) {
                continue;
            }
            match container.removal_pending {
                Some(_) if stuck.contains(&container.name) => matched.push(id.clone()),
                Some(0) => gone.push(id.clone()),
                Some(remaining) => {
                    container.removal_pending = Some(remaining - 1);
                    matched.push(id.clone());
                }
                None => matched.push(id.clone()),
            }
        }
        for id in gone {
            let _ = state.containers.remove(&id);
        }
        Ok(matched)
    }

    async fn mapped_port(&self, id: &ContainerId, port: &str) -> Result<Option<String>> {
        let state = self.state();
        Ok(state.container(id)?.ports.get(&normalize_port(port)).cloned())
    }
}
