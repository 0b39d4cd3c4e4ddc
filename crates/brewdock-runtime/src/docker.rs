//! Docker Engine runtime backed by bollard.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::{EndpointSettings, HostConfig};
use bollard::network::CreateNetworkOptions;
use brewdock_common::constants::LABEL_STACK_NETWORK;
use brewdock_common::error::{BrewdockError, Result};
use brewdock_common::types::{ContainerId, NetworkName};
use futures::StreamExt;
use serde_json::Value;

use crate::runtime::{
    ContainerFile, ContainerFilter, ContainerRequest, ContainerRuntime, ContainerSnapshot,
    ImageBuild, ports_from_descriptor, snapshot_from_descriptor,
};
use crate::wait;

/// Runtime talking to the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    default_wait_timeout: Duration,
}

impl DockerRuntime {
    /// Connects to the daemon using the local defaults (`DOCKER_HOST` or
    /// the platform socket).
    ///
    /// # Errors
    ///
    /// Returns [`BrewdockError::Runtime`] if no daemon can be reached.
    pub fn connect(default_wait_timeout: Duration) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BrewdockError::runtime("connect to", "docker daemon", e))?;
        Ok(Self {
            docker,
            default_wait_timeout,
        })
    }

    async fn ensure_image(&self, request: &ContainerRequest) -> Result<()> {
        if let Some(build) = &request.build {
            return self.build_image(build).await;
        }
        if self.docker.inspect_image(&request.image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image = %request.image, "pulling image");
        let (repo, tag) = request
            .image
            .rsplit_once(':')
            .unwrap_or((request.image.as_str(), "latest"));
        let options = CreateImageOptions {
            from_image: repo,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let info = progress.map_err(|e| BrewdockError::runtime("pull", &request.image, e))?;
            if let Some(status) = info.status {
                tracing::debug!(image = %request.image, status = %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn build_image(&self, build: &ImageBuild) -> Result<()> {
        let image = format!("{}:{}", build.repo, build.tag);
        tracing::info!(image = %image, dockerfile = %build.dockerfile, "building image");

        let context = build.context.clone();
        let archive = tokio::task::spawn_blocking(move || context_archive(&context))
            .await
            .map_err(|e| BrewdockError::runtime("build", &image, e))??;

        let buildargs: HashMap<String, String> = build
            .build_args
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect();
        let options = BuildImageOptions {
            dockerfile: build.dockerfile.clone(),
            t: image.clone(),
            rm: true,
            buildargs,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(archive.into()));
        while let Some(step) = stream.next().await {
            let info = step.map_err(|e| BrewdockError::runtime("build", &image, e))?;
            if let Some(error) = info.error {
                return Err(BrewdockError::runtime("build", &image, error));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if build.build_log && !line.is_empty() {
                    tracing::info!(image = %image, "{line}");
                }
            }
        }
        Ok(())
    }

    async fn create(&self, request: &ContainerRequest) -> Result<String> {
        let env: Vec<String> = request.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let exposed_ports: HashMap<String, HashMap<(), ()>> = request
            .exposed_ports
            .iter()
            .map(|p| (p.clone(), HashMap::new()))
            .collect();
        let endpoints = HashMap::from([(
            request.network.to_string(),
            EndpointSettings {
                aliases: (!request.aliases.is_empty()).then(|| request.aliases.clone()),
                ..Default::default()
            },
        )]);

        let config = Config {
            image: Some(request.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            labels: Some(HashMap::from([(
                LABEL_STACK_NETWORK.to_string(),
                request.network.to_string(),
            )])),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                network_mode: Some(request.network.to_string()),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig {
                endpoints_config: endpoints,
            }),
            ..Default::default()
        };
        let options = request.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| map_error("create container", &request.image, e))?;
        for warning in &response.warnings {
            tracing::warn!(image = %request.image, warning = %warning, "create warning");
        }
        Ok(response.id)
    }

    async fn inject_files(&self, id: &str, files: &[ContainerFile]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let archive = files_archive(files)?;
        let options = UploadToContainerOptions {
            path: "/".to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await
            .map_err(|e| map_error("copy files into", id, e))?;
        tracing::debug!(container = %id, files = files.len(), "files injected");
        Ok(())
    }

    async fn discard(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(id, Some(options)).await {
            tracing::warn!(container = %id, error = %e, "failed to remove unready container");
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self) -> Result<NetworkName> {
        let name = NetworkName::generate();
        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            ..Default::default()
        };
        let _ = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| map_error("create network", name.as_str(), e))?;
        Ok(name)
    }

    async fn remove_network(&self, network: &NetworkName) -> Result<()> {
        self.docker
            .remove_network(network.as_str())
            .await
            .map_err(|e| map_error("remove network", network.as_str(), e))
    }

    async fn create_and_start(&self, request: &ContainerRequest) -> Result<ContainerSnapshot> {
        self.ensure_image(request).await?;
        let id = self.create(request).await?;
        tracing::debug!(container = %id, image = %request.image, "container created");

        if let Err(e) = self.inject_files(&id, &request.files).await {
            self.discard(&id).await;
            return Err(e);
        }
        if let Err(e) = self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(&id).await;
            return Err(map_error("start container", &id, e));
        }

        if let Some(strategy) = &request.wait_for {
            if let Err(e) =
                wait::wait_until_ready(&self.docker, &id, strategy, self.default_wait_timeout).await
            {
                self.discard(&id).await;
                return Err(e);
            }
        }

        let descriptor = self.inspect(&ContainerId::new(id)).await?;
        snapshot_from_descriptor(&descriptor)
    }

    async fn inspect(&self, id: &ContainerId) -> Result<Value> {
        let response = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error("inspect container", id.as_str(), e))?;
        serde_json::to_value(response)
            .map_err(|e| BrewdockError::runtime("inspect container", id.as_str(), e))
    }

    async fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        match self.docker.stop_container(id.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error("stop container", id.as_str(), e)),
        }
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(|e| map_error("remove container", id.as_str(), e))
    }

    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerId>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(id) = &filter.id {
            let _ = filters.insert("id".into(), vec![id.to_string()]);
        }
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_error("list containers", "", e))?;
        Ok(containers
            .into_iter()
            .filter_map(|c| c.id.map(ContainerId::new))
            .collect())
    }

    async fn mapped_port(&self, id: &ContainerId, port: &str) -> Result<Option<String>> {
        published_port(&self.docker, id.as_str(), port).await
    }
}

/// Returns the first host port bound to `port` on a container.
pub(crate) async fn published_port(docker: &Docker, id: &str, port: &str) -> Result<Option<String>> {
    let response = docker
        .inspect_container(id, None::<InspectContainerOptions>)
        .await
        .map_err(|e| map_error("inspect container", id, e))?;
    let descriptor = serde_json::to_value(response)
        .map_err(|e| BrewdockError::runtime("inspect container", id, e))?;
    let key = brewdock_common::constants::normalize_port(port);
    Ok(ports_from_descriptor(&descriptor)
        .remove(&key)
        .and_then(|bindings| bindings.into_iter().map(|b| b.host_port).find(|p| !p.is_empty())))
}

fn map_error(operation: &'static str, target: &str, err: bollard::errors::Error) -> BrewdockError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => BrewdockError::NotFound {
            kind: "docker object",
            id: target.to_string(),
        },
        other => BrewdockError::runtime(operation, target, other),
    }
}

/// Packs the build context directory.
fn context_archive(context: &Path) -> Result<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());
    archive
        .append_dir_all(".", context)
        .map_err(|e| BrewdockError::Io {
            path: context.to_path_buf(),
            source: e,
        })?;
    archive.into_inner().map_err(|e| BrewdockError::Io {
        path: context.to_path_buf(),
        source: e,
    })
}

/// Packs injected files with their container paths, relative to `/`.
fn files_archive(files: &[ContainerFile]) -> Result<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());
    for file in files {
        let data = std::fs::read(&file.host_path).map_err(|e| BrewdockError::Io {
            path: file.host_path.clone(),
            source: e,
        })?;
        let mut header = tar::Header::new_gnu();
        header.set_size(u64::try_from(data.len()).unwrap_or(u64::MAX));
        header.set_mode(file.mode);
        header.set_cksum();
        archive
            .append_data(&mut header, file.container_path.trim_start_matches('/'), data.as_slice())
            .map_err(|e| BrewdockError::Io {
                path: file.host_path.clone(),
                source: e,
            })?;
    }
    archive.into_inner().map_err(|e| BrewdockError::Io {
        path: "/".into(),
        source: e,
    })
}
