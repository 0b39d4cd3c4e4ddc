//! Build pipeline: turns an [`EnvironmentDefinition`] into a running [`Stack`].
//!
//! Dependencies are created strictly in declaration order. Each one is
//! created only after the previous one passed its wait strategy, since its
//! config may read the previous one's live network identity.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use brewdock_common::config::BrewdockConfig;
use brewdock_common::constants::{DEFAULT_FILE_MODE, normalize_port};
use brewdock_common::error::{BrewdockError, Result};
use brewdock_compose::definition::{Dependency, EnvironmentDefinition, FileSource};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::resolver;
use crate::runtime::{ContainerFile, ContainerRequest, ContainerRuntime, ImageBuild};
use crate::stack::{Stack, StackComponent};

/// A build that stopped before every dependency was running.
///
/// `partial` holds whatever was created before the failure, so the caller
/// can tear it down. It is `None` only when the network itself could not
/// be created.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BuildFailure {
    /// Stack built so far.
    pub partial: Option<Stack>,
    /// What went wrong.
    #[source]
    pub error: BrewdockError,
}

impl BuildFailure {
    /// Splits the failure into the partial stack and the error.
    #[must_use]
    pub fn into_parts(self) -> (Option<Stack>, BrewdockError) {
        (self.partial, self.error)
    }

    /// Tears down the partial stack, if any, and returns the build error.
    ///
    /// A teardown failure is logged; the build error is what gets returned.
    pub async fn cleanup(self) -> BrewdockError {
        let (partial, error) = self.into_parts();
        if let Some(mut stack) = partial {
            if let Err(e) = stack.teardown().await {
                tracing::error!(error = %e, "failed to tear down partial stack");
            }
        }
        error
    }
}

/// Scratch directory removed when the build step finishes.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: &Path) -> Result<Self> {
        std::fs::create_dir(path).map_err(|e| BrewdockError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "scratch directory created");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// Creates stacks on a container runtime.
pub struct StackBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    config: BrewdockConfig,
    dump: bool,
}

impl StackBuilder {
    /// Creates a builder for `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: BrewdockConfig) -> Self {
        Self {
            runtime,
            config,
            dump: false,
        }
    }

    /// Writes the decoded definition into the context directory on each build.
    #[must_use]
    pub const fn with_dump(mut self, dump: bool) -> Self {
        self.dump = dump;
        self
    }

    /// Tunables used by this builder.
    #[must_use]
    pub const fn config(&self) -> &BrewdockConfig {
        &self.config
    }

    /// Builds a stack from `definition`.
    ///
    /// Creates the network and the scratch directory, then creates every
    /// dependency in order. `cancel` is checked before each dependency; an
    /// in-flight runtime call always completes first. Components created
    /// before a failure are left running and handed back in
    /// [`BuildFailure::partial`].
    ///
    /// # Errors
    ///
    /// Returns a [`BuildFailure`] on the first failing step.
    pub async fn build(
        &self,
        definition: &EnvironmentDefinition,
        cancel: &CancellationToken,
    ) -> std::result::Result<Stack, BuildFailure> {
        tracing::info!(
            context = %definition.context.display(),
            dependencies = definition.dependencies.len(),
            "building stack"
        );
        let network = self
            .runtime
            .create_network()
            .await
            .map_err(|error| BuildFailure {
                partial: None,
                error,
            })?;
        tracing::info!(network = %network, "network created");

        let mut stack = Stack::new(
            network,
            definition.context.clone(),
            Arc::clone(&self.runtime),
            self.config.clone(),
        );

        let scratch = match ScratchDir::create(stack.scratch_dir()) {
            Ok(scratch) => scratch,
            Err(error) => {
                return Err(BuildFailure {
                    partial: Some(stack),
                    error,
                });
            }
        };

        if self.dump {
            self.dump_definition(definition);
        }

        let result = self.build_dependencies(&mut stack, definition, cancel).await;
        drop(scratch);

        match result {
            Ok(()) => {
                tracing::info!(components = stack.components().len(), "stack ready");
                Ok(stack)
            }
            Err(error) => {
                tracing::error!(error = %error, "stack build failed");
                Err(BuildFailure {
                    partial: Some(stack),
                    error,
                })
            }
        }
    }

    async fn build_dependencies(
        &self,
        stack: &mut Stack,
        definition: &EnvironmentDefinition,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for dependency in &definition.dependencies {
            if cancel.is_cancelled() {
                return Err(BrewdockError::Cancelled);
            }
            self.build_dependency(stack, dependency)
                .await
                .map_err(|e| e.in_dependency(dependency.display_name()))?;
        }
        Ok(())
    }

    async fn build_dependency(&self, stack: &mut Stack, dependency: &Dependency) -> Result<()> {
        let name = dependency.display_name();
        let request = self.request_for(stack, dependency).await?;

        tracing::info!(dependency = %name, image = %request.image, "creating container");
        let snapshot = self.runtime.create_and_start(&request).await?;
        tracing::info!(dependency = %name, container = %snapshot.id, "container ready");

        let mut mapped_ports = BTreeMap::new();
        for port in &request.exposed_ports {
            let host_port = match self.runtime.mapped_port(&snapshot.id, port).await {
                Ok(found) => found.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(dependency = %name, port = %port, error = %e, "no host port mapped");
                    String::new()
                }
            };
            let _ = mapped_ports.insert(port.clone(), host_port);
        }

        let component =
            StackComponent::from_snapshot(snapshot, dependency, stack.network(), mapped_ports);
        stack.push_component(component);
        Ok(())
    }

    async fn request_for(&self, stack: &Stack, dependency: &Dependency) -> Result<ContainerRequest> {
        let mut files: Vec<ContainerFile> =
            resolver::resolve(stack, dependency.display_name(), &dependency.replace_config)
                .await?
                .into_iter()
                .map(|resolved| ContainerFile {
                    host_path: resolved.host_file,
                    container_path: resolved.target_path,
                    mode: DEFAULT_FILE_MODE,
                })
                .collect();

        for file in &dependency.files {
            let host_path = match file.source()? {
                FileSource::Inline(content) => write_inline(stack.scratch_dir(), &file.target_path, content)?,
                FileSource::Host(path) => stack.work_dir().join(path),
            };
            files.push(ContainerFile {
                host_path,
                container_path: file.target_path.clone(),
                mode: file.mode,
            });
        }

        let build = dependency.build.as_ref().map(|spec| ImageBuild {
            context: stack.work_dir().to_path_buf(),
            dockerfile: spec.dockerfile.clone(),
            repo: dependency.image.clone(),
            tag: dependency.version.clone(),
            build_args: spec.build_args.clone(),
            build_log: spec.build_log,
        });

        Ok(ContainerRequest {
            name: dependency.name.clone(),
            image: dependency.image_ref(),
            env: dependency.env.clone(),
            network: stack.network().clone(),
            aliases: dependency.alias.iter().cloned().collect(),
            exposed_ports: dependency.expose_ports.iter().map(|p| normalize_port(p)).collect(),
            wait_for: dependency.wait_for.clone(),
            build,
            files,
        })
    }

    fn dump_definition(&self, definition: &EnvironmentDefinition) {
        let path = definition.context.join(&self.config.dump_file_name);
        let written = definition.to_yaml().and_then(|yaml| {
            std::fs::write(&path, yaml).map_err(|e| BrewdockError::Io {
                path: path.clone(),
                source: e,
            })
        });
        match written {
            Ok(()) => tracing::info!(path = %path.display(), "definition dumped"),
            Err(e) => tracing::warn!(error = %e, "failed to dump definition"),
        }
    }
}

fn write_inline(scratch_dir: &Path, target_path: &str, content: &str) -> Result<PathBuf> {
    let file_name = Path::new(target_path)
        .file_name()
        .ok_or_else(|| BrewdockError::Config {
            message: format!("file target \"{target_path}\" has no file name"),
        })?;
    let path = scratch_dir.join(file_name);
    std::fs::write(&path, content).map_err(|e| BrewdockError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use brewdock_compose::definition::{
        ConfigReplacement, DerivedValueRef, FileInjection, Replacement, ReplacementValue,
    };

    use super::*;
    use crate::memory::{Fault, MemoryRuntime, RuntimeEvent};

    fn dependency(name: &str) -> Dependency {
        Dependency {
            image: "redis".into(),
            version: "7".into(),
            name: Some(name.into()),
            ..Dependency::default()
        }
    }

    fn definition(dir: &Path, deps: Vec<Dependency>) -> EnvironmentDefinition {
        EnvironmentDefinition {
            context: dir.to_path_buf(),
            dependencies: deps,
        }
    }

    fn builder(runtime: &Arc<MemoryRuntime>) -> StackBuilder {
        let runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        StackBuilder::new(runtime, BrewdockConfig::default())
    }

    #[tokio::test]
    async fn builds_in_declaration_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(MemoryRuntime::new());
        let def = definition(dir.path(), vec![dependency("a"), dependency("b"), dependency("c")]);

        let mut stack = builder(&runtime)
            .build(&def, &CancellationToken::new())
            .await
            .expect("build");
        let names: Vec<&str> = stack.components().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(!dir.path().join("brewdock_temp").exists());
        stack.teardown().await.expect("teardown");
    }

    #[tokio::test]
    async fn existing_scratch_directory_fails_the_build() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("brewdock_temp")).expect("scratch");
        let runtime = Arc::new(MemoryRuntime::new());
        let def = definition(dir.path(), vec![dependency("a")]);

        let failure = builder(&runtime)
            .build(&def, &CancellationToken::new())
            .await
            .expect_err("scratch exists");
        assert!(matches!(failure.error, BrewdockError::Io { .. }));
        assert_eq!(runtime.container_count(), 0);
        let _ = failure.cleanup().await;
        assert!(runtime.networks().is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_earlier_components_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.inject(Fault::Wait("b".into()));
        let def = definition(dir.path(), vec![dependency("a"), dependency("b"), dependency("c")]);

        let failure = builder(&runtime)
            .build(&def, &CancellationToken::new())
            .await
            .expect_err("wait fails");
        assert!(failure.error.to_string().starts_with("dependency \"b\""));
        let (partial, _) = failure.into_parts();
        let mut partial = partial.expect("partial stack");
        assert_eq!(partial.components().len(), 1);
        assert_eq!(runtime.container_count(), 1);
        assert!(!runtime.events().contains(&RuntimeEvent::Created("c".into())));
        assert!(!dir.path().join("brewdock_temp").exists());
        partial.teardown().await.expect("teardown");
    }

    #[tokio::test]
    async fn cancelled_build_stops_before_next_dependency() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(MemoryRuntime::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let def = definition(dir.path(), vec![dependency("a")]);

        let failure = builder(&runtime).build(&def, &cancel).await.expect_err("cancelled");
        assert!(matches!(failure.error, BrewdockError::Cancelled));
        assert_eq!(runtime.container_count(), 0);
        let _ = failure.cleanup().await;
    }

    #[tokio::test]
    async fn inline_files_and_ports_are_passed_to_the_runtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(MemoryRuntime::new());
        let mut dep = dependency("web");
        let _ = dep.expose_ports.insert("8080".into());
        dep.files.push(FileInjection {
            target_path: "/etc/web/motd".into(),
            mode: 0o600,
            content: Some("hello".into()),
            host_file_path: None,
        });
        let def = definition(dir.path(), vec![dep]);

        let mut stack = builder(&runtime)
            .build(&def, &CancellationToken::new())
            .await
            .expect("build");
        let web = stack.get_component("web").expect("web");
        assert!(!web.mapped_ports["8080/tcp"].is_empty());
        assert_eq!(runtime.injected_file("web", "/etc/web/motd").as_deref(), Some("hello"));
        stack.teardown().await.expect("teardown");
    }

    #[tokio::test]
    async fn dump_writes_definition_into_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(MemoryRuntime::new());
        let def = definition(dir.path(), vec![dependency("a")]);

        let mut stack = builder(&runtime)
            .with_dump(true)
            .build(&def, &CancellationToken::new())
            .await
            .expect("build");
        let dumped = std::fs::read_to_string(dir.path().join("brewdock_config.yaml")).expect("dump");
        assert!(dumped.contains("image: redis"));
        stack.teardown().await.expect("teardown");
    }

    #[tokio::test]
    async fn network_failure_leaves_nothing_to_clean_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.inject(Fault::CreateNetwork);
        let def = definition(dir.path(), vec![dependency("a")]);

        let failure = builder(&runtime)
            .build(&def, &CancellationToken::new())
            .await
            .expect_err("network fails");
        assert!(failure.partial.is_none());
        assert!(matches!(failure.error, BrewdockError::Runtime { .. }));
        assert_eq!(runtime.container_count(), 0);
        assert!(!dir.path().join("brewdock_temp").exists());
    }

    #[tokio::test]
    async fn failed_sibling_inspect_is_reported_for_the_consumer() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("app.yaml"), "upstream:\n  host: localhost\n").expect("write");
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.inject(Fault::Inspect("db".into()));
        let mut app = dependency("app");
        app.replace_config.push(ConfigReplacement {
            config_origin_path: "app.yaml".into(),
            target_path: "/etc/app/app.yaml".into(),
            replacements: vec![Replacement {
                key: "upstream.host".into(),
                value: ReplacementValue::Derived(DerivedValueRef {
                    from_container: "db".into(),
                    property_path: "$.Id".into(),
                }),
            }],
        });
        let def = definition(dir.path(), vec![dependency("db"), app]);

        let failure = builder(&runtime)
            .build(&def, &CancellationToken::new())
            .await
            .expect_err("inspect fails");
        assert!(failure.error.to_string().starts_with("dependency \"app\""), "got: {}", failure.error);
        assert!(matches!(failure.error.root(), BrewdockError::Runtime { .. }));
        assert!(!runtime.events().contains(&RuntimeEvent::Created("app".into())));
        let (partial, _) = failure.into_parts();
        let mut partial = partial.expect("partial stack");
        assert_eq!(partial.components().len(), 1);
        partial.teardown().await.expect("teardown");
    }
}
