//! End-to-end tests of the build pipeline, config resolution, and teardown.
//!
//! Every scenario runs against the in-memory runtime:
//! 1. Derived values flow from an earlier dependency into a later one's config
//! 2. Ordering: creation order, forward references
//! 3. Resolution is deterministic and matches direct descriptor queries
//! 4. Teardown removes everything, aggregates failures, and is bounded
//! 5. Rebuilding with a renamed dependency

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use brewdock_common::config::BrewdockConfig;
use brewdock_common::error::BrewdockError;
use brewdock_compose::definition::EnvironmentDefinition;
use brewdock_compose::tree::{ConfigValue, load_config_file};
use brewdock_compose::validator::validate;
use brewdock_runtime::builder::StackBuilder;
use brewdock_runtime::extract::{extract, substitute_network};
use brewdock_runtime::memory::{Fault, MemoryRuntime, RuntimeEvent};
use brewdock_runtime::resolver;
use brewdock_runtime::runtime::{ContainerFilter, ContainerRuntime};
use brewdock_runtime::stack::Stack;
use tokio_util::sync::CancellationToken;

const APP_CONFIG: &str = "datasource:\n  host: localhost\n  port: 5432\nlogging:\n  level: info\n";

const ENV: &str = r#"
dependencies:
  - image: postgres
    version: "16"
    name: db
    alias: database
    exposePorts: ["5432"]
    waitFor:
      strategy: port
      waitForStrategy:
        port: "5432"
  - image: acme/app
    version: "1.0"
    name: app
    replaceConfig:
      - config_origin_path: app.yaml
        target_path: /etc/app/app.yaml
        replacements:
          - key: datasource.host
            value:
              fromContainer: db
              propertyName: '$.NetworkSettings.Networks[{NETWORK_ID}].IPAddress'
          - key: logging.level
            value: debug
"#;

fn fast_config() -> BrewdockConfig {
    BrewdockConfig {
        reload_delay_ms: 0,
        removal_initial_backoff_ms: 1,
        removal_max_backoff_ms: 4,
        removal_timeout_secs: 1,
        ..BrewdockConfig::default()
    }
}

fn write_env(dir: &Path, env: &str) -> EnvironmentDefinition {
    std::fs::write(dir.join("app.yaml"), APP_CONFIG).expect("write config");
    let path = dir.join("env.yaml");
    std::fs::write(&path, env).expect("write env");
    let def = EnvironmentDefinition::load(&path).expect("load");
    validate(&def).expect("valid");
    def
}

async fn build(runtime: &Arc<MemoryRuntime>, def: &EnvironmentDefinition) -> Stack {
    let rt: Arc<dyn ContainerRuntime> = runtime.clone();
    StackBuilder::new(rt, fast_config())
        .build(def, &CancellationToken::new())
        .await
        .expect("build")
}

// ── Derived values ───────────────────────────────────────────────────

#[tokio::test]
async fn app_config_receives_db_internal_ip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let def = write_env(dir.path(), ENV);
    let runtime = Arc::new(MemoryRuntime::new());
    let mut stack = build(&runtime, &def).await;

    let db_ip = stack.get_component("db").expect("db").internal_ip.clone();
    assert!(!db_ip.is_empty());

    let injected = runtime
        .injected_file("app", "/etc/app/app.yaml")
        .expect("config injected into app");
    let config: ConfigValue = serde_yaml::from_str(&injected).expect("yaml");
    assert_eq!(config.get_path("datasource.host"), Some(&ConfigValue::String(db_ip)));
    assert_eq!(config.get_path("datasource.port"), Some(&ConfigValue::Integer(5432)));
    assert_eq!(config.get_path("logging.level"), Some(&"debug".into()));

    let events = runtime.events();
    let db_ready = events
        .iter()
        .position(|e| *e == RuntimeEvent::Ready("db".into()))
        .expect("db ready");
    let app_created = events
        .iter()
        .position(|e| *e == RuntimeEvent::Created("app".into()))
        .expect("app created");
    assert!(db_ready < app_created);

    stack.teardown().await.expect("teardown");
}

#[tokio::test]
async fn mapped_ports_and_aliases_are_recorded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let def = write_env(dir.path(), ENV);
    let runtime = Arc::new(MemoryRuntime::new());
    let mut stack = build(&runtime, &def).await;

    let db = stack.get_component("db").expect("db");
    assert_eq!(db.networks[0], stack.network().as_str());
    assert_eq!(db.network_aliases[stack.network().as_str()], vec!["database"]);
    let host_port = &db.mapped_ports["5432/tcp"];
    assert_eq!(&db.ports["5432/tcp"][0].host_port, host_port);

    stack.teardown().await.expect("teardown");
}

// ── Ordering ─────────────────────────────────────────────────────────

#[tokio::test]
async fn components_follow_declaration_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = "dependencies:\n  - {image: a, version: '1', name: one}\n  - {image: b, version: '1', name: two}\n  - {image: c, version: '1', name: three}\n";
    let def = write_env(dir.path(), env);
    let runtime = Arc::new(MemoryRuntime::new());
    let mut stack = build(&runtime, &def).await;

    let names: Vec<&str> = stack.components().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["one", "two", "three"]);
    stack.teardown().await.expect("teardown");
}

#[tokio::test]
async fn reference_to_later_dependency_fails_the_build() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("app.yaml"), APP_CONFIG).expect("write config");
    let env = r#"
dependencies:
  - image: acme/app
    version: "1.0"
    name: app
    replaceConfig:
      - config_origin_path: app.yaml
        target_path: /etc/app/app.yaml
        replacements:
          - key: datasource.host
            value: { fromContainer: db, propertyName: '$.Id' }
  - image: postgres
    version: "16"
    name: db
"#;
    let path = dir.path().join("env.yaml");
    std::fs::write(&path, env).expect("write env");
    let def = EnvironmentDefinition::load(&path).expect("load");
    assert!(matches!(
        validate(&def).expect_err("rejected statically").root(),
        BrewdockError::ForwardReference { .. }
    ));

    let runtime = Arc::new(MemoryRuntime::new());
    let rt: Arc<dyn ContainerRuntime> = runtime.clone();
    let failure = StackBuilder::new(rt, fast_config())
        .build(&def, &CancellationToken::new())
        .await
        .expect_err("forward reference");
    assert!(matches!(
        failure.error.root(),
        BrewdockError::ForwardReference { dependency, reference }
            if dependency == "app" && reference == "db"
    ));
    assert_eq!(runtime.container_count(), 0);
    let _ = failure.cleanup().await;
    assert!(runtime.networks().is_empty());
}

// ── Resolution ───────────────────────────────────────────────────────

#[tokio::test]
async fn resolution_is_idempotent_and_matches_direct_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let def = write_env(dir.path(), ENV);
    let runtime = Arc::new(MemoryRuntime::new());
    let mut stack = build(&runtime, &def).await;
    let rules = &def.dependencies[1].replace_config;

    std::fs::create_dir(stack.scratch_dir()).expect("scratch");
    let first = resolver::resolve(&stack, "again", rules).await.expect("first");
    let first_bytes = std::fs::read(&first[0].host_file).expect("read");
    let second = resolver::resolve(&stack, "again", rules).await.expect("second");
    let second_bytes = std::fs::read(&second[0].host_file).expect("read");
    assert_eq!(first_bytes, second_bytes);

    let db = stack.get_component("db").expect("db");
    let descriptor = runtime.inspect(&db.container_id).await.expect("inspect");
    let query = substitute_network(
        "$.NetworkSettings.Networks[{NETWORK_ID}].IPAddress",
        stack.network().as_str(),
    );
    let direct = extract(&descriptor, &query).expect("extract").expect("present");
    let (_, resolved) = load_config_file(&first[0].host_file).expect("load");
    assert_eq!(resolved.get_path("datasource.host"), Some(&direct));

    std::fs::remove_dir_all(stack.scratch_dir()).expect("cleanup");
    stack.teardown().await.expect("teardown");
}

// ── Teardown ─────────────────────────────────────────────────────────

#[tokio::test]
async fn teardown_removes_containers_and_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let def = write_env(dir.path(), ENV);
    let runtime = Arc::new(MemoryRuntime::new().with_removal_lag(2));
    let mut stack = build(&runtime, &def).await;
    let ids: Vec<_> = stack.components().iter().map(|c| c.container_id.clone()).collect();
    let network = stack.network().clone();

    stack.teardown().await.expect("teardown");

    for id in &ids {
        let listed = runtime.list(&ContainerFilter::by_id(id)).await.expect("list");
        assert!(listed.is_empty());
    }
    assert!(runtime.networks().is_empty());
    assert!(runtime.remove_network(&network).await.expect_err("gone").is_not_found());
    assert!(
        runtime.events().contains(&RuntimeEvent::NetworkRemoved(network.to_string()))
    );
}

#[tokio::test]
async fn teardown_reports_every_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let def = write_env(dir.path(), ENV);
    let runtime = Arc::new(MemoryRuntime::new());
    let mut stack = build(&runtime, &def).await;
    runtime.inject(Fault::Stop("db".into()));
    runtime.inject(Fault::Stop("app".into()));

    let err = stack.teardown().await.expect_err("stop failures");
    let BrewdockError::Teardown { failures } = err else {
        panic!("expected teardown error, got {err}");
    };
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().any(|f| f.contains("db")));
    assert!(failures.iter().any(|f| f.contains("app")));
    assert_eq!(runtime.container_count(), 0);
}

#[tokio::test]
async fn stuck_removal_is_bounded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let def = write_env(dir.path(), ENV);
    let runtime = Arc::new(MemoryRuntime::new());
    let mut stack = build(&runtime, &def).await;
    runtime.inject(Fault::StuckRemoval("app".into()));
    let app_id = stack.get_component("app").expect("app").container_id.to_string();

    let err = stack.teardown().await.expect_err("removal never confirmed");
    let BrewdockError::Teardown { failures } = err else {
        panic!("expected teardown error, got {err}");
    };
    assert!(failures.iter().any(|f| f.contains(&app_id)));
    assert_eq!(runtime.networks().len(), 1);
}

// ── Rebuild ──────────────────────────────────────────────────────────

#[tokio::test]
async fn rebuild_with_renamed_dependency() {
    let dir = tempfile::tempdir().expect("tempdir");
    let def = write_env(dir.path(), ENV);
    let runtime = Arc::new(MemoryRuntime::new());
    let mut stack = build(&runtime, &def).await;
    stack.teardown().await.expect("teardown");

    let renamed = ENV.replace("name: app", "name: api");
    let def = write_env(dir.path(), &renamed);
    let mut stack = build(&runtime, &def).await;

    assert_eq!(stack.get_component("api").expect("api").name, "api");
    assert!(stack.get_component("app").expect_err("old name").is_not_found());
    stack.teardown().await.expect("teardown");
}
