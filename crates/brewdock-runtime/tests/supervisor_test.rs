//! Integration tests for the supervision loop: reload, print, quit, and
//! failed reloads, driven through the control channel.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use brewdock_common::config::BrewdockConfig;
use brewdock_compose::definition::EnvironmentDefinition;
use brewdock_runtime::builder::StackBuilder;
use brewdock_runtime::memory::{Fault, MemoryRuntime};
use brewdock_runtime::runtime::ContainerRuntime;
use brewdock_runtime::stack::Stack;
use brewdock_runtime::supervisor::{ControlEvent, Supervisor, SupervisorState};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ENV: &str = "dependencies:\n  - image: postgres\n    version: \"16\"\n    name: db\n  - image: redis\n    version: \"7\"\n    name: cache\n";

struct Fixture {
    _dir: tempfile::TempDir,
    path: PathBuf,
    runtime: Arc<MemoryRuntime>,
    printed: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, ENV).expect("write");
        Self {
            _dir: dir,
            path,
            runtime: Arc::new(MemoryRuntime::new()),
            printed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn builder(&self) -> StackBuilder {
        let runtime: Arc<dyn ContainerRuntime> = self.runtime.clone();
        let config = BrewdockConfig {
            reload_delay_ms: 0,
            removal_initial_backoff_ms: 1,
            removal_max_backoff_ms: 4,
            removal_timeout_secs: 1,
            ..BrewdockConfig::default()
        };
        StackBuilder::new(runtime, config)
    }

    fn supervisor(&self) -> Supervisor {
        let printed = Arc::clone(&self.printed);
        Supervisor::new(self.builder(), &self.path).with_printer(move |snapshot| {
            printed.lock().unwrap().push(snapshot.to_string());
        })
    }

    async fn stack(&self) -> Stack {
        let def = EnvironmentDefinition::load(&self.path).expect("load");
        self.builder()
            .build(&def, &CancellationToken::new())
            .await
            .expect("build")
    }

    fn rewrite(&self, content: &str) {
        std::fs::write(&self.path, content).expect("rewrite");
    }

    fn printed(&self) -> Vec<String> {
        self.printed.lock().unwrap().clone()
    }
}

async fn send_all(tx: &mpsc::Sender<ControlEvent>, events: Vec<ControlEvent>) {
    for event in events {
        tx.send(event).await.expect("send");
    }
}

#[tokio::test]
async fn reload_picks_up_renamed_dependency() {
    let fx = Fixture::new();
    let stack = fx.stack().await;
    let sup = fx.supervisor();
    let (tx, rx) = mpsc::channel(16);

    fx.rewrite(&ENV.replace("name: cache", "name: sessions"));
    send_all(
        &tx,
        vec![ControlEvent::Reload, ControlEvent::Print, ControlEvent::Quit],
    )
    .await;
    sup.run(stack, rx, CancellationToken::new()).await.expect("run");

    let printed = fx.printed();
    assert_eq!(printed.len(), 1);
    assert!(printed[0].contains("name: sessions"));
    assert!(!printed[0].contains("name: cache"));
    assert_eq!(fx.runtime.container_count(), 0);
    assert!(fx.runtime.networks().is_empty());
}

#[tokio::test]
async fn file_change_triggers_single_reload() {
    let fx = Fixture::new();
    let stack = fx.stack().await;
    let sup = fx.supervisor();
    let mut states = sup.subscribe();
    let (tx, rx) = mpsc::channel(16);

    let changed = fx.path.clone();
    send_all(
        &tx,
        vec![
            ControlEvent::FileChanged(changed.clone()),
            ControlEvent::FileChanged(changed),
            ControlEvent::Print,
            ControlEvent::Quit,
        ],
    )
    .await;
    let handle = tokio::spawn(sup.run(stack, rx, CancellationToken::new()));

    let mut seen = Vec::new();
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        seen.push(state);
        if state == SupervisorState::ShuttingDown {
            break;
        }
    }
    handle.await.expect("join").expect("run");

    assert_eq!(seen.last(), Some(&SupervisorState::ShuttingDown));
    let networks_created = fx
        .runtime
        .events()
        .iter()
        .filter(|e| matches!(e, brewdock_runtime::memory::RuntimeEvent::NetworkCreated(_)))
        .count();
    assert_eq!(networks_created, 2, "initial build plus one reload");
    assert_eq!(fx.printed().len(), 1);
}

#[tokio::test]
async fn invalid_definition_on_reload_shuts_down_with_error() {
    let fx = Fixture::new();
    let stack = fx.stack().await;
    let sup = fx.supervisor();
    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();

    fx.rewrite("dependencies: [ this is not valid");
    send_all(&tx, vec![ControlEvent::Reload]).await;
    let err = sup.run(stack, rx, cancel.clone()).await.expect_err("reload fails");

    assert!(matches!(err, brewdock_common::error::BrewdockError::Decode { .. }));
    assert!(cancel.is_cancelled());
    assert_eq!(fx.runtime.container_count(), 0);
    assert!(fx.runtime.networks().is_empty());
}

#[tokio::test]
async fn failed_rebuild_tears_down_partial_stack() {
    let fx = Fixture::new();
    let stack = fx.stack().await;
    let sup = fx.supervisor();
    let (tx, rx) = mpsc::channel(16);

    fx.runtime.inject(Fault::Create("cache".into()));
    send_all(&tx, vec![ControlEvent::Reload]).await;
    let err = sup
        .run(stack, rx, CancellationToken::new())
        .await
        .expect_err("rebuild fails");

    assert!(err.to_string().contains("cache"));
    assert_eq!(fx.runtime.container_count(), 0);
    assert!(fx.runtime.networks().is_empty());
}

#[tokio::test]
async fn closed_channel_shuts_down_cleanly() {
    let fx = Fixture::new();
    let stack = fx.stack().await;
    let sup = fx.supervisor();
    let (tx, rx) = mpsc::channel(1);
    drop(tx);

    sup.run(stack, rx, CancellationToken::new()).await.expect("run");
    assert_eq!(fx.runtime.container_count(), 0);
}
