//! Supervision loop.
//!
//! Keeps a stack running and reacts to control events: a change of the
//! definition file or a reload command rebuilds the stack, a print command
//! renders it, and a quit command or cancellation tears it down. Events from
//! every source arrive through one channel, so at most one reload is ever in
//! flight.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use brewdock_common::error::{BrewdockError, Result};
use brewdock_compose::definition::EnvironmentDefinition;
use brewdock_compose::validator;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::builder::StackBuilder;
use crate::stack::Stack;

/// Input to the supervision loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A watched file changed.
    FileChanged(PathBuf),
    /// Rebuild the stack.
    Reload,
    /// Render the current stack.
    Print,
    /// Tear down and exit.
    Quit,
}

/// State of the supervision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Waiting for events.
    Running,
    /// Tearing down and rebuilding.
    Reloading,
    /// Final teardown; no further events are processed.
    ShuttingDown,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Reloading => "reloading",
            Self::ShuttingDown => "shutting down",
        };
        f.write_str(s)
    }
}

type Printer = Box<dyn Fn(&str) + Send + Sync>;

/// Owns the current stack and drives it through reloads until shutdown.
pub struct Supervisor {
    builder: StackBuilder,
    definition_path: PathBuf,
    state: watch::Sender<SupervisorState>,
    printer: Printer,
}

impl Supervisor {
    /// Creates a supervisor that reloads from `definition_path`.
    ///
    /// Reloads never write the definition dump; only the initial build does.
    #[must_use]
    pub fn new(builder: StackBuilder, definition_path: impl Into<PathBuf>) -> Self {
        let (state, _) = watch::channel(SupervisorState::Running);
        Self {
            builder: builder.with_dump(false),
            definition_path: definition_path.into(),
            state,
            printer: Box::new(|snapshot: &str| tracing::info!(%snapshot, "stack snapshot")),
        }
    }

    /// Sets where print commands render the stack.
    #[must_use]
    pub fn with_printer(mut self, printer: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.printer = Box::new(printer);
        self
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Runs the loop until a quit command, a failed reload, a closed event
    /// channel, or cancellation, then tears the current stack down.
    ///
    /// `cancel` is cancelled on return so that event producers stop too.
    ///
    /// # Errors
    ///
    /// Returns the reload failure that ended the loop, or the final
    /// teardown failure. Cancellation is a clean exit.
    pub async fn run(
        self,
        stack: Stack,
        mut events: mpsc::Receiver<ControlEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut current = Some(stack);
        let mut deferred = VecDeque::new();
        let mut outcome = Ok(());
        self.transition(SupervisorState::Running);

        loop {
            let event = match deferred.pop_front() {
                Some(event) => Some(event),
                None => tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::info!("cancellation received");
                        break;
                    }
                    event = events.recv() => event,
                },
            };
            let Some(event) = event else {
                tracing::debug!("control channel closed");
                break;
            };
            tracing::debug!(?event, "control event");

            match event {
                ControlEvent::Quit => break,
                ControlEvent::Print => match &current {
                    Some(stack) => (self.printer)(&stack.print()),
                    None => (self.printer)(""),
                },
                ControlEvent::FileChanged(path) if !self.tracks(&path) => {
                    tracing::debug!(path = %path.display(), "ignoring unrelated change");
                }
                ControlEvent::FileChanged(_) | ControlEvent::Reload => {
                    self.transition(SupervisorState::Reloading);
                    match self.reload(&mut current, &cancel).await {
                        Ok(()) => {
                            drain_queued_changes(&mut events, &mut deferred);
                            self.transition(SupervisorState::Running);
                        }
                        Err(BrewdockError::Cancelled) => break,
                        Err(e) => {
                            tracing::error!(error = %e, "reload failed");
                            outcome = Err(e);
                            break;
                        }
                    }
                }
            }
        }

        self.transition(SupervisorState::ShuttingDown);
        if let Some(mut stack) = current.take() {
            if let Err(e) = stack.teardown().await {
                tracing::error!(error = %e, "final teardown failed");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        cancel.cancel();
        outcome
    }

    async fn reload(&self, current: &mut Option<Stack>, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(path = %self.definition_path.display(), "reloading stack");
        if let Some(stack) = current.as_mut() {
            stack.teardown().await?;
        }
        *current = None;

        tokio::select! {
            () = tokio::time::sleep(self.builder.config().reload_delay()) => {}
            () = cancel.cancelled() => return Err(BrewdockError::Cancelled),
        }

        let definition = EnvironmentDefinition::load(&self.definition_path)?;
        validator::validate(&definition)?;
        match self.builder.build(&definition, cancel).await {
            Ok(stack) => {
                *current = Some(stack);
                Ok(())
            }
            Err(failure) => {
                let (partial, error) = failure.into_parts();
                *current = partial;
                Err(error)
            }
        }
    }

    fn tracks(&self, path: &Path) -> bool {
        path.file_name() == self.definition_path.file_name()
    }

    fn transition(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "supervisor state");
        }
    }
}

/// Drops file changes queued while a reload ran; the rebuild already read
/// the latest file. Other events are kept in arrival order.
fn drain_queued_changes(
    events: &mut mpsc::Receiver<ControlEvent>,
    deferred: &mut VecDeque<ControlEvent>,
) {
    while let Ok(event) = events.try_recv() {
        if !matches!(event, ControlEvent::FileChanged(_)) {
            deferred.push_back(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use brewdock_common::config::BrewdockConfig;

    use super::*;
    use crate::memory::MemoryRuntime;
    use crate::runtime::ContainerRuntime;

    const DEF: &str = "dependencies:\n  - image: redis\n    version: \"7\"\n    name: cache\n";

    fn supervisor(runtime: &Arc<MemoryRuntime>, path: &Path) -> Supervisor {
        let runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        let config = BrewdockConfig {
            reload_delay_ms: 0,
            ..BrewdockConfig::default()
        };
        Supervisor::new(StackBuilder::new(runtime, config), path)
    }

    async fn initial_stack(sup: &Supervisor, path: &Path) -> Stack {
        let def = EnvironmentDefinition::load(path).expect("load");
        sup.builder
            .build(&def, &CancellationToken::new())
            .await
            .expect("build")
    }

    #[tokio::test]
    async fn quit_tears_down_and_cancels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, DEF).expect("write");
        let runtime = Arc::new(MemoryRuntime::new());
        let sup = supervisor(&runtime, &path);
        let stack = initial_stack(&sup, &path).await;
        let states = sup.subscribe();

        let (tx, rx) = mpsc::channel(8);
        tx.send(ControlEvent::Quit).await.expect("send");
        let cancel = CancellationToken::new();
        sup.run(stack, rx, cancel.clone()).await.expect("run");

        assert!(cancel.is_cancelled());
        assert_eq!(*states.borrow(), SupervisorState::ShuttingDown);
        assert_eq!(runtime.container_count(), 0);
        assert!(runtime.networks().is_empty());
    }

    #[tokio::test]
    async fn unrelated_file_changes_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, DEF).expect("write");
        let runtime = Arc::new(MemoryRuntime::new());
        let sup = supervisor(&runtime, &path);
        let stack = initial_stack(&sup, &path).await;
        let first_network = stack.network().clone();

        let (tx, rx) = mpsc::channel(8);
        tx.send(ControlEvent::FileChanged(dir.path().join("notes.txt")))
            .await
            .expect("send");
        tx.send(ControlEvent::Quit).await.expect("send");
        sup.run(stack, rx, CancellationToken::new()).await.expect("run");

        let created: Vec<_> = runtime
            .events()
            .into_iter()
            .filter(|e| matches!(e, crate::memory::RuntimeEvent::NetworkCreated(_)))
            .collect();
        assert_eq!(created.len(), 1);
        assert!(!runtime.networks().contains(&first_network.to_string()));
    }

    #[tokio::test]
    async fn reload_does_not_rewrite_the_dump() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, DEF).expect("write");
        let runtime = Arc::new(MemoryRuntime::new());
        let config = BrewdockConfig {
            reload_delay_ms: 0,
            ..BrewdockConfig::default()
        };
        let dump = dir.path().join(&config.dump_file_name);
        let shared: Arc<dyn ContainerRuntime> = runtime.clone();
        let builder = StackBuilder::new(shared, config).with_dump(true);

        let def = EnvironmentDefinition::load(&path).expect("load");
        let stack = builder
            .build(&def, &CancellationToken::new())
            .await
            .expect("build");
        assert!(dump.exists());
        std::fs::remove_file(&dump).expect("remove dump");

        let sup = Supervisor::new(builder, &path);
        let (tx, rx) = mpsc::channel(8);
        tx.send(ControlEvent::Reload).await.expect("send");
        tx.send(ControlEvent::Quit).await.expect("send");
        sup.run(stack, rx, CancellationToken::new()).await.expect("run");

        assert_eq!(runtime.networks().len(), 0);
        assert!(!dump.exists());
    }

    #[tokio::test]
    async fn cancellation_is_a_clean_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, DEF).expect("write");
        let runtime = Arc::new(MemoryRuntime::new());
        let sup = supervisor(&runtime, &path);
        let stack = initial_stack(&sup, &path).await;

        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        sup.run(stack, rx, cancel).await.expect("run");
        assert_eq!(runtime.container_count(), 0);
    }
}
