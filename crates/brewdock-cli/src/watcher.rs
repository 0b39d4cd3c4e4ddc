//! Definition file watcher.
//!
//! Watches the directory holding the definition, since editors often
//! replace a file instead of writing it in place, and forwards debounced
//! changes of that one file as [`ControlEvent::FileChanged`].

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use brewdock_runtime::supervisor::ControlEvent;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Keeps the underlying watcher alive; dropping it stops the watch.
pub struct FileWatch {
    _watcher: RecommendedWatcher,
}

/// Starts watching `path`, sending one event per burst of changes.
///
/// # Errors
///
/// Returns an error if the watcher cannot be created or attached.
pub fn watch_file(
    path: &Path,
    events: mpsc::Sender<ControlEvent>,
    cancel: CancellationToken,
) -> anyhow::Result<FileWatch> {
    let target = path.to_path_buf();
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name: Option<OsString> = target.file_name().map(ToOwned::to_owned);

    let (tx, mut rx) = mpsc::channel(100);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.blocking_send(res);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = %target.display(), "watching definition");

    let _ = tokio::spawn(async move {
        let mut debounce: Option<Pin<Box<Sleep>>> = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                res = rx.recv() => match res {
                    Some(Ok(event)) => {
                        if is_relevant(&event, file_name.as_deref()) {
                            debounce = Some(Box::pin(tokio::time::sleep(DEBOUNCE)));
                        }
                    }
                    Some(Err(e)) => tracing::error!(error = %e, "watch error"),
                    None => break,
                },
                () = async {
                    match debounce.as_mut() {
                        Some(timer) => timer.await,
                        None => std::future::pending().await,
                    }
                } => {
                    debounce = None;
                    tracing::info!(path = %target.display(), "definition changed");
                    if events.send(ControlEvent::FileChanged(target.clone())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    Ok(FileWatch { _watcher: watcher })
}

fn is_relevant(event: &notify::Event, file_name: Option<&OsStr>) -> bool {
    let kind = &event.kind;
    if !(kind.is_modify() || kind.is_create() || kind.is_remove()) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name() == file_name)
}
