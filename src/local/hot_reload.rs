//! Restart-on-change watcher for `spa run local`.
//!
//! Watches the handlers root (recursively) and the base API document using the
//! `notify` crate. Each burst of relevant file events (100ms debounce) yields a
//! single `()` on the returned channel; the caller restarts the server
//! generation on every message.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SpaError;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Directory names whose contents never trigger a restart.
const IGNORED_DIRS: [&str; 4] = ["__pycache__", ".git", ".venv", "node_modules"];

/// Whether a change to `path` should restart the server.
///
/// Interpreter caches and `ignored` (the written API document) are skipped so
/// serving a request or writing the artifact does not cause a restart.
pub fn is_relevant(path: &Path, ignored: &[PathBuf]) -> bool {
    if ignored.iter().any(|p| p == path) {
        return false;
    }
    if path.extension().is_some_and(|ext| ext == "pyc") {
        return false;
    }
    !path.components().any(|c| match c {
        Component::Normal(name) => IGNORED_DIRS.iter().any(|d| name == *d),
        _ => false,
    })
}

fn is_relevant_event(event: &notify::Event, ignored: &[PathBuf]) -> bool {
    if event.kind.is_access() || event.kind.is_other() {
        return false;
    }
    // Events without paths (rescans) are treated as changes.
    event.paths.is_empty() || event.paths.iter().any(|p| is_relevant(p, ignored))
}

/// Start watching `recursive` directories and `files`, returning the change
/// channel. The watcher stops when `cancel` fires or the receiver is dropped.
///
/// Paths that do not exist are skipped with a warning; failing to create the
/// watcher itself is an error.
pub fn watch_changes(
    recursive: Vec<PathBuf>,
    files: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
    cancel: CancellationToken,
) -> crate::Result<mpsc::Receiver<()>> {
    let (event_tx, mut event_rx) =
        tokio::sync::mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })
    .map_err(|e| SpaError::Server(format!("failed to create file watcher: {}", e)))?;

    let targets = recursive
        .iter()
        .map(|p| (p, RecursiveMode::Recursive))
        .chain(files.iter().map(|p| (p, RecursiveMode::NonRecursive)));
    for (path, mode) in targets {
        if let Err(e) = watcher.watch(path, mode) {
            tracing::warn!(path = %path.display(), error = %e, "cannot watch path for reload");
            continue;
        }
        tracing::info!(path = %path.display(), "watching for changes");
    }

    let (change_tx, change_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        // The OS-level watch stops when the watcher is dropped.
        let _watcher = watcher;
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(Ok(event)) => {
                            if !is_relevant_event(&event, &ignored) {
                                continue;
                            }
                            tokio::time::sleep(DEBOUNCE).await;
                            while event_rx.try_recv().is_ok() {}

                            tracing::debug!(paths = ?event.paths, "change detected");
                            // A full channel already holds a pending restart.
                            if let Err(mpsc::error::TrySendError::Closed(())) = change_tx.try_send(()) {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "file watcher error");
                        }
                        None => {
                            tracing::debug!("file watcher channel closed");
                            return;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("file watcher cancelled");
                    return;
                }
            }
        }
    });

    Ok(change_rx)
}
