//! Bridges `notify` filesystem events into the upload pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::detector::ChangeDetector;
use crate::queue::UploadQueue;
use crate::FsEvent;

/// Watches the monitored folder until cancelled.
///
/// If the watcher cannot be created the task logs and returns; the
/// reconciliation scan alone keeps the folder converging.
pub(crate) async fn watch_task(
    root: PathBuf,
    detector: Arc<ChangeDetector>,
    queue: UploadQueue,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel::<notify::Event>(64);
    // The callback runs on notify's own thread, so a blocking send into
    // the async world is safe here.
    let mut watcher = match notify::recommended_watcher(
        move |result: Result<notify::Event, notify::Error>| match result {
            Ok(event) => {
                let _ = tx.blocking_send(event);
            }
            Err(e) => warn!(error = %e, "filesystem watch error"),
        },
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "could not create filesystem watcher, relying on periodic scan");
            return;
        }
    };
    if let Err(e) = watcher.watch(&root, RecursiveMode::NonRecursive) {
        warn!(
            path = %root.display(),
            error = %e,
            "could not watch folder, relying on periodic scan"
        );
        return;
    }
    info!(path = %root.display(), "watching folder");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                for fs_event in translate(event) {
                    if let Some(entry) = detector.handle_event(fs_event) {
                        queue.submit(entry);
                    }
                }
            }
        }
    }
}

/// Flattens a raw notify event into the engine's event vocabulary.
fn translate(event: notify::Event) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(FsEvent::Created).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event.paths.into_iter().map(FsEvent::Removed).collect(),
            RenameMode::To => event.paths.into_iter().map(FsEvent::Created).collect(),
            RenameMode::Both if event.paths.len() == 2 => {
                let mut paths = event.paths.into_iter();
                match (paths.next(), paths.next()) {
                    (Some(from), Some(to)) => vec![FsEvent::Renamed { from, to }],
                    _ => Vec::new(),
                }
            }
            // Ambiguous rename: let the filesystem decide which side
            // each path is on.
            _ => event
                .paths
                .into_iter()
                .map(|path| {
                    if path.exists() {
                        FsEvent::Created(path)
                    } else {
                        FsEvent::Removed(path)
                    }
                })
                .collect(),
        },
        EventKind::Modify(_) => event.paths.into_iter().map(FsEvent::Modified).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(FsEvent::Removed).collect(),
        _ => Vec::new(),
    }
}
