//! Upload queue: many producers, one worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ftpwatch_file_log::{FileLog, FileStatus};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::detector::modified_epoch;

/// One file the worker should upload.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub path: PathBuf,
    pub filename: String,
    /// Skip the post-upload size verification (manual uploads).
    pub force: bool,
}

impl QueueEntry {
    pub(crate) fn new(path: PathBuf, filename: String, force: bool) -> Self {
        Self {
            path,
            filename,
            force,
        }
    }
}

/// Producer handle for the upload queue. Cheap to clone; the watcher
/// task, the scan task, and manual triggers all hold one.
///
/// Enqueueing is where duplicates die: a file already queued or
/// mid-upload is skipped, so however many detectors notice the same
/// change, the worker sees it once.
#[derive(Clone)]
pub struct UploadQueue {
    tx: mpsc::UnboundedSender<QueueEntry>,
    log: Arc<FileLog>,
}

impl UploadQueue {
    pub(crate) fn new(tx: mpsc::UnboundedSender<QueueEntry>, log: Arc<FileLog>) -> Self {
        Self { tx, log }
    }

    /// Queues `path` for a regular upload. Returns `false` when the
    /// file is already in flight or the path has no usable filename.
    pub fn enqueue(&self, path: &Path) -> bool {
        match self.entry_for(path, false) {
            Some(entry) => self.submit(entry),
            None => false,
        }
    }

    /// Queues `path` for a forced upload: the needs-upload predicate
    /// and the size verification are both bypassed. In-flight
    /// duplicates are still suppressed.
    pub fn enqueue_manual(&self, path: &Path) -> bool {
        match self.entry_for(path, true) {
            Some(entry) => self.submit(entry),
            None => false,
        }
    }

    /// Marks the record `Queued`, stamps the observed mtime, and hands
    /// the entry to the worker.
    pub(crate) fn submit(&self, entry: QueueEntry) -> bool {
        if self
            .log
            .status(&entry.filename)
            .is_some_and(|s| s.is_in_flight())
        {
            debug!(file = %entry.filename, "already in flight, skipping enqueue");
            return false;
        }

        match modified_epoch(&entry.path) {
            Ok(mtime) => self.log.set_mtime(&entry.filename, mtime),
            // Still queue it; the worker reports the real failure.
            Err(e) => debug!(file = %entry.filename, error = %e, "could not stat file at enqueue"),
        }
        self.log.set_status(&entry.filename, FileStatus::Queued);

        debug!(file = %entry.filename, force = entry.force, "queued for upload");
        if self.tx.send(entry).is_err() {
            warn!("upload queue is closed, entry dropped");
            return false;
        }
        true
    }

    fn entry_for(&self, path: &Path, force: bool) -> Option<QueueEntry> {
        let filename = path.file_name()?.to_str()?.to_string();
        Some(QueueEntry::new(path.to_path_buf(), filename, force))
    }
}
