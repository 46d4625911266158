//! Decides which files need uploading.
//!
//! Two inputs feed the same decision: filesystem events from the
//! watcher, and the periodic reconciliation scan. The scan is the
//! correctness mechanism; events only make the common case fast.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use ftpwatch_file_log::{FileLog, FileStatus};
use tracing::{debug, warn};

use crate::queue::QueueEntry;
use crate::FsEvent;

/// Filename fragments that mark a file as still being written
/// (browser downloads, editor temp files). Matched case-insensitively
/// anywhere in the name.
pub const TRANSIENT_MARKERS: [&str; 3] = [".tmp", ".crdownload", ".part"];

/// Turns observed filesystem state into upload candidates, using the
/// file log to avoid re-uploading what the server already has.
pub struct ChangeDetector {
    log: Arc<FileLog>,
    root: PathBuf,
}

impl ChangeDetector {
    pub fn new(log: Arc<FileLog>, root: PathBuf) -> Self {
        Self { log, root }
    }

    /// Maps one filesystem event to an upload candidate, or `None`.
    ///
    /// Creations and renames into the folder are always candidates.
    /// Modifications only count when the file's modification time
    /// strictly exceeds what the log recorded, so redundant events for
    /// an already-uploaded file are dropped. Removals never touch the
    /// log; records outlive their files.
    pub fn handle_event(&self, event: FsEvent) -> Option<QueueEntry> {
        match event {
            FsEvent::Created(path) => {
                let (path, filename) = self.candidate(path)?;
                Some(QueueEntry::new(path, filename, false))
            }
            FsEvent::Renamed { from: _, to } => {
                let (path, filename) = self.candidate(to)?;
                Some(QueueEntry::new(path, filename, false))
            }
            FsEvent::Modified(path) => {
                let (path, filename) = self.candidate(path)?;
                let current = match modified_epoch(&path) {
                    Ok(current) => current,
                    Err(e) => {
                        debug!(file = %filename, error = %e, "could not stat modified file");
                        return None;
                    }
                };
                match self.log.mtime(&filename) {
                    Some(recorded) if current <= recorded => None,
                    _ => Some(QueueEntry::new(path, filename, false)),
                }
            }
            FsEvent::Removed(_) => None,
        }
    }

    /// Full sweep of the monitored folder (non-recursive).
    ///
    /// Returns every file whose record says it still needs uploading:
    /// unknown to the log, `Pending`, `Error`, or uploaded but modified
    /// since. Files already queued or mid-upload are skipped.
    pub fn scan(&self) -> Vec<QueueEntry> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "could not scan monitored folder");
                return Vec::new();
            }
        };

        let mut due = Vec::new();
        for entry in entries.flatten() {
            let Some((path, filename)) = self.candidate(entry.path()) else {
                continue;
            };
            if self.needs_upload(&path, &filename) {
                due.push(QueueEntry::new(path, filename, false));
            }
        }
        due
    }

    fn needs_upload(&self, path: &Path, filename: &str) -> bool {
        match self.log.status(filename) {
            None => true,
            Some(status) if status.is_in_flight() => false,
            Some(FileStatus::Pending) | Some(FileStatus::Error(_)) => true,
            Some(status) if status.is_uploaded() => {
                let Ok(current) = modified_epoch(path) else {
                    return false;
                };
                match self.log.mtime(filename) {
                    Some(recorded) => current > recorded,
                    None => true,
                }
            }
            Some(_) => false,
        }
    }

    /// Filters a path down to an uploadable regular file.
    fn candidate(&self, path: PathBuf) -> Option<(PathBuf, String)> {
        if !path.is_file() {
            return None;
        }
        let filename = path.file_name()?.to_str()?.to_string();
        if is_transient(&filename) {
            debug!(file = %filename, "ignoring transient file");
            return None;
        }
        Some((path, filename))
    }
}

fn is_transient(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Modification time of `path` as fractional seconds since the epoch.
pub(crate) fn modified_epoch(path: &Path) -> std::io::Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(std::io::Error::other)?;
    Ok(since_epoch.as_secs_f64())
}
