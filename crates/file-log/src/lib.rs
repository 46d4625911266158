//! Persistent per-file upload status log.
//!
//! A single JSON document keyed by filename, rewritten wholesale on
//! every mutation. The log is the source of truth for "does this file
//! need upload": the change detector compares observed modification
//! times against it and the upload worker records terminal statuses
//! into it. Persistence is best-effort — a write failure is logged and
//! the in-memory state still advances, because the reconciliation scan
//! heals any drift.

mod record;

pub use record::{DATE_FORMAT, FileRecord, FileStatus};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, error, warn};

/// Errors produced while reading or writing the log document.
#[derive(Debug, thiserror::Error)]
pub enum FileLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable filename → [`FileRecord`] store (thread-safe).
///
/// Reads take a shared lock; every mutation takes the exclusive lock,
/// applies the change, and rewrites the whole document before
/// releasing it, so concurrent writers never interleave.
pub struct FileLog {
    path: PathBuf,
    records: RwLock<BTreeMap<String, FileRecord>>,
}

impl FileLog {
    /// Opens the log at `path`, loading existing records if present.
    ///
    /// A missing file starts an empty log; an unreadable or corrupt
    /// file is logged and also starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_from_disk(&path) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "could not read file log, starting empty"
                );
                BTreeMap::new()
            }
        };
        Self {
            path,
            records: RwLock::new(records),
        }
    }

    /// Returns the status recorded for `filename`.
    pub fn status(&self, filename: &str) -> Option<FileStatus> {
        let records = self.records.read().unwrap();
        records.get(filename).map(|r| r.status.clone())
    }

    /// Returns the last recorded modification time for `filename`.
    pub fn mtime(&self, filename: &str) -> Option<f64> {
        let records = self.records.read().unwrap();
        records.get(filename).and_then(|r| r.mtime)
    }

    /// Returns the formatted timestamp of the last successful upload.
    pub fn upload_date(&self, filename: &str) -> Option<String> {
        let records = self.records.read().unwrap();
        records.get(filename).and_then(|r| r.upload_date.clone())
    }

    /// Returns a copy of the full record for `filename`.
    pub fn record(&self, filename: &str) -> Option<FileRecord> {
        let records = self.records.read().unwrap();
        records.get(filename).cloned()
    }

    /// Returns a copy of all records, for status reporting.
    pub fn snapshot(&self) -> BTreeMap<String, FileRecord> {
        let records = self.records.read().unwrap();
        records.clone()
    }

    /// Sets the status for `filename`, creating the record if absent.
    ///
    /// Stamps `status_date` with the current time; `Uploaded`/`Updated`
    /// also stamp `upload_date`. Persists before returning.
    pub fn set_status(&self, filename: &str, status: FileStatus) {
        let now = record::format_now();
        let mut records = self.records.write().unwrap();
        let rec = records
            .entry(filename.to_string())
            .or_insert_with(FileRecord::new);
        if status.is_uploaded() {
            rec.upload_date = Some(now.clone());
        }
        rec.status = status;
        rec.status_date = now;
        self.persist(&records);
    }

    /// Records the observed modification time for `filename`, creating
    /// the record if absent. Persists before returning.
    pub fn set_mtime(&self, filename: &str, mtime: f64) {
        let mut records = self.records.write().unwrap();
        let rec = records
            .entry(filename.to_string())
            .or_insert_with(FileRecord::new);
        rec.mtime = Some(mtime);
        rec.date = Some(record::format_epoch(mtime));
        self.persist(&records);
    }

    /// Demotes any `Queued`/`Uploading`/`Updating` record to `Pending`.
    ///
    /// Queue entries only live in memory, so statuses persisted
    /// mid-flight by a previous run would otherwise never be retried.
    /// Called once at engine startup.
    pub fn reset_in_flight(&self) {
        let mut records = self.records.write().unwrap();
        let mut reset = 0usize;
        for rec in records.values_mut() {
            if rec.status.is_in_flight() {
                rec.status = FileStatus::Pending;
                rec.status_date = record::format_now();
                reset += 1;
            }
        }
        if reset > 0 {
            debug!(reset, "demoted stale in-flight records to pending");
            self.persist(&records);
        }
    }

    /// Erases all records. Persists before returning.
    pub fn clear(&self) {
        let mut records = self.records.write().unwrap();
        records.clear();
        self.persist(&records);
    }

    /// Path of the on-disk document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // Caller holds the write lock.
    fn persist(&self, records: &BTreeMap<String, FileRecord>) {
        if let Err(e) = write_to_disk(&self.path, records) {
            error!(
                path = %self.path.display(),
                error = %e,
                "failed to persist file log"
            );
        }
    }
}

fn read_from_disk(path: &Path) -> Result<BTreeMap<String, FileRecord>, FileLogError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_to_disk(path: &Path, records: &BTreeMap<String, FileRecord>) -> Result<(), FileLogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_in(dir: &TempDir) -> FileLog {
        FileLog::open(dir.path().join("file_log.json"))
    }

    #[test]
    fn absent_file_has_no_record() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        assert!(log.status("missing.txt").is_none());
        assert!(log.mtime("missing.txt").is_none());
        assert!(log.record("missing.txt").is_none());
    }

    #[test]
    fn set_status_creates_record() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.set_status("a.txt", FileStatus::Pending);

        let rec = log.record("a.txt").unwrap();
        assert_eq!(rec.status, FileStatus::Pending);
        assert!(!rec.status_date.is_empty());
        assert!(rec.upload_date.is_none());
    }

    #[test]
    fn uploaded_status_stamps_upload_date() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.set_status("a.txt", FileStatus::Uploaded);
        assert!(log.upload_date("a.txt").is_some());

        log.set_status("b.txt", FileStatus::Error("boom".into()));
        assert!(log.upload_date("b.txt").is_none());
    }

    #[test]
    fn set_mtime_records_value_and_formatted_date() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.set_mtime("a.txt", 1_700_000_000.5);

        let rec = log.record("a.txt").unwrap();
        assert_eq!(rec.mtime, Some(1_700_000_000.5));
        assert!(rec.date.is_some());
        // Created via mtime only: status defaults to pending.
        assert_eq!(rec.status, FileStatus::Pending);
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file_log.json");
        {
            let log = FileLog::open(&path);
            log.set_status("a.txt", FileStatus::Uploaded);
            log.set_mtime("a.txt", 100.0);
            log.set_status("b.txt", FileStatus::Error("timeout".into()));
        }

        let log = FileLog::open(&path);
        assert_eq!(log.status("a.txt"), Some(FileStatus::Uploaded));
        assert_eq!(log.mtime("a.txt"), Some(100.0));
        assert_eq!(
            log.status("b.txt"),
            Some(FileStatus::Error("timeout".into()))
        );
    }

    #[test]
    fn corrupt_document_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file_log.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let log = FileLog::open(&path);
        assert!(log.snapshot().is_empty());

        // Still usable afterwards.
        log.set_status("a.txt", FileStatus::Pending);
        assert_eq!(log.status("a.txt"), Some(FileStatus::Pending));
    }

    #[test]
    fn clear_erases_everything() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file_log.json");
        {
            let log = FileLog::open(&path);
            log.set_status("a.txt", FileStatus::Uploaded);
            log.clear();
        }
        let log = FileLog::open(&path);
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn reset_in_flight_demotes_only_in_flight() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.set_status("queued.txt", FileStatus::Queued);
        log.set_status("uploading.txt", FileStatus::Uploading);
        log.set_status("updating.txt", FileStatus::Updating);
        log.set_status("done.txt", FileStatus::Uploaded);
        log.set_status("failed.txt", FileStatus::Error("x".into()));

        log.reset_in_flight();

        assert_eq!(log.status("queued.txt"), Some(FileStatus::Pending));
        assert_eq!(log.status("uploading.txt"), Some(FileStatus::Pending));
        assert_eq!(log.status("updating.txt"), Some(FileStatus::Pending));
        assert_eq!(log.status("done.txt"), Some(FileStatus::Uploaded));
        assert_eq!(log.status("failed.txt"), Some(FileStatus::Error("x".into())));
    }

    #[test]
    fn persistence_failure_still_advances_memory() {
        // Point the log at a path whose parent is a file, so writes fail.
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let log = FileLog::open(blocker.join("file_log.json"));
        log.set_status("a.txt", FileStatus::Uploaded);
        assert_eq!(log.status("a.txt"), Some(FileStatus::Uploaded));
    }

    #[test]
    fn snapshot_is_sorted_by_filename() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.set_status("b.txt", FileStatus::Pending);
        log.set_status("a.txt", FileStatus::Pending);

        let names: Vec<String> = log.snapshot().into_keys().collect();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn concurrent_mutations_do_not_interleave() {
        use std::sync::Arc;
        use std::thread;

        let dir = TempDir::new().unwrap();
        let log = Arc::new(log_in(&dir));

        let mut handles = vec![];
        for i in 0..8 {
            let log = Arc::clone(&log);
            handles.push(thread::spawn(move || {
                for j in 0..50 {
                    let name = format!("file_{i}.txt");
                    log.set_mtime(&name, j as f64);
                    let _ = log.status(&name);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(log.snapshot().len(), 8);
        for i in 0..8 {
            assert_eq!(log.mtime(&format!("file_{i}.txt")), Some(49.0));
        }
    }
}
