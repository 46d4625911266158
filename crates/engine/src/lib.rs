//! Folder-to-FTP sync engine.
//!
//! Wires four pieces together: a filesystem watcher and a periodic
//! reconciliation scan produce upload candidates, a deduplicating
//! queue funnels them to a single worker, and the worker drives the
//! transfer client while recording per-file status in the shared
//! [`FileLog`]. The scan alone is sufficient for correctness — events
//! only shorten the latency between a change and its upload.

mod detector;
mod queue;
mod watcher;
mod worker;

pub use detector::{ChangeDetector, TRANSIENT_MARKERS};
pub use queue::{QueueEntry, UploadQueue};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ftpwatch_file_log::FileLog;
use ftpwatch_transfer::Transfer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use worker::UploadWorker;

/// Default period of the reconciliation scan.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Progress events buffered before drop-on-full kicks in.
const PROGRESS_BUFFER: usize = 64;

/// Filesystem change as the engine sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum FsEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Upload progress for one file, `(bytes_sent, total_bytes)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub filename: String,
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("monitored folder does not exist: {}", .0.display())]
    MissingFolder(PathBuf),
}

/// A running sync engine. Call [`Engine::stop`] for an orderly
/// shutdown that lets the in-flight upload finish.
pub struct Engine {
    log: Arc<FileLog>,
    queue: UploadQueue,
    progress_rx: Option<mpsc::Receiver<ProgressEvent>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    worker: JoinHandle<()>,
}

impl Engine {
    /// Starts watching `root` and uploading through `transfer`.
    ///
    /// Demotes any in-flight statuses left over from a previous run to
    /// `Pending` first, so files interrupted mid-upload are retried by
    /// the scan. `scan_interval` of `None` uses [`SCAN_INTERVAL`].
    /// Must be called from within a tokio runtime.
    pub fn start<T>(
        log: Arc<FileLog>,
        transfer: T,
        root: impl Into<PathBuf>,
        scan_interval: Option<Duration>,
    ) -> Result<Self, EngineError>
    where
        T: Transfer + 'static,
    {
        let root = root.into();
        if !root.is_dir() {
            return Err(EngineError::MissingFolder(root));
        }

        log.reset_in_flight();

        let (entry_tx, entry_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER);
        let queue = UploadQueue::new(entry_tx, Arc::clone(&log));
        let detector = Arc::new(ChangeDetector::new(Arc::clone(&log), root.clone()));
        let cancel = CancellationToken::new();

        let worker = UploadWorker::new(entry_rx, Arc::clone(&log), transfer, progress_tx);
        let worker = tokio::task::spawn_blocking(move || worker.run());

        let tasks = vec![
            tokio::spawn(watcher::watch_task(
                root.clone(),
                Arc::clone(&detector),
                queue.clone(),
                cancel.clone(),
            )),
            tokio::spawn(scan_task(
                detector,
                queue.clone(),
                scan_interval.unwrap_or(SCAN_INTERVAL),
                cancel.clone(),
            )),
        ];

        info!(path = %root.display(), "engine started");
        Ok(Self {
            log,
            queue,
            progress_rx: Some(progress_rx),
            cancel,
            tasks,
            worker,
        })
    }

    /// Queues a forced upload of `path`, bypassing change detection.
    pub fn upload_manual(&self, path: &std::path::Path) -> bool {
        self.queue.enqueue_manual(path)
    }

    /// Producer handle for external triggers.
    pub fn queue(&self) -> UploadQueue {
        self.queue.clone()
    }

    /// Takes the progress receiver. Subsequent calls return `None`.
    pub fn take_progress(&mut self) -> Option<mpsc::Receiver<ProgressEvent>> {
        self.progress_rx.take()
    }

    /// The shared per-file status log.
    pub fn file_log(&self) -> Arc<FileLog> {
        Arc::clone(&self.log)
    }

    /// Orderly shutdown: stop the producer tasks, let the worker drain
    /// what is already queued, close the FTP session.
    pub async fn stop(self) {
        let Self {
            log: _,
            queue,
            progress_rx,
            cancel,
            tasks,
            worker,
        } = self;

        info!("stopping engine");
        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task panicked");
            }
        }
        // Last producers gone: the worker drains what is queued and exits.
        drop(queue);
        drop(progress_rx);
        if let Err(e) = worker.await {
            warn!(error = %e, "upload worker panicked");
        }
        info!("engine stopped");
    }
}

/// Periodic reconciliation: everything the log says still needs
/// uploading gets re-queued. The first pass runs immediately, which is
/// what heals `Pending`/`Error` records from a previous run.
async fn scan_task(
    detector: Arc<ChangeDetector>,
    queue: UploadQueue,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for entry in detector.scan() {
                    queue.submit(entry);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftpwatch_file_log::FileStatus;
    use ftpwatch_transfer::TransferError;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct MockTransfer {
        uploads: Arc<Mutex<Vec<(String, bool)>>>,
        failing: Arc<Mutex<HashSet<String>>>,
    }

    impl MockTransfer {
        fn uploads(&self) -> Vec<(String, bool)> {
            self.uploads.lock().unwrap().clone()
        }
    }

    impl Transfer for MockTransfer {
        fn connect(&mut self) -> bool {
            true
        }

        fn disconnect(&mut self) {}

        fn reconnect(&mut self) -> bool {
            true
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn upload_file(
            &mut self,
            path: &Path,
            progress: &mut dyn FnMut(u64, u64),
            force: bool,
        ) -> Result<(), TransferError> {
            let filename = path.file_name().unwrap().to_str().unwrap().to_string();
            self.uploads.lock().unwrap().push((filename.clone(), force));
            if self.failing.lock().unwrap().contains(&filename) {
                return Err(TransferError::Remote("550 permission denied".into()));
            }
            let size = std::fs::metadata(path)?.len();
            progress(size, size);
            Ok(())
        }

        fn verify_upload(&mut self, _filename: &str, _expected_size: u64) -> bool {
            true
        }
    }

    async fn wait_for(log: &FileLog, filename: &str, wanted: FileStatus) {
        for _ in 0..100 {
            if log.status(filename) == Some(wanted.clone()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "{filename} never reached {wanted:?}, last status {:?}",
            log.status(filename)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_folder_fails_fast() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(FileLog::open(dir.path().join("file_log.json")));
        let result = Engine::start(
            log,
            MockTransfer::default(),
            dir.path().join("nope"),
            None,
        );
        assert!(matches!(result, Err(EngineError::MissingFolder(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn existing_file_is_uploaded_exactly_once() {
        let watched = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        std::fs::write(watched.path().join("a.txt"), b"hello").unwrap();

        let log = Arc::new(FileLog::open(state.path().join("file_log.json")));
        let transfer = MockTransfer::default();
        let engine = Engine::start(
            Arc::clone(&log),
            transfer.clone(),
            watched.path(),
            Some(Duration::from_millis(50)),
        )
        .unwrap();

        wait_for(&log, "a.txt", FileStatus::Uploaded).await;
        // Several scan passes later it still went up exactly once.
        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.stop().await;

        assert_eq!(transfer.uploads(), vec![("a.txt".to_string(), false)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn modified_file_is_reuploaded_as_update() {
        let watched = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        std::fs::write(watched.path().join("a.txt"), b"hello").unwrap();

        let log = Arc::new(FileLog::open(state.path().join("file_log.json")));
        let transfer = MockTransfer::default();
        let engine = Engine::start(
            Arc::clone(&log),
            transfer.clone(),
            watched.path(),
            Some(Duration::from_millis(50)),
        )
        .unwrap();

        wait_for(&log, "a.txt", FileStatus::Uploaded).await;
        // Age the recorded mtime instead of racing filesystem timestamp
        // granularity.
        log.set_mtime("a.txt", 1.0);
        wait_for(&log, "a.txt", FileStatus::Updated).await;
        engine.stop().await;

        assert_eq!(
            transfer.uploads(),
            vec![("a.txt".to_string(), false), ("a.txt".to_string(), false)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_in_flight_records_converge_after_restart() {
        let watched = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        std::fs::write(watched.path().join("stuck.txt"), b"hello").unwrap();
        std::fs::write(watched.path().join("failed.txt"), b"hello").unwrap();

        // A previous run died mid-upload and mid-retry.
        let path = state.path().join("file_log.json");
        {
            let log = FileLog::open(&path);
            log.set_status("stuck.txt", FileStatus::Uploading);
            log.set_status("failed.txt", FileStatus::Error("timeout".into()));
        }

        let log = Arc::new(FileLog::open(&path));
        let transfer = MockTransfer::default();
        let engine = Engine::start(
            Arc::clone(&log),
            transfer.clone(),
            watched.path(),
            Some(Duration::from_millis(50)),
        )
        .unwrap();

        wait_for(&log, "stuck.txt", FileStatus::Uploaded).await;
        wait_for(&log, "failed.txt", FileStatus::Uploaded).await;
        engine.stop().await;

        let mut names: Vec<String> =
            transfer.uploads().into_iter().map(|(name, _)| name).collect();
        names.sort();
        assert_eq!(names, vec!["failed.txt", "stuck.txt"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn manual_upload_is_forced() {
        let watched = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let path = watched.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let log = Arc::new(FileLog::open(state.path().join("file_log.json")));
        let transfer = MockTransfer::default();
        // Long scan interval: only the initial pass and the manual
        // trigger produce work.
        let engine = Engine::start(
            Arc::clone(&log),
            transfer.clone(),
            watched.path(),
            Some(Duration::from_secs(60)),
        )
        .unwrap();

        wait_for(&log, "a.txt", FileStatus::Uploaded).await;
        assert!(engine.upload_manual(&path));
        wait_for(&log, "a.txt", FileStatus::Updated).await;
        engine.stop().await;

        assert_eq!(
            transfer.uploads(),
            vec![("a.txt".to_string(), false), ("a.txt".to_string(), true)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn progress_events_reach_the_subscriber() {
        let watched = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        std::fs::write(watched.path().join("a.txt"), b"hello").unwrap();

        let log = Arc::new(FileLog::open(state.path().join("file_log.json")));
        let mut engine = Engine::start(
            Arc::clone(&log),
            MockTransfer::default(),
            watched.path(),
            Some(Duration::from_millis(50)),
        )
        .unwrap();

        let mut progress = engine.take_progress().unwrap();
        assert!(engine.take_progress().is_none());

        let event = tokio::time::timeout(Duration::from_secs(5), progress.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ProgressEvent {
                filename: "a.txt".into(),
                bytes_sent: 5,
                total_bytes: 5,
            }
        );
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_upload_retries_on_next_scan() {
        let watched = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        std::fs::write(watched.path().join("flaky.txt"), b"hello").unwrap();

        let log = Arc::new(FileLog::open(state.path().join("file_log.json")));
        let transfer = MockTransfer::default();
        transfer
            .failing
            .lock()
            .unwrap()
            .insert("flaky.txt".to_string());

        let engine = Engine::start(
            Arc::clone(&log),
            transfer.clone(),
            watched.path(),
            Some(Duration::from_millis(50)),
        )
        .unwrap();

        wait_for(
            &log,
            "flaky.txt",
            FileStatus::Error("remote error: 550 permission denied".into()),
        )
        .await;
        // Server-side condition clears; the next scan retries.
        transfer.failing.lock().unwrap().clear();
        wait_for(&log, "flaky.txt", FileStatus::Uploaded).await;
        engine.stop().await;

        assert!(transfer.uploads().len() >= 2);
    }
}
