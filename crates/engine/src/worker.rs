//! The single upload worker.
//!
//! Consumes queue entries one at a time on a blocking thread, because
//! the FTP client is synchronous. Every entry reaches a terminal
//! status in the file log; a failed upload never blocks the queue.

use std::sync::Arc;

use ftpwatch_file_log::{FileLog, FileStatus};
use ftpwatch_transfer::Transfer;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::detector::modified_epoch;
use crate::queue::QueueEntry;
use crate::ProgressEvent;

pub(crate) struct UploadWorker<T: Transfer> {
    rx: mpsc::UnboundedReceiver<QueueEntry>,
    log: Arc<FileLog>,
    transfer: T,
    progress_tx: mpsc::Sender<ProgressEvent>,
}

impl<T: Transfer> UploadWorker<T> {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<QueueEntry>,
        log: Arc<FileLog>,
        transfer: T,
        progress_tx: mpsc::Sender<ProgressEvent>,
    ) -> Self {
        Self {
            rx,
            log,
            transfer,
            progress_tx,
        }
    }

    /// Runs until every producer handle is dropped, then closes the
    /// FTP session.
    pub(crate) fn run(mut self) {
        info!("upload worker started");
        while let Some(entry) = self.rx.blocking_recv() {
            self.process(entry);
        }
        self.transfer.disconnect();
        info!("upload worker stopped");
    }

    fn process(&mut self, entry: QueueEntry) {
        // A file the server has seen before is an update, not an upload.
        let is_update = self.log.upload_date(&entry.filename).is_some();
        let active = if is_update {
            FileStatus::Updating
        } else {
            FileStatus::Uploading
        };
        self.log.set_status(&entry.filename, active);

        let progress_tx = self.progress_tx.clone();
        let filename = entry.filename.clone();
        let mut on_progress = move |bytes_sent: u64, total_bytes: u64| {
            // Drop-on-full: progress is advisory, uploads never wait on
            // a slow subscriber.
            let _ = progress_tx.try_send(ProgressEvent {
                filename: filename.clone(),
                bytes_sent,
                total_bytes,
            });
        };

        match self
            .transfer
            .upload_file(&entry.path, &mut on_progress, entry.force)
        {
            Ok(()) => {
                match modified_epoch(&entry.path) {
                    Ok(mtime) => self.log.set_mtime(&entry.filename, mtime),
                    Err(e) => {
                        warn!(file = %entry.filename, error = %e, "could not refresh mtime after upload");
                    }
                }
                let terminal = if is_update {
                    FileStatus::Updated
                } else {
                    FileStatus::Uploaded
                };
                info!(file = %entry.filename, status = %terminal, "upload finished");
                self.log.set_status(&entry.filename, terminal);
            }
            Err(e) => {
                error!(file = %entry.filename, error = %e, "upload failed");
                self.log.set_status(&entry.filename, FileStatus::Error(e.to_string()));
            }
        }
    }
}
