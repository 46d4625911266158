//! Worker-facing transfer client and its retry state machine.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::progress::ProgressThrottle;
use crate::session::{FtpConnector, FtpSession, FtpSettings, SessionFactory};
use crate::{MAX_ATTEMPTS, RETRY_BACKOFF, TransferError};

/// What the upload worker needs from a transfer client.
///
/// `connect`/`reconnect` report failure as `false` with the reason
/// logged; nothing on this surface panics or propagates "not
/// connected" as an exception.
pub trait Transfer: Send {
    /// Closes any existing session, opens a new one, and checks
    /// liveness with `NOOP`.
    fn connect(&mut self) -> bool;

    /// Best-effort graceful close; always clears session state.
    fn disconnect(&mut self);

    /// Disconnect then connect.
    fn reconnect(&mut self) -> bool;

    fn is_connected(&self) -> bool;

    /// Uploads `path`, reporting `(bytes_sent, total_bytes)` through
    /// `progress`. With `force` the post-upload size verification is
    /// skipped. Never partially reports success.
    fn upload_file(
        &mut self,
        path: &Path,
        progress: &mut dyn FnMut(u64, u64),
        force: bool,
    ) -> Result<(), TransferError>;

    /// Compares the remote size against `expected_size`. A missing
    /// remote file or a dead session is a verification failure, not an
    /// error.
    fn verify_upload(&mut self, filename: &str, expected_size: u64) -> bool;
}

/// FTP-backed [`Transfer`] implementation.
///
/// Owns at most one session at a time. Uploads retry connection-class
/// failures up to [`MAX_ATTEMPTS`] total attempts, pausing
/// [`RETRY_BACKOFF`] and reconnecting between attempts; any other
/// failure aborts immediately.
pub struct FtpTransfer {
    factory: Box<dyn SessionFactory>,
    session: Option<Box<dyn FtpSession>>,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl FtpTransfer {
    pub fn new(factory: Box<dyn SessionFactory>) -> Self {
        Self {
            factory,
            session: None,
            max_attempts: MAX_ATTEMPTS,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    /// Client for the given server settings.
    pub fn open(settings: FtpSettings) -> Self {
        Self::new(Box::new(FtpConnector::new(settings)))
    }

    /// Overrides the retry policy (tests use a zero backoff).
    pub fn with_retry_policy(mut self, max_attempts: u32, retry_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = retry_backoff;
        self
    }

    /// One upload attempt over the current session.
    fn upload_once(
        &mut self,
        path: &Path,
        filename: &str,
        local_size: u64,
        progress: &mut dyn FnMut(u64, u64),
        force: bool,
    ) -> Result<(), TransferError> {
        let session = self.session.as_mut().ok_or(TransferError::NotConnected)?;

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut throttle = ProgressThrottle::new(local_size);
        session.store(filename, &mut reader, &mut |block| {
            if let Some((sent, total)) = throttle.advance(block) {
                progress(sent, total);
            }
        })?;
        if let Some((sent, total)) = throttle.finish() {
            progress(sent, total);
        }

        if force {
            return Ok(());
        }

        // The transfer itself succeeded; now the remote size must agree.
        match session.size(filename) {
            Ok(remote) if remote == local_size => Ok(()),
            Ok(remote) => Err(TransferError::SizeMismatch {
                filename: filename.to_string(),
                local: local_size,
                remote: Some(remote),
            }),
            Err(e) if e.is_connection() => Err(e),
            Err(e) => {
                warn!(file = %filename, error = %e, "remote size unavailable after upload");
                Err(TransferError::SizeMismatch {
                    filename: filename.to_string(),
                    local: local_size,
                    remote: None,
                })
            }
        }
    }
}

impl Transfer for FtpTransfer {
    fn connect(&mut self) -> bool {
        self.disconnect();
        match self.factory.open() {
            Ok(mut session) => match session.noop() {
                Ok(()) => {
                    info!("connected to FTP server");
                    self.session = Some(session);
                    true
                }
                Err(e) => {
                    error!(error = %e, "FTP liveness check failed");
                    false
                }
            },
            Err(e) => {
                error!(error = %e, "could not connect to FTP server");
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.quit() {
                debug!(error = %e, "FTP quit failed, dropping session");
            }
        }
    }

    fn reconnect(&mut self) -> bool {
        self.disconnect();
        self.connect()
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn upload_file(
        &mut self,
        path: &Path,
        progress: &mut dyn FnMut(u64, u64),
        force: bool,
    ) -> Result<(), TransferError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TransferError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid file name: {}", path.display()),
                ))
            })?
            .to_string();
        let local_size = std::fs::metadata(path)?.len();

        let mut attempt = 0;
        loop {
            attempt += 1;
            // Also the forced reconnect between attempts: the retry arm
            // below tears the session down first.
            if self.session.is_none() {
                self.connect();
            }

            match self.upload_once(path, &filename, local_size, progress, force) {
                Ok(()) => {
                    info!(file = %filename, bytes = local_size, attempt, "upload complete");
                    return Ok(());
                }
                Err(e) if e.is_connection() && attempt < self.max_attempts => {
                    warn!(
                        file = %filename,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "connection failure, will retry"
                    );
                    std::thread::sleep(self.retry_backoff);
                    self.disconnect();
                }
                Err(e) => {
                    error!(file = %filename, attempt, error = %e, "upload failed");
                    return Err(e);
                }
            }
        }
    }

    fn verify_upload(&mut self, filename: &str, expected_size: u64) -> bool {
        if self.session.is_none() && !self.connect() {
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match session.size(filename) {
            Ok(remote) => remote == expected_size,
            Err(e) => {
                warn!(file = %filename, error = %e, "remote size check failed");
                false
            }
        }
    }
}
