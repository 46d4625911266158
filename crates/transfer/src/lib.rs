//! FTP transfer client.
//!
//! One synchronous FTP session at a time: connect with a bounded
//! timeout, authenticate, stream files with `STOR`, verify sizes with
//! `SIZE`, reconnect on demand. Uploads retry connection-class
//! failures with a short backoff; permanent server errors abort
//! immediately, since retrying cannot help.

mod client;
mod progress;
mod session;

pub use client::{FtpTransfer, Transfer};
pub use progress::ProgressThrottle;
pub use session::{FtpConnector, FtpSession, FtpSettings, SessionFactory};

use std::time::Duration;

/// Bound on opening the control connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read block size for streaming `STOR` uploads.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Minimum bytes between progress reports.
pub const PROGRESS_INTERVAL: u64 = 256 * 1024;

/// Total upload attempts per file before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause between attempts, before the forced reconnect.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Timeout, reset, or socket failure. The only retryable class.
    #[error("connection error: {0}")]
    Connection(String),

    /// Permanent server-side failure (permissions, disk full, ...).
    #[error("remote error: {0}")]
    Remote(String),

    /// Post-upload `SIZE` check disagreed with the local file.
    #[error("size mismatch for {filename}: local {local}, remote {remote:?}")]
    SizeMismatch {
        filename: String,
        local: u64,
        remote: Option<u64>,
    },

    /// No live session. Routine on this path, not exceptional.
    #[error("not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Returns `true` for failures worth a reconnect-and-retry.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            TransferError::Connection(_) | TransferError::NotConnected
        )
    }
}
