//! FTP session traits and the `suppaftp`-backed implementation.
//!
//! The worker-facing client talks to a live session only through
//! [`FtpSession`], so retry and verification logic can be exercised
//! against scripted sessions in tests.

use std::io::{Read, Write};
use std::net::ToSocketAddrs;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::debug;

use crate::{BLOCK_SIZE, CONNECT_TIMEOUT, TransferError};

/// Connection settings for an FTP server.
#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// One live, authenticated FTP session.
pub trait FtpSession: Send {
    /// Streams `source` to the server as `filename` (`STOR`), invoking
    /// `on_block` with the size of each block written. Returns the
    /// total bytes sent.
    fn store(
        &mut self,
        filename: &str,
        source: &mut dyn Read,
        on_block: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError>;

    /// Remote file size in bytes (`SIZE`).
    fn size(&mut self, filename: &str) -> Result<u64, TransferError>;

    /// Liveness check (`NOOP`).
    fn noop(&mut self) -> Result<(), TransferError>;

    /// Graceful close (`QUIT`).
    fn quit(&mut self) -> Result<(), TransferError>;
}

/// Opens authenticated sessions.
pub trait SessionFactory: Send {
    fn open(&self) -> Result<Box<dyn FtpSession>, TransferError>;
}

/// [`SessionFactory`] connecting to a real FTP server.
pub struct FtpConnector {
    settings: FtpSettings,
}

impl FtpConnector {
    pub fn new(settings: FtpSettings) -> Self {
        Self { settings }
    }
}

impl SessionFactory for FtpConnector {
    fn open(&self) -> Result<Box<dyn FtpSession>, TransferError> {
        let target = format!("{}:{}", self.settings.host, self.settings.port);
        let addr = target
            .to_socket_addrs()
            .map_err(|e| TransferError::Connection(e.to_string()))?
            .next()
            .ok_or_else(|| TransferError::Connection(format!("no address for {target}")))?;

        let mut stream =
            FtpStream::connect_timeout(addr, CONNECT_TIMEOUT).map_err(classify)?;
        stream
            .login(&self.settings.username, &self.settings.password)
            .map_err(classify)?;
        stream.transfer_type(FileType::Binary).map_err(classify)?;
        debug!(host = %self.settings.host, port = self.settings.port, "FTP session opened");

        Ok(Box::new(ServerSession {
            stream: Some(stream),
        }))
    }
}

struct ServerSession {
    stream: Option<FtpStream>,
}

impl ServerSession {
    fn stream(&mut self) -> Result<&mut FtpStream, TransferError> {
        self.stream.as_mut().ok_or(TransferError::NotConnected)
    }
}

impl FtpSession for ServerSession {
    fn store(
        &mut self,
        filename: &str,
        source: &mut dyn Read,
        on_block: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError> {
        let stream = self.stream()?;
        let mut data = stream.put_with_stream(filename).map_err(classify)?;

        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut sent: u64 = 0;
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            // A broken data connection surfaces here as an I/O error.
            data.write_all(&buf[..n])
                .map_err(|e| TransferError::Connection(e.to_string()))?;
            sent += n as u64;
            on_block(n as u64);
        }

        stream.finalize_put_stream(data).map_err(classify)?;
        Ok(sent)
    }

    fn size(&mut self, filename: &str) -> Result<u64, TransferError> {
        let size = self.stream()?.size(filename).map_err(classify)?;
        Ok(size as u64)
    }

    fn noop(&mut self) -> Result<(), TransferError> {
        self.stream()?.noop().map_err(classify)
    }

    fn quit(&mut self) -> Result<(), TransferError> {
        match self.stream.take() {
            Some(mut stream) => stream.quit().map_err(classify),
            None => Ok(()),
        }
    }
}

/// Sorts `suppaftp` failures into the crate's taxonomy: socket-level
/// failures are retryable, everything the server said is not.
fn classify(err: FtpError) -> TransferError {
    match err {
        FtpError::ConnectionError(e) => TransferError::Connection(e.to_string()),
        other => TransferError::Remote(other.to_string()),
    }
}
