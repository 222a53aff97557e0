//! Error types for frisbee.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Main error type for all frisbee operations.
///
/// I/O causes are carried as `Arc<io::Error>` so the connection's last-error
/// cell can hand the same error to every caller after a shutdown.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Could not establish the underlying stream.
    #[error("dial failed: {0}")]
    Dial(Arc<io::Error>),

    /// Caller-supplied payload length does not match the header's
    /// ContentLength field.
    #[error("invalid content length")]
    InvalidContentLength,

    /// The reserved magic prefix did not match; the reader resynchronizes.
    #[error("invalid frame")]
    InvalidFrame,

    /// Internal scratch buffer too small to make progress.
    #[error("invalid buffer length")]
    InvalidBufferLength,

    /// I/O failure while reading from the underlying stream.
    #[error("read failed: {0}")]
    Read(Arc<io::Error>),

    /// I/O failure while writing to the underlying stream.
    #[error("write failed: {0}")]
    Write(Arc<io::Error>),

    /// The connection is paused after a recoverable stream error; the caller
    /// may attempt a reconnection.
    #[error("connection paused")]
    ConnectionPaused,

    /// The connection is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// API call on a connection that was never established.
    #[error("connection not initialized")]
    ConnectionNotInitialized,

    /// The incoming packet queue was closed during shutdown.
    #[error("queue closed")]
    QueueClosed,
}

impl Error {
    /// Whether the error pauses the connection (EOF or a closed pipe)
    /// instead of closing it outright.
    pub(crate) fn is_recoverable(&self) -> bool {
        match self {
            Error::Read(e) | Error::Write(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    pub(crate) fn read(e: io::Error) -> Self {
        Error::Read(Arc::new(e))
    }

    pub(crate) fn write(e: io::Error) -> Self {
        Error::Write(Arc::new(e))
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
