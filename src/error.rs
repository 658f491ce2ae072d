//! Error taxonomy for the transfer core.

use std::io;
use thiserror::Error;

/// Errors surfaced by the codec, the client and the orchestrator.
///
/// None of these are retried by the core. The `Display` text is what ends up
/// on a failed `DownloadTask`.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Socket could not be established, was reset, closed or timed out.
    #[error("connection error: {0}")]
    Connection(String),

    /// Unexpected or malformed message from the peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered `ERROR`.
    #[error("server error: {0}")]
    Remote(String),

    /// The server answered `FILE_NOT_FOUND`.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Fewer bytes arrived than FILE_INFO declared.
    #[error("transfer corrupted: received {received} of {expected} bytes")]
    Corrupted { received: u64, expected: u64 },

    /// Filename cannot travel on the wire or would escape the served root.
    #[error("invalid filename {name:?}: {reason}")]
    InvalidFilename { name: String, reason: &'static str },

    /// Local file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Maps a socket-level I/O failure to `Connection`.
    pub(crate) fn socket(context: &str, err: io::Error) -> Self {
        TransferError::Connection(format!("{context}: {err}"))
    }

    /// Returns true if the connection can no longer carry commands after this
    /// error.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            TransferError::Connection(_) | TransferError::Protocol(_) | TransferError::Corrupted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
