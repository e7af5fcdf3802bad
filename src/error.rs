//! Error types for NFLOG operations.

use std::io;

/// Result type for NFLOG operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or consuming an NFLOG session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid caller-supplied configuration. Detected before any socket
    /// is opened.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Kernel rejected a configuration request.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Handshake reply carried an unexpected sequence number.
    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch {
        /// Sequence number stamped into the request.
        expected: u32,
        /// Sequence number received in the reply.
        actual: u32,
    },
}

impl Error {
    /// Create a kernel error from a (negative) errno value as carried in
    /// an NLMSG_ERROR payload.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }

    /// Check if this is the recoverable receive-buffer overrun condition
    /// (ENOBUFS): the kernel dropped log messages before userspace could
    /// read them. The receive loop reports it and keeps running.
    pub fn is_overrun(&self) -> bool {
        matches!(self, Self::Io(e) if e.raw_os_error() == Some(libc::ENOBUFS))
    }

    /// Check if this is a decode-time error, as opposed to a transport
    /// failure. Decode errors discard one datagram, never the session.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::InvalidMessage(_) | Self::InvalidAttribute(_)
        )
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
