//! Error types for ws-remote.

use thiserror::Error;

/// Main error type for all send operations.
#[derive(Debug, Error)]
pub enum SendError {
    /// I/O error during transport writes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol violation (fragmentation misuse, oversized control payload, etc.).
    ///
    /// Rejected at admission; the connection and any open fragmented
    /// message are unaffected.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Connection closed: the transport is gone and every pending or
    /// future request on this connection fails with this error.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Write deadline exceeded while a request was in flight.
    #[error("Write timed out")]
    Timeout,

    /// Request cancelled by the caller before its write started.
    #[error("Write cancelled")]
    Cancelled,

    /// Backpressure timeout - outbound queue stayed full too long.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl SendError {
    /// Cloneable discriminant for carrying the error kind inside a
    /// [`WriteResult`](crate::completion::WriteResult) (`std::io::Error`
    /// itself is not `Clone`).
    pub fn kind(&self) -> SendErrorKind {
        match self {
            SendError::Io(_) => SendErrorKind::Io,
            SendError::Protocol(_) => SendErrorKind::Protocol,
            SendError::ConnectionClosed => SendErrorKind::ConnectionClosed,
            SendError::Timeout => SendErrorKind::Timeout,
            SendError::Cancelled => SendErrorKind::Cancelled,
            SendError::BackpressureTimeout => SendErrorKind::BackpressureTimeout,
        }
    }
}

/// Cloneable error discriminant used inside write results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Transport I/O fault.
    Io,
    /// Protocol violation at admission.
    Protocol,
    /// Connection closed.
    ConnectionClosed,
    /// Write deadline exceeded.
    Timeout,
    /// Cancelled before the write started.
    Cancelled,
    /// Outbound queue stayed full past the configured timeout.
    BackpressureTimeout,
}

impl From<SendErrorKind> for SendError {
    fn from(kind: SendErrorKind) -> Self {
        match kind {
            SendErrorKind::Io => SendError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transport write failed",
            )),
            SendErrorKind::Protocol => SendError::Protocol("protocol violation".to_string()),
            SendErrorKind::ConnectionClosed => SendError::ConnectionClosed,
            SendErrorKind::Timeout => SendError::Timeout,
            SendErrorKind::Cancelled => SendError::Cancelled,
            SendErrorKind::BackpressureTimeout => SendError::BackpressureTimeout,
        }
    }
}

/// Result type alias using SendError.
pub type Result<T> = std::result::Result<T, SendError>;
