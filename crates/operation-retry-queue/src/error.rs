//! Queue error types.

use thiserror::Error;

/// Queue error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// IO error while reading or writing the queue file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted bytes could not be decoded
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by an [`HttpTransport`](crate::HttpTransport).
///
/// A connection failure is distinct from a valid-but-erroneous HTTP status,
/// which is reported as a normal response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request never produced a response (DNS, connect, timeout, TLS).
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The request could not be built or sent as given.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Reasons a submission is refused before it ever enters the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The queue already holds `capacity` pending operations.
    #[error("Retry queue is full ({capacity} pending operations)")]
    QueueFull { capacity: usize },

    /// Read operations are refused while the connection is unhealthy.
    #[error("Connection is unhealthy, read operation refused")]
    UnhealthyConnection,

    /// The background worker has stopped.
    #[error("Client is shut down")]
    ShutDown,
}
