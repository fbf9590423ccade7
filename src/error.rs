use serde::{Deserialize, Serialize};

use crate::types::EndpointId;

/// Errors surfaced to callers *before* any delivery begins.
///
/// Once an event is enqueued, nothing about a receiver's behavior is ever
/// raised back to the producer; attempt-level failures live on the delivery
/// records instead.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Endpoint registration was rejected synchronously.
    #[error("invalid endpoint configuration: {0}")]
    Validation(String),

    /// Delivery queue is at capacity. The caller decides whether to drop,
    /// log, or retry later.
    #[error("delivery queue at capacity")]
    QueueFull,

    /// No endpoint registered under this id.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(EndpointId),

    /// The delivery service has been shut down.
    #[error("delivery service is shut down")]
    Shutdown,
}

/// How a single HTTP delivery attempt failed.
///
/// Recorded on the delivery record; timeouts and connection errors are
/// treated exactly like a non-2xx status for retry purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The attempt exceeded the endpoint's configured timeout.
    Timeout,

    /// The connection could not be established or broke mid-request.
    Connection,

    /// The receiver answered with a non-2xx status.
    Status(u16),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "request timed out"),
            FailureKind::Connection => write!(f, "connection error"),
            FailureKind::Status(code) => write!(f, "HTTP {code}"),
        }
    }
}
