//! Error types for transports and the scheduler.

use bytes::Bytes;
use thiserror::Error;

use crate::cancel::CancelReason;
use crate::queue::RequestId;

/// Failures reported by a [`Transport`](crate::transport::Transport) for a single transfer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established or was reset.
    #[error("connection to {url} failed: {reason}")]
    Connection {
        /// Target URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// The transfer exceeded the transport's timeout.
    #[error("transfer to {url} timed out")]
    TimedOut {
        /// Target URL
        url: String,
    },

    /// The request could not be built or sent.
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Target URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// The response body could not be read to the end.
    #[error("reading response body from {url} failed: {reason}")]
    Body {
        /// Target URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// I/O error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Errors settling a scheduled request, or reported by the scheduler itself.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The operation's endpoint or content could not be turned into a request.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What was wrong with it
        reason: String,
    },

    /// The transport failed before a status was received.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The response status is outside the operation's accepted ranges.
    #[error("unexpected status code {status}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body, for the operation's error decoding
        body: Bytes,
    },

    /// The request was cancelled before it settled.
    #[error("request {request_id} cancelled: {reason}")]
    Cancelled {
        /// Cancelled request
        request_id: RequestId,
        /// Why it was cancelled
        reason: CancelReason,
    },

    /// The caller's deadline ran out.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Timed out request
        request_id: RequestId,
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// The response body could not be decoded.
    #[error("decode error: {reason}")]
    Decode {
        /// Decoder failure
        reason: String,
    },

    /// The scheduler no longer accepts work.
    #[error("scheduler is shut down")]
    ShutDown,

    /// The traffic store could not be read or written.
    #[error("traffic store error: {reason}")]
    Store {
        /// Underlying failure
        reason: String,
    },

    /// I/O error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Decode {
            reason: e.to_string(),
        }
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
