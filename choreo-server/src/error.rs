//! Error types for choreo-server.

use choreo_types::Fault;
use std::time::Duration;

/// Main error type for choreo-server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Binding the listener failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that could not be bound.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The server task failed or panicked.
    #[error("server task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from in-process waits on the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The run did not advance toward the event within the receipt timeout.
    #[error("no progress toward `{event}` within {waited:?}")]
    ReceiptTimeout {
        /// Event being waited for.
        event: String,
        /// The receipt timeout that elapsed.
        waited: Duration,
    },

    /// A bounded wait elapsed before the event was satisfied.
    #[error("timed out waiting for `{event}`")]
    Timeout {
        /// Event being waited for.
        event: String,
    },

    /// The run was aborted.
    #[error("run aborted: {reason}")]
    Aborted {
        /// Reason given by whoever aborted the run.
        reason: String,
    },

    /// The request violated the protocol.
    #[error("protocol fault: {0}")]
    Fault(Fault),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for coordinator waits.
pub type WaitResult<T> = std::result::Result<T, WaitError>;
