//! Error types for choreo-engine.

use choreo_core::DeclarationError;
use choreo_server::{ConfigError, ServerError};
use std::time::Duration;
use thiserror::Error;

/// A fault or lifecycle command failed at the infrastructure layer.
///
/// Reported to the caller; does not by itself stop the run.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Docker API error.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Command execution failed inside a node.
    #[error("exec failed on {node}: exit={exit_code}, stderr={stderr}")]
    ExecFailed {
        /// Node name.
        node: String,
        /// Exit code from command.
        exit_code: i64,
        /// Standard error output.
        stderr: String,
    },

    /// The deployment does not declare the node.
    #[error("unknown node `{0}`")]
    UnknownNode(String),

    /// The deployment does not declare the workload.
    #[error("unknown workload `{0}`")]
    UnknownWorkload(String),

    /// A node has no network address.
    #[error("no network address for node `{0}`")]
    AddressUnavailable(String),

    /// The backend refused or failed a command.
    #[error("backend error: {0}")]
    Backend(String),

    /// General I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a choreographed run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unresolved or duplicate names; fatal before anything starts.
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    /// No signal for the awaited step within the receipt timeout.
    #[error("protocol timeout: no progress toward `{event}` within {waited:?}")]
    ProtocolTimeout {
        /// Event being waited for.
        event: String,
        /// The receipt timeout that elapsed.
        waited: Duration,
    },

    /// An external event's action failed.
    #[error("action for `{event}` failed: {reason}")]
    ActionExecution {
        /// Event whose action failed.
        event: String,
        /// What went wrong.
        reason: String,
    },

    /// A participant aborted the run.
    #[error("run aborted: {reason}")]
    Aborted {
        /// Reason given by the participant.
        reason: String,
    },

    /// The run sequence did not complete in time.
    #[error("run sequence not completed within {0:?}")]
    CompletionTimeout(Duration),

    /// Infrastructure command failed.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Coordination server error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for runtime engine operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
