//! Node backend abstraction.
//!
//! The runtime engine drives node processes through this trait:
//! - [`DockerBackend`]: containers of a Docker Compose project, via bollard
//! - [`MockBackend`]: records calls for tests

mod docker;
mod mock;

pub use docker::DockerBackend;
pub use mock::{BackendCall, MockBackend};

use crate::error::RuntimeResult;
use async_trait::async_trait;
use std::time::Duration;

/// Result of executing a command inside a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code.
    pub exit_code: i64,
}

impl ExecResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Lifecycle and command execution for the nodes of a deployment.
#[async_trait]
pub trait NodeBackend: Send + Sync {
    /// Start `node`.
    async fn start(&self, node: &str) -> RuntimeResult<()>;

    /// Stop `node`, letting it shut down for up to `grace`.
    async fn stop(&self, node: &str, grace: Duration) -> RuntimeResult<()>;

    /// Kill `node` immediately.
    async fn kill(&self, node: &str) -> RuntimeResult<()>;

    /// Restart `node`, letting it shut down for up to `grace`.
    async fn restart(&self, node: &str, grace: Duration) -> RuntimeResult<()>;

    /// Run `cmd` inside `node`.
    async fn exec(&self, node: &str, cmd: &[String]) -> RuntimeResult<ExecResult>;

    /// Network address of `node`.
    async fn address(&self, node: &str) -> RuntimeResult<String>;
}
