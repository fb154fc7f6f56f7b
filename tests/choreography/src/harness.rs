//! In-process coordination harness.
//!
//! Starts a coordinator and its HTTP server on an ephemeral port and hands
//! out participants connected over HTTP.

use choreo_client::{
    Checkpoints, ClientTiming, CoordinationClient, HttpTransport, PollBackoff, TransportError,
};
use choreo_core::{instrumentation_plan, verify_or_err, DeclarationError, Deployment, LoadError};
use choreo_server::{Coordinator, ServerConfig, ServerError, ServerHandle};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from harness setup.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The deployment did not parse.
    #[error("deployment error: {0}")]
    Load(#[from] LoadError),

    /// The deployment failed verification.
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    /// The server did not start.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// A participant transport could not be built.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The deployment does not declare the node.
    #[error("unknown node `{0}`")]
    UnknownNode(String),
}

/// A coordination server serving one deployment.
pub struct ChoreoHarness {
    deployment: Deployment,
    coordinator: Arc<Coordinator>,
    server: ServerHandle,
}

impl ChoreoHarness {
    /// Verify `toml` as a deployment and start serving it.
    pub async fn start(toml: &str) -> Result<Self, HarnessError> {
        let deployment = Deployment::from_toml_str(toml)?;
        verify_or_err(&deployment)?;

        let mut config = ServerConfig::default();
        config.server.bind_address = "127.0.0.1:0".to_string();

        let coordinator = Arc::new(Coordinator::from_deployment(&deployment));
        let server = ServerHandle::start(&config, coordinator.clone()).await?;

        Ok(Self {
            deployment,
            coordinator,
            server,
        })
    }

    /// The deployment being served.
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// The server's coordinator, for assertions.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// `host:port` of the server.
    pub fn address(&self) -> String {
        self.server.local_addr().to_string()
    }

    /// A participant connected over HTTP.
    pub fn client(
        &self,
        receipt_timeout: Duration,
    ) -> Result<CoordinationClient<HttpTransport>, HarnessError> {
        participant(&self.address(), receipt_timeout)
    }

    /// Checkpoints of `node`, built from the deployment's instrumentation plan.
    pub fn checkpoints(
        &self,
        node: &str,
        receipt_timeout: Duration,
    ) -> Result<Checkpoints<HttpTransport>, HarnessError> {
        node_checkpoints(&self.deployment, node, &self.address(), receipt_timeout)
    }

    /// Stop the server.
    pub async fn shutdown(self) -> Result<(), HarnessError> {
        self.server.shutdown().await?;
        Ok(())
    }
}

/// A participant for the server at `address`, polling quickly.
pub fn participant(
    address: &str,
    receipt_timeout: Duration,
) -> Result<CoordinationClient<HttpTransport>, HarnessError> {
    let transport = HttpTransport::new(address)?;
    Ok(CoordinationClient::with_timing(
        transport,
        ClientTiming {
            receipt_timeout,
            backoff: PollBackoff::new(Duration::from_millis(2), Duration::from_millis(50)),
        },
    ))
}

/// Checkpoints of `node` talking to the server at `address`.
pub fn node_checkpoints(
    deployment: &Deployment,
    node: &str,
    address: &str,
    receipt_timeout: Duration,
) -> Result<Checkpoints<HttpTransport>, HarnessError> {
    let mut plan = instrumentation_plan(deployment);
    let definitions = plan
        .remove(node)
        .ok_or_else(|| HarnessError::UnknownNode(node.to_string()))?;
    Ok(Checkpoints::new(
        participant(address, receipt_timeout)?,
        definitions,
    ))
}

/// Sleep for a random duration up to `max_ms` milliseconds.
pub async fn random_delay(max_ms: u64) {
    let ms = rand::thread_rng().gen_range(0..=max_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
