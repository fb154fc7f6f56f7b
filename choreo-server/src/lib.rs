//! # choreo-server
//!
//! Coordination server for choreographed runs.
//!
//! This crate implements the server that:
//! - Owns the single-writer event table and the run-sequence scheduler
//! - Answers POLL/SIGNAL/QUERY/STATUS/ABORT from every participant
//! - Wakes in-process waiters through a watch channel
//! - Exposes health, status and Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! checkpoint (node n1) ──┐                  ┌── external event task
//!                        │  POST /v1/...    │   (in-process)
//!                        ▼                  ▼
//!              ┌──────────────────────────────────┐
//!              │           Coordinator            │
//!              │  Mutex<Scheduler> + watch<gen>   │
//!              └──────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;

pub use config::{ConfigError, HttpConfig, ListenConfig, ProtocolConfig, ServerConfig};
pub use coordinator::{Coordinator, CoordinatorMetrics};
pub use error::{Result, ServerError, WaitError, WaitResult};
pub use http::build_router;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

/// Serve `coordinator` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    config: &HttpConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(coordinator, config);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// A server running on a background task.
#[derive(Debug)]
pub struct ServerHandle {
    address: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Bind `config.server.bind_address` and start serving.
    pub async fn start(config: &ServerConfig, coordinator: Arc<Coordinator>) -> Result<Self> {
        let bind = &config.server.bind_address;
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| ServerError::Bind {
                address: bind.clone(),
                source,
            })?;
        let address = listener.local_addr()?;
        let (tx, rx) = oneshot::channel();
        let http = config.http.clone();

        let task = tokio::spawn(async move {
            serve(listener, coordinator, &http, async {
                let _ = rx.await;
            })
            .await
        });

        info!(%address, "coordination server listening");
        Ok(Self {
            address,
            shutdown: Some(tx),
            task,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let result = (&mut self.task)
            .await
            .map_err(|e| ServerError::Task(e.to_string()))?;
        info!(address = %self.address, "coordination server stopped");
        result
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
