//! Health check endpoint.

use crate::coordinator::Coordinator;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status ("ok", "completed" or "aborted").
    pub status: String,
    /// Server version.
    pub version: String,
    /// Step currently awaited.
    pub cursor: usize,
    /// Number of steps in the run sequence.
    pub total_steps: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> Json<HealthStatus> {
    let run = coordinator.status();
    let status = if run.aborted.is_some() {
        "aborted"
    } else if run.completed {
        "completed"
    } else {
        "ok"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cursor: run.cursor,
        total_steps: run.total_steps,
        uptime_seconds: coordinator.uptime().as_secs(),
    })
}
