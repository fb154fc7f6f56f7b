//! HTTP endpoints for choreo-server.
//!
//! Provides the coordination endpoint plus health, status and metrics.

pub mod health;
mod metrics;

use crate::config::HttpConfig;
use crate::coordinator::Coordinator;
use axum::{
    body::Bytes,
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Extension, Json, Router,
};
use choreo_types::{Fault, Request, Response, RunStatus, COORDINATE_PATH, MAX_MESSAGE_SIZE};
use std::sync::Arc;
use tracing::{error, warn};

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(coordinator: Arc<Coordinator>, config: &HttpConfig) -> Router {
    let mut router = Router::new()
        .route(COORDINATE_PATH, post(coordinate_handler))
        .route("/health", get(health::health_handler))
        .route("/status", get(status_handler));

    if config.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_MESSAGE_SIZE))
        .layer(Extension(coordinator))
}

/// Coordination endpoint: one MessagePack request in, one response out.
///
/// Undecodable bodies are answered with a `Malformed` fault, not an HTTP
/// error, so participants see every protocol failure the same way.
async fn coordinate_handler(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    body: Bytes,
) -> HttpResponse {
    let response = match Request::from_bytes(&body) {
        Ok(request) => coordinator.handle(request),
        Err(e) => {
            warn!(error = %e, "malformed coordination request");
            Response::Fault(Fault::Malformed {
                reason: e.to_string(),
            })
        }
    };

    match response.to_bytes() {
        Ok(bytes) => ([(CONTENT_TYPE, choreo_types::CONTENT_TYPE)], bytes).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode coordination response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Run progress as JSON.
async fn status_handler(Extension(coordinator): Extension<Arc<Coordinator>>) -> Json<RunStatus> {
    Json(coordinator.status())
}
