//! Transport abstraction for the coordination protocol.
//!
//! Every protocol exchange is a single request answered by a single
//! response, so the trait is one method. Implementations:
//! - [`HttpTransport`]: MessagePack over HTTP POST (checkpoints in node processes)
//! - [`MockTransport`]: scripted responses for tests
//!
//! # Example
//!
//! ```ignore
//! let transport = HttpTransport::new("10.0.0.1:7400")?;
//! let response = transport.request(&Request::Poll { event: "e1".into() }).await?;
//! ```

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use choreo_types::{Request, Response, WireError};
use std::sync::Arc;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The server answered with a non-success HTTP status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Encoding the request or decoding the response failed.
    #[error("codec error: {0}")]
    Codec(#[from] WireError),

    /// No scripted response left (mock) or the connection closed mid-request.
    #[error("connection closed")]
    ConnectionClosed,

    /// The request timed out.
    #[error("request timeout")]
    Timeout,
}

/// Carries one protocol request to the coordination server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and wait for the server's answer.
    async fn request(&self, request: &Request) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).request(request).await
    }
}
