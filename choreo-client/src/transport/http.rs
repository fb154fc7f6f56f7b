//! HTTP transport: one POST per protocol message.

use super::{Transport, TransportError};
use async_trait::async_trait;
use choreo_types::{Request, Response, CONTENT_TYPE, COORDINATE_PATH};
use std::time::Duration;

/// Per-request timeout. A single exchange is small; anything slower is
/// treated as a lost message and retried by the caller.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// MessagePack over HTTP to a coordination server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for the server at `address` (`host:port`).
    pub fn new(address: &str) -> Result<Self, TransportError> {
        Self::with_timeout(address, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a transport with an explicit per-request timeout.
    pub fn with_timeout(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("http://{}{}", address, COORDINATE_PATH),
        })
    }

    /// Full URL of the coordination endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: &Request) -> Result<Response, TransportError> {
        let body = request.to_bytes()?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(Response::from_bytes(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_targets_coordinate_path() {
        let transport = HttpTransport::new("127.0.0.1:7400").unwrap();
        assert_eq!(transport.url(), "http://127.0.0.1:7400/v1/coordinate");
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_failure() {
        // Port 9 (discard) is not listening on loopback in test environments.
        let transport =
            HttpTransport::with_timeout("127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let result = transport.request(&Request::Status).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectionFailed(_)) | Err(TransportError::Timeout)
        ));
    }
}
