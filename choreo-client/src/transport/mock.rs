//! Mock transport for testing.
//!
//! Allows queueing responses and capturing sent requests for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use choreo_types::{Request, Response};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Mock transport for testing.
///
/// Queued responses are returned first, in order; once the queue is empty
/// the fallback response (if set) is returned for every request.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    requests: Vec<Request>,
    responses: VecDeque<Response>,
    fallback: Option<Response>,
    fail_next: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next request.
    pub fn queue_response(&self, response: Response) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.push_back(response);
    }

    /// Answer every request with `response` once the queue is drained.
    pub fn respond_with(&self, response: Response) {
        let mut inner = self.inner.lock().unwrap();
        inner.fallback = Some(response);
    }

    /// Get all requests that were sent.
    pub fn requests(&self) -> Vec<Request> {
        let inner = self.inner.lock().unwrap();
        inner.requests.clone()
    }

    /// Get the last request that was sent.
    pub fn last_request(&self) -> Option<Request> {
        let inner = self.inner.lock().unwrap();
        inner.requests.last().cloned()
    }

    /// Cause the next request to fail with the given error.
    pub fn fail_next_request(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next = Some(error.to_string());
    }

    /// Clear all state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: &Request) -> Result<Response, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.requests.push(request.clone());
        match inner.responses.pop_front() {
            Some(response) => Ok(response),
            None => inner
                .fallback
                .clone()
                .ok_or(TransportError::ConnectionClosed),
        }
    }
}
