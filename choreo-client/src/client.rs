//! CoordinationClient - the participant side of the coordination protocol.
//!
//! Checkpoints and external event tasks call two operations around every
//! choreographed action:
//!
//! ```text
//! block_and_poll(name) → perform action → send_event(name)
//! ```
//!
//! Participants may be unreachable or crash silently, so waiting is a
//! bounded poll/backoff loop rather than a push notification. The receipt
//! timeout bounds how long a caller waits without seeing the run advance;
//! once exceeded the client aborts the run on the server and reports
//! [`ClientError::ReceiptTimeout`].

use choreo_types::{Fault, Request, Response, RunStatus};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::{Transport, TransportError};

/// Default receipt timeout.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The run did not advance toward `event` within the receipt timeout.
    #[error("no progress toward `{event}` within {waited:?}")]
    ReceiptTimeout {
        /// Event being waited for.
        event: String,
        /// The receipt timeout that elapsed.
        waited: Duration,
    },

    /// `wait_for` gave up before the event was satisfied.
    #[error("timed out waiting for `{event}`")]
    WaitTimeout {
        /// Event being waited for.
        event: String,
    },

    /// The run was aborted.
    #[error("run aborted: {reason}")]
    Aborted {
        /// Reason given by whoever aborted the run.
        reason: String,
    },

    /// The server does not know the event.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    /// A signal arrived before its step was reached.
    #[error("event `{event}` belongs to step {step} but step {cursor} is awaited")]
    OutOfOrder {
        /// Event name.
        event: String,
        /// Step of the event.
        step: usize,
        /// Step currently awaited.
        cursor: usize,
    },

    /// A checkpoint had to force garbage collection but no hook is installed.
    #[error("no garbage collection hook installed")]
    GcUnavailable,

    /// The server answered with something this call does not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<Fault> for ClientError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::UnknownEvent { event } => ClientError::UnknownEvent(event),
            Fault::OutOfOrder {
                event,
                step,
                cursor,
            } => ClientError::OutOfOrder {
                event,
                step,
                cursor,
            },
            Fault::Malformed { reason } => ClientError::Protocol(reason),
        }
    }
}

/// Bounded exponential backoff with jitter between polls.
///
/// Formula: min(max, min * 2^attempt) + random(0..=min/2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    /// First delay.
    pub min: Duration,
    /// Delay cap (before jitter).
    pub max: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(10),
            max: Duration::from_millis(500),
        }
    }
}

impl PollBackoff {
    /// Create a backoff between `min` and `max`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Delay before poll number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .min
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max);
        let jitter_cap = (self.min.as_millis() / 2) as u64;
        base + Duration::from_millis(random_jitter_ms(jitter_cap))
    }
}

/// Random jitter between 0 and `cap` milliseconds.
fn random_jitter_ms(cap: u64) -> u64 {
    if cap == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % (cap + 1),
        Err(_) => 0,
    }
}

/// Timing parameters of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTiming {
    /// How long a caller waits without seeing the run advance.
    pub receipt_timeout: Duration,
    /// Delay between polls.
    pub backoff: PollBackoff,
}

impl Default for ClientTiming {
    fn default() -> Self {
        Self {
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            backoff: PollBackoff::default(),
        }
    }
}

/// Participant handle to the coordination server.
#[derive(Debug, Clone)]
pub struct CoordinationClient<T: Transport> {
    transport: T,
    timing: ClientTiming,
}

impl<T: Transport> CoordinationClient<T> {
    /// Create a client with default timing.
    pub fn new(transport: T) -> Self {
        Self::with_timing(transport, ClientTiming::default())
    }

    /// Create a client with explicit timing.
    pub fn with_timing(transport: T, timing: ClientTiming) -> Self {
        Self { transport, timing }
    }

    /// Timing in effect.
    pub fn timing(&self) -> ClientTiming {
        self.timing
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Block until it is `event`'s turn.
    ///
    /// The receipt deadline restarts every time the server reports new
    /// progress, so a signal inside a concurrent step counts even when the
    /// cursor stays put. Transport failures are retried until the deadline. On timeout
    /// the run is aborted on the server (best effort) before returning.
    pub async fn block_and_poll(&self, event: &str) -> Result<(), ClientError> {
        let request = Request::Poll {
            event: event.to_string(),
        };
        let mut deadline = Instant::now() + self.timing.receipt_timeout;
        let mut last_progress = None;
        let mut attempt = 0u32;

        loop {
            match self.transport.request(&request).await {
                Ok(Response::Ready) => {
                    debug!(event, "released");
                    return Ok(());
                }
                Ok(Response::Wait { cursor, progress }) => {
                    if last_progress != Some(progress) {
                        last_progress = Some(progress);
                        deadline = Instant::now() + self.timing.receipt_timeout;
                        attempt = 0;
                    }
                    debug!(event, cursor, "waiting for turn");
                }
                Ok(Response::Aborted { reason }) => return Err(ClientError::Aborted { reason }),
                Ok(Response::Fault(fault)) => return Err(fault.into()),
                Ok(other) => return Err(unexpected(&request, &other)),
                Err(e) => warn!(event, error = %e, "poll failed, retrying"),
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = self.timing.receipt_timeout;
                warn!(event, ?waited, "receipt timeout, aborting run");
                let reason = format!("receipt timeout waiting for `{}`", event);
                if let Err(e) = self.abort(&reason).await {
                    warn!(event, error = %e, "abort after receipt timeout failed");
                }
                return Err(ClientError::ReceiptTimeout {
                    event: event.to_string(),
                    waited,
                });
            }

            let delay = self.timing.backoff.delay(attempt).min(deadline - now);
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
        }
    }

    /// Report that `event`'s action completed.
    ///
    /// Signals are idempotent on the server, so transport failures are
    /// retried until the receipt timeout.
    pub async fn send_event(&self, event: &str) -> Result<(), ClientError> {
        let request = Request::Signal {
            event: event.to_string(),
        };
        let deadline = Instant::now() + self.timing.receipt_timeout;
        let mut attempt = 0u32;

        loop {
            match self.transport.request(&request).await {
                Ok(Response::Ack { duplicate }) => {
                    if duplicate {
                        warn!(event, "duplicate signal");
                    } else {
                        debug!(event, "signaled");
                    }
                    return Ok(());
                }
                Ok(Response::Aborted { reason }) => return Err(ClientError::Aborted { reason }),
                Ok(Response::Fault(fault)) => return Err(fault.into()),
                Ok(other) => return Err(unexpected(&request, &other)),
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(e.into());
                    }
                    warn!(event, error = %e, "signal failed, retrying");
                    let delay = self.timing.backoff.delay(attempt).min(deadline - now);
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Whether `event` has been satisfied.
    pub async fn is_satisfied(&self, event: &str) -> Result<bool, ClientError> {
        let request = Request::Query {
            event: event.to_string(),
        };
        match self.transport.request(&request).await? {
            Response::Status(status) => Ok(status.is_satisfied()),
            Response::Aborted { reason } => Err(ClientError::Aborted { reason }),
            Response::Fault(fault) => Err(fault.into()),
            other => Err(unexpected(&request, &other)),
        }
    }

    /// Block until `event` is satisfied, or until `timeout` elapses.
    pub async fn wait_for(
        &self,
        event: &str,
        timeout: Option<Duration>,
    ) -> Result<(), ClientError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut attempt = 0u32;

        loop {
            if self.is_satisfied(event).await? {
                return Ok(());
            }

            let mut delay = self.timing.backoff.delay(attempt);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(ClientError::WaitTimeout {
                        event: event.to_string(),
                    });
                }
                delay = delay.min(deadline - now);
            }
            attempt = attempt.saturating_add(1);
            tokio::time::sleep(delay).await;
        }
    }

    /// Overall progress of the run.
    pub async fn run_status(&self) -> Result<RunStatus, ClientError> {
        match self.transport.request(&Request::Status).await? {
            Response::RunStatus(status) => Ok(status),
            other => Err(unexpected(&Request::Status, &other)),
        }
    }

    /// Whether every step of the run sequence has been satisfied.
    pub async fn is_run_sequence_completed(&self) -> Result<bool, ClientError> {
        Ok(self.run_status().await?.completed)
    }

    /// Abort the run on the server.
    pub async fn abort(&self, reason: &str) -> Result<(), ClientError> {
        let request = Request::Abort {
            reason: reason.to_string(),
        };
        match self.transport.request(&request).await? {
            Response::Aborted { .. } => Ok(()),
            other => Err(unexpected(&request, &other)),
        }
    }
}

fn unexpected(request: &Request, response: &Response) -> ClientError {
    ClientError::Protocol(format!(
        "unexpected response {:?} to {:?}",
        response, request
    ))
}
