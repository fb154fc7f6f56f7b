//! # choreo-client
//!
//! Participant side of the choreo coordination protocol.
//!
//! Checkpoints compiled into node processes use this crate to wait for their
//! turn and to report completed actions.
//!
//! ## Features
//!
//! - **CoordinationClient**: `block_and_poll`, `send_event`, `wait_for`
//! - **Transport Abstraction**: pluggable transport layer (HTTP, mock)
//! - **Checkpoints**: executes a node's instrumentation definitions
//! - **Process Context**: one installed context per node process
//!
//! ## Example
//!
//! ```ignore
//! use choreo_client::{CoordinationClient, HttpTransport};
//!
//! let client = CoordinationClient::new(HttpTransport::new("10.0.0.1:7400")?);
//! client.block_and_poll("e1").await?;
//! // ... perform the action tied to e1
//! client.send_event("e1").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod client;
pub mod context;
pub mod transport;

pub use checkpoint::{Checkpoints, GcHook};
pub use client::{
    ClientError, ClientTiming, CoordinationClient, PollBackoff, DEFAULT_RECEIPT_TIMEOUT,
};
pub use context::{ContextError, ContextGuard, ProcessConfig, SharedCheckpoints};
pub use transport::{HttpTransport, MockTransport, Transport, TransportError};
