//! # choreo-types
//!
//! Wire format types for the choreo coordination protocol.
//!
//! Every participant of a choreographed run (checkpoints compiled into node
//! processes, external event tasks in the driver) talks to the coordination
//! server with exactly these messages:
//! - [`Request::Poll`] → [`Response::Ready`] / [`Response::Wait`]
//! - [`Request::Signal`] → [`Response::Ack`] (idempotent)
//! - [`Request::Query`] → [`Response::Status`]
//! - [`Request::Status`] → [`Response::RunStatus`]
//! - [`Request::Abort`] → [`Response::Aborted`]
//!
//! Messages are MessagePack encoded and carried as HTTP request bodies.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod messages;

pub use error::WireError;
pub use messages::{EventStatus, Fault, Request, Response, RunStatus};

/// HTTP path of the coordination endpoint.
pub const COORDINATE_PATH: &str = "/v1/coordinate";

/// Content type of encoded protocol messages.
pub const CONTENT_TYPE: &str = "application/msgpack";

/// Maximum encoded message size accepted by the server (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Environment variable carrying the coordination server address (`host:port`).
pub const ENV_SERVER_ADDR: &str = "CHOREO_SERVER_ADDR";

/// Environment variable carrying the node name a process runs as.
pub const ENV_NODE: &str = "CHOREO_NODE";

/// Environment variable carrying the receipt timeout in milliseconds.
pub const ENV_RECEIPT_TIMEOUT_MS: &str = "CHOREO_RECEIPT_TIMEOUT_MS";

/// Environment variable carrying the shortest delay between polls in milliseconds.
pub const ENV_POLL_MIN_MS: &str = "CHOREO_POLL_MIN_MS";

/// Environment variable carrying the longest delay between polls in milliseconds.
pub const ENV_POLL_MAX_MS: &str = "CHOREO_POLL_MAX_MS";

/// Environment variable carrying the `:`-separated instrumentable path list.
pub const ENV_INSTRUMENTABLE_PATHS: &str = "CHOREO_INSTRUMENTABLE_PATHS";

/// Environment variable carrying the `:`-separated library path list.
pub const ENV_LIBRARY_PATHS: &str = "CHOREO_LIBRARY_PATHS";
