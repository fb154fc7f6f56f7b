//! # choreo-engine
//!
//! Drives a choreographed run from the test driver's side.
//!
//! - [`RuntimeEngine`] - node lifecycle, network partitions, clock drift and
//!   the `wait_for` / `enforce_order` helpers for test code
//! - [`ExternalEventTask`] - one task per driver-side event: wait for the
//!   turn, act, signal
//! - [`run`] - verifies the deployment, starts the coordination server and
//!   the nodes, spawns the tasks and owns the stop sequence
//!
//! ## Example
//!
//! ```ignore
//! let deployment = Deployment::from_file(Path::new("kv.toml"))?;
//! let config = EngineConfig::from_file(Path::new("choreo.toml"))?;
//!
//! let handle = choreo_engine::run(deployment, config).await?;
//! handle
//!     .wait_for_run_sequence_completion(Duration::from_secs(120), true)
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod faults;
pub mod run;
pub mod runtime;

pub use backend::{BackendCall, DockerBackend, ExecResult, MockBackend, NodeBackend};
pub use config::{EngineConfig, RuntimeConfig};
pub use error::{EngineError, Result, RuntimeError, RuntimeResult};
pub use events::{EventAction, ExternalEventTask};
pub use faults::PartitionRule;
pub use run::{run, run_with_backend, RunHandle};
pub use runtime::{NodeState, RuntimeEngine};
