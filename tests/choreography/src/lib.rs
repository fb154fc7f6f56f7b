//! # choreography-tests
//!
//! End-to-end tests for choreo.
//!
//! Every scenario runs a real coordination server in-process and talks to it
//! over HTTP the way checkpoints inside node processes do:
//! - Ordering under randomized delays
//! - Idempotent signals and single completion
//! - Receipt timeouts and aborts
//! - Scheduling gates
//! - Driver-side runs with a mock node backend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertions;
pub mod harness;

pub mod scenarios;
