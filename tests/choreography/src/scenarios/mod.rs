//! Choreography scenarios.
//!
//! - `ordering` - release order under randomized delays
//! - `protocol` - idempotent signals, completion, faults, receipt timeouts
//! - `gates` - scheduling BLOCK/UNBLOCK gates on checkpoints
//! - `runs` - driver-side runs against a mock node backend

#[cfg(test)]
mod gates;
#[cfg(test)]
mod ordering;
#[cfg(test)]
mod protocol;
#[cfg(test)]
mod runs;
