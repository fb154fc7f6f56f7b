//! # choreo-core
//!
//! Pure logic for choreo (no network I/O, instant tests).
//!
//! This crate holds everything about a choreographed run that can be decided
//! without talking to a node:
//! - [`Deployment`] - the immutable declaration graph (services, nodes,
//!   internal and external events, the run sequence)
//! - [`verify`] - static checks run before anything is provisioned
//! - [`RunSequence`] - the declared order, parsed from its textual form
//! - [`Scheduler`] - the state machine that walks the run sequence
//! - [`instrumentation_plan`] - what each node's checkpoints must do
//!
//! ## Design Philosophy
//!
//! The scheduler takes signals as input and returns transitions; the
//! coordination server owns the only instance and serializes every call to it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod instrument;
pub mod model;
pub mod scheduler;
pub mod sequence;
pub mod verify;

pub use instrument::{
    instrumentation_plan, scheduling_event_names, InstrumentError, InstrumentationDefinition,
    InstrumentationPoint, Instrumentor, Operation,
};
pub use model::{
    Deployment, EventRef, ExternalEvent, InternalEvent, LoadError, Node, Position,
    SchedulingOperation, Service, Workload,
};
pub use scheduler::{Scheduler, SchedulerError, SchedulerState, SignalOutcome};
pub use sequence::{RunSequence, SequenceParseError, Step};
pub use verify::{verify, verify_or_err, DeclarationError, EntityKind, VerificationError};
