//! Protocol messages exchanged between participants and the coordination server.

use serde::{Deserialize, Serialize};

use crate::{WireError, MAX_MESSAGE_SIZE};

/// Completion status of a single event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// The event has not been signaled yet.
    Pending,
    /// The event has been signaled.
    Satisfied,
}

impl EventStatus {
    /// Returns true for [`EventStatus::Satisfied`].
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Snapshot of the run's progress through its run sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Index of the step currently awaited (equals `total_steps` once completed).
    pub cursor: usize,
    /// Number of steps in the run sequence.
    pub total_steps: usize,
    /// Whether every step has been satisfied.
    pub completed: bool,
    /// Reason the run was aborted, if it was.
    pub aborted: Option<String>,
}

/// Participant → server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Ask whether it is `event`'s turn. Repeatable.
    Poll {
        /// Event name.
        event: String,
    },
    /// Report that `event`'s action completed. Idempotent.
    Signal {
        /// Event name.
        event: String,
    },
    /// Ask for the completion status of `event`.
    Query {
        /// Event name.
        event: String,
    },
    /// Ask for the run's overall progress.
    Status,
    /// Tell the server the run cannot continue.
    Abort {
        /// Human-readable reason, logged by the server.
        reason: String,
    },
}

/// Protocol violations reported back to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    /// The name is not declared anywhere in the deployment.
    UnknownEvent {
        /// Event name.
        event: String,
    },
    /// A signal arrived for a step that has not been reached yet.
    OutOfOrder {
        /// Event name.
        event: String,
        /// Step the event belongs to.
        step: usize,
        /// Step currently awaited.
        cursor: usize,
    },
    /// The request body could not be decoded.
    Malformed {
        /// Decoder message.
        reason: String,
    },
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::UnknownEvent { event } => write!(f, "unknown event `{}`", event),
            Fault::OutOfOrder {
                event,
                step,
                cursor,
            } => write!(
                f,
                "event `{}` belongs to step {} but step {} is awaited",
                event, step, cursor
            ),
            Fault::Malformed { reason } => write!(f, "malformed request: {}", reason),
        }
    }
}

/// Server → participant messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// It is the polled event's turn.
    Ready,
    /// Not yet; `cursor` is the step currently awaited.
    Wait {
        /// Step currently awaited.
        cursor: usize,
        /// Sequenced events satisfied so far; grows with every accepted
        /// signal, even when a concurrent step stays open.
        progress: usize,
    },
    /// Signal accepted.
    Ack {
        /// True when the event was already satisfied (no state change).
        duplicate: bool,
    },
    /// Status of a queried event.
    Status(EventStatus),
    /// Overall run progress.
    RunStatus(RunStatus),
    /// The run has been aborted; participants must stop waiting.
    Aborted {
        /// Reason given by whoever aborted the run.
        reason: String,
    },
    /// The request violated the protocol.
    Fault(Fault),
}

macro_rules! codec {
    ($ty:ty) => {
        impl $ty {
            /// Serialize to MessagePack bytes.
            pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
                let bytes = rmp_serde::to_vec_named(self).map_err(WireError::Serialization)?;
                if bytes.len() > MAX_MESSAGE_SIZE {
                    return Err(WireError::TooLarge {
                        size: bytes.len(),
                        limit: MAX_MESSAGE_SIZE,
                    });
                }
                Ok(bytes)
            }

            /// Deserialize from MessagePack bytes.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
                if bytes.len() > MAX_MESSAGE_SIZE {
                    return Err(WireError::TooLarge {
                        size: bytes.len(),
                        limit: MAX_MESSAGE_SIZE,
                    });
                }
                rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
            }
        }
    };
}

codec!(Request);
codec!(Response);

impl Request {
    /// The event name this request is about, if any.
    pub fn event(&self) -> Option<&str> {
        match self {
            Request::Poll { event } | Request::Signal { event } | Request::Query { event } => {
                Some(event)
            }
            Request::Status | Request::Abort { .. } => None,
        }
    }
}
