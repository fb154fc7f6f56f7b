//! Instrumentation plan and the instrumentor interface.
//!
//! The instrumentor itself (rewriting node binaries so checkpoints call into
//! the coordination client) is an external collaborator. This module decides
//! *what* each node's checkpoints must do and hands that to an
//! [`Instrumentor`] implementation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{Deployment, InternalEvent, Position, SchedulingOperation};

/// Errors reported by an instrumentor.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// The workspace does not exist or is not usable.
    #[error("invalid workspace {path}: {reason}")]
    Workspace {
        /// Workspace path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
    /// A code location could not be found in the instrumentable paths.
    #[error("location `{0}` not found")]
    LocationNotFound(String),
    /// The instrumentation tool failed.
    #[error("instrumentation failed: {0}")]
    Failed(String),
}

/// Where a definition applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentationPoint {
    /// A named code location.
    Location {
        /// Code location name.
        location: String,
        /// Before or after it executes.
        position: Position,
    },
    /// A node-resident background agent, independent of any code location.
    Background,
}

/// One step a checkpoint performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Call `block_and_poll(name)`.
    BlockAndPoll(String),
    /// Call `send_event(name)`.
    SendEvent(String),
    /// If `block` is satisfied and `unblock` is not, wait for `unblock`.
    Gate {
        /// The BLOCK scheduling event.
        block: String,
        /// The UNBLOCK scheduling event.
        unblock: String,
    },
    /// Ask the node's runtime to collect garbage.
    ForceGarbageCollection,
}

/// A point paired with the operations run there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationDefinition {
    /// Where the operations run.
    pub point: InstrumentationPoint,
    /// Which hit of the point runs the operations (1-based); every hit when `None`.
    pub occurrence: Option<u32>,
    /// Operations, in order.
    pub operations: Vec<Operation>,
}

/// External collaborator inserting checkpoint calls into target code.
pub trait Instrumentor {
    /// Instrument the code under `workspace` according to `definitions`.
    fn instrument(
        &self,
        workspace: &Path,
        definitions: &[InstrumentationDefinition],
    ) -> Result<(), InstrumentError>;
}

/// Compute the definitions for every node, keyed by node name.
///
/// Per node, gates come first so a thread held by a gate has not yet entered
/// the target's own block-and-poll. Stack trace events block and signal
/// before their location; garbage collection events run on the background
/// agent. BLOCK/UNBLOCK names are signaled driver-side and never appear as
/// block-and-poll operations here.
pub fn instrumentation_plan(
    deployment: &Deployment,
) -> BTreeMap<String, Vec<InstrumentationDefinition>> {
    let mut plan = BTreeMap::new();

    for node in &deployment.nodes {
        let mut gates = Vec::new();
        let mut checkpoints = Vec::new();
        let mut background = Vec::new();

        for event in &node.events {
            match event {
                InternalEvent::StackTrace {
                    name,
                    location,
                    occurrence,
                } => checkpoints.push(InstrumentationDefinition {
                    point: InstrumentationPoint::Location {
                        location: location.clone(),
                        position: Position::Before,
                    },
                    occurrence: Some(occurrence.unwrap_or(1)),
                    operations: vec![
                        Operation::BlockAndPoll(name.clone()),
                        Operation::SendEvent(name.clone()),
                    ],
                }),
                InternalEvent::Scheduling {
                    name,
                    operation: SchedulingOperation::Block,
                    position,
                    target,
                } => {
                    let unblock = node.events.iter().find_map(|candidate| match candidate {
                        InternalEvent::Scheduling {
                            name: unblock,
                            operation: SchedulingOperation::Unblock,
                            position: p,
                            target: t,
                        } if p == position && t == target => Some(unblock.clone()),
                        _ => None,
                    });
                    let location = node.events.iter().find_map(|candidate| match candidate {
                        InternalEvent::StackTrace { name, location, .. } if name == target => {
                            Some(location.clone())
                        }
                        _ => None,
                    });
                    // A lone BLOCK has nothing to wait for; unresolved targets
                    // are reported by the verifier.
                    if let (Some(unblock), Some(location)) = (unblock, location) {
                        gates.push(InstrumentationDefinition {
                            point: InstrumentationPoint::Location {
                                location,
                                position: *position,
                            },
                            occurrence: None,
                            operations: vec![Operation::Gate {
                                block: name.clone(),
                                unblock,
                            }],
                        });
                    }
                }
                InternalEvent::Scheduling { .. } => {}
                InternalEvent::GarbageCollection { name } => {
                    background.push(InstrumentationDefinition {
                        point: InstrumentationPoint::Background,
                        occurrence: Some(1),
                        operations: vec![
                            Operation::BlockAndPoll(name.clone()),
                            Operation::ForceGarbageCollection,
                            Operation::SendEvent(name.clone()),
                        ],
                    })
                }
            }
        }

        let mut definitions = gates;
        definitions.extend(checkpoints);
        definitions.extend(background);
        plan.insert(node.name.clone(), definitions);
    }

    plan
}

/// Names of scheduling events, signaled by driver-side marker tasks.
pub fn scheduling_event_names(deployment: &Deployment) -> Vec<&str> {
    deployment
        .nodes
        .iter()
        .flat_map(|n| n.events.iter())
        .filter(|e| matches!(e, InternalEvent::Scheduling { .. }))
        .map(InternalEvent::name)
        .collect()
}
