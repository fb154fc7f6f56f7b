//! Static checks run once before anything is provisioned or started.
//!
//! Verification is pure: it only reads the [`Deployment`]. Every check is
//! independent and all errors are collected, so a single pass reports every
//! offending reference.

use std::collections::HashSet;
use thiserror::Error;

use crate::model::{Deployment, ExternalEvent, InternalEvent};

/// Kind of entity an error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A service declaration.
    Service,
    /// A node declaration.
    Node,
    /// A workload declaration.
    Workload,
    /// An internal or external event.
    Event,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EntityKind::Service => "service",
            EntityKind::Node => "node",
            EntityKind::Workload => "workload",
            EntityKind::Event => "event",
        };
        f.write_str(label)
    }
}

/// One offending reference or declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// A reference to a name that is not declared.
    #[error("{kind} `{name}` referenced by {referrer} is not declared")]
    Unresolved {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// The missing name.
        name: String,
        /// Who referenced it.
        referrer: String,
    },
    /// A name declared more than once.
    #[error("{kind} `{name}` is declared more than once (again by {referrer})")]
    Duplicate {
        /// Kind of the duplicated entity.
        kind: EntityKind,
        /// The duplicated name.
        name: String,
        /// The second declaration.
        referrer: String,
    },
    /// A scheduling event whose target is not a stack trace event on its node.
    #[error("event `{name}` targeted by {referrer} is not a stack trace event on node `{node}`")]
    InvalidSchedulingTarget {
        /// The target name.
        name: String,
        /// The scheduling event.
        referrer: String,
        /// Node owning the scheduling event.
        node: String,
    },
}

/// All verification errors of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("deployment declaration is invalid: {}", summarize(.errors))]
pub struct DeclarationError {
    /// Every offending reference.
    pub errors: Vec<VerificationError>,
}

fn summarize(errors: &[VerificationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run every check and collect the errors.
pub fn verify(deployment: &Deployment) -> Vec<VerificationError> {
    let mut errors = Vec::new();
    check_duplicates(deployment, &mut errors);
    check_node_services(deployment, &mut errors);
    check_node_references(deployment, &mut errors);
    check_run_sequence(deployment, &mut errors);
    check_scheduling_targets(deployment, &mut errors);
    errors
}

/// [`verify`], converted into a `Result`.
pub fn verify_or_err(deployment: &Deployment) -> Result<(), DeclarationError> {
    let errors = verify(deployment);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DeclarationError { errors })
    }
}

fn push_duplicates(
    kind: EntityKind,
    names: Vec<(&str, String)>,
    errors: &mut Vec<VerificationError>,
) {
    let mut seen = HashSet::new();
    for (name, referrer) in names {
        if !seen.insert(name) {
            errors.push(VerificationError::Duplicate {
                kind,
                name: name.to_string(),
                referrer,
            });
        }
    }
}

fn check_duplicates(deployment: &Deployment, errors: &mut Vec<VerificationError>) {
    push_duplicates(
        EntityKind::Service,
        deployment
            .services
            .iter()
            .map(|s| (s.name.as_str(), "the service list".to_string()))
            .collect(),
        errors,
    );
    push_duplicates(
        EntityKind::Node,
        deployment
            .nodes
            .iter()
            .map(|n| (n.name.as_str(), "the node list".to_string()))
            .collect(),
        errors,
    );
    push_duplicates(
        EntityKind::Workload,
        deployment
            .workloads
            .iter()
            .map(|w| (w.name.as_str(), "the workload list".to_string()))
            .collect(),
        errors,
    );

    // Event names share one namespace across nodes and driver-side events.
    let events = deployment
        .nodes
        .iter()
        .flat_map(|node| {
            node.events
                .iter()
                .map(move |e| (e.name(), format!("node `{}`", node.name)))
        })
        .chain(
            deployment
                .external_events
                .iter()
                .map(|e| (e.name(), format!("{} `{}`", e.kind(), e.name()))),
        )
        .collect();
    push_duplicates(EntityKind::Event, events, errors);

    // A name listed twice in the sequence would make a step revisitable.
    push_duplicates(
        EntityKind::Event,
        deployment
            .run_sequence
            .names()
            .map(|n| (n, "the run sequence".to_string()))
            .collect(),
        errors,
    );
}

fn check_node_services(deployment: &Deployment, errors: &mut Vec<VerificationError>) {
    for node in &deployment.nodes {
        if deployment.service(&node.service).is_none() {
            errors.push(VerificationError::Unresolved {
                kind: EntityKind::Service,
                name: node.service.clone(),
                referrer: format!("node `{}`", node.name),
            });
        }
    }
}

fn check_node_references(deployment: &Deployment, errors: &mut Vec<VerificationError>) {
    for event in &deployment.external_events {
        for node in event.nodes() {
            if deployment.node(node).is_none() {
                errors.push(VerificationError::Unresolved {
                    kind: EntityKind::Node,
                    name: node.to_string(),
                    referrer: format!("{} `{}`", event.kind(), event.name()),
                });
            }
        }
        if let ExternalEvent::Workload {
            name,
            workload: Some(workload),
        } = event
        {
            if deployment.workload(workload).is_none() {
                errors.push(VerificationError::Unresolved {
                    kind: EntityKind::Workload,
                    name: workload.clone(),
                    referrer: format!("workload event `{}`", name),
                });
            }
        }
    }
    for workload in &deployment.workloads {
        if let Some(node) = &workload.node {
            if deployment.node(node).is_none() {
                errors.push(VerificationError::Unresolved {
                    kind: EntityKind::Node,
                    name: node.clone(),
                    referrer: format!("workload `{}`", workload.name),
                });
            }
        }
    }
}

fn check_run_sequence(deployment: &Deployment, errors: &mut Vec<VerificationError>) {
    for (index, step) in deployment.run_sequence.steps().iter().enumerate() {
        for name in step.names() {
            if deployment.event(name).is_none() {
                errors.push(VerificationError::Unresolved {
                    kind: EntityKind::Event,
                    name: name.clone(),
                    referrer: format!("run sequence step {}", index),
                });
            }
        }
    }
}

fn check_scheduling_targets(deployment: &Deployment, errors: &mut Vec<VerificationError>) {
    for node in &deployment.nodes {
        for event in &node.events {
            let InternalEvent::Scheduling { name, target, .. } = event else {
                continue;
            };
            let on_same_node = node.events.iter().any(|candidate| {
                matches!(candidate, InternalEvent::StackTrace { name, .. } if name == target)
            });
            if on_same_node {
                continue;
            }
            let referrer = format!("scheduling event `{}`", name);
            if deployment.event(target).is_none() {
                errors.push(VerificationError::Unresolved {
                    kind: EntityKind::Event,
                    name: target.clone(),
                    referrer,
                });
            } else {
                errors.push(VerificationError::InvalidSchedulingTarget {
                    name: target.clone(),
                    referrer,
                    node: node.name.clone(),
                });
            }
        }
    }
}
