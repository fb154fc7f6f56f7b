//! The deployment declaration graph.
//!
//! A [`Deployment`] is built once (directly, or from a TOML document) and is
//! read-only for the whole run. Per-run mutable state (event completion and
//! the step cursor) lives in the coordination server, never here.
//!
//! ```toml
//! name = "raft-leader-change"
//! run_sequence = "start-n2 * bbe2 * e1 * ubbe2 * e2"
//!
//! [[services]]
//! name = "kv"
//! image = "kv:latest"
//! start_command = "/opt/kv/bin/server"
//!
//! [[nodes]]
//! name = "n1"
//! service = "kv"
//!
//! [[nodes.events]]
//! kind = "stack_trace"
//! name = "e1"
//! location = "kv::raft::become_leader"
//!
//! [[external_events]]
//! kind = "start_node"
//! name = "start-n2"
//! node = "n2"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sequence::RunSequence;

/// Errors loading a deployment document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Failed to read the deployment file.
    #[error("failed to read deployment file {path}: {source}")]
    Read {
        /// Path to the deployment file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the deployment document.
    #[error("failed to parse deployment: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Template for a runnable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Unique service name.
    pub name: String,
    /// Free-form service kind (runtime family), used by instrumentors.
    #[serde(default = "default_service_kind")]
    pub kind: String,
    /// Container image the service runs from.
    #[serde(default)]
    pub image: Option<String>,
    /// Command that starts the service.
    #[serde(default)]
    pub start_command: Option<String>,
    /// Paths containing code the instrumentor may rewrite.
    #[serde(default)]
    pub instrumentable_paths: Vec<PathBuf>,
    /// Paths to libraries the instrumented code links against.
    #[serde(default)]
    pub library_paths: Vec<PathBuf>,
    /// Log file locations collected after the run.
    #[serde(default)]
    pub log_paths: Vec<PathBuf>,
}

fn default_service_kind() -> String {
    "generic".to_string()
}

/// Whether a scheduling event closes or opens its gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingOperation {
    /// Hold threads reaching the target location.
    Block,
    /// Release threads held at the target location.
    Unblock,
}

/// Where, relative to a code location, an operation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// Immediately before the location executes.
    Before,
    /// Immediately after the location executes.
    After,
}

/// A checkpoint inside a node's running code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InternalEvent {
    /// Reached when the named code location executes.
    StackTrace {
        /// Globally unique event name.
        name: String,
        /// Named code location.
        location: String,
        /// Which occurrence of the location triggers the event (1-based, default 1).
        #[serde(default)]
        occurrence: Option<u32>,
    },
    /// Blocks or unblocks threads before/after another checkpoint.
    Scheduling {
        /// Globally unique event name.
        name: String,
        /// Block or unblock.
        operation: SchedulingOperation,
        /// Before or after the target location.
        position: Position,
        /// Name of the targeted stack trace event on the same node.
        target: String,
    },
    /// A forced garbage collection inside the node process.
    GarbageCollection {
        /// Globally unique event name.
        name: String,
    },
}

impl InternalEvent {
    /// The event's name.
    pub fn name(&self) -> &str {
        match self {
            InternalEvent::StackTrace { name, .. }
            | InternalEvent::Scheduling { name, .. }
            | InternalEvent::GarbageCollection { name } => name,
        }
    }

    /// Short label of the variant, for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            InternalEvent::StackTrace { .. } => "stack trace event",
            InternalEvent::Scheduling { .. } => "scheduling event",
            InternalEvent::GarbageCollection { .. } => "garbage collection event",
        }
    }
}

/// An instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node name.
    pub name: String,
    /// Name of the service this node instantiates.
    pub service: String,
    /// When true the node is not started at run launch.
    #[serde(default)]
    pub offline: bool,
    /// Checkpoints owned by this node.
    #[serde(default)]
    pub events: Vec<InternalEvent>,
}

/// A client program driven against the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Unique workload name.
    pub name: String,
    /// Command line of the workload.
    pub command: Vec<String>,
    /// Node whose container runs the workload; the driver host when absent.
    #[serde(default)]
    pub node: Option<String>,
}

/// A driver-side action synchronized into the run sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalEvent {
    /// Start a node.
    StartNode {
        /// Globally unique event name.
        name: String,
        /// Target node.
        node: String,
    },
    /// Stop a node, escalating to a kill after the grace period.
    StopNode {
        /// Globally unique event name.
        name: String,
        /// Target node.
        node: String,
        /// Kill immediately instead of stopping gracefully.
        #[serde(default)]
        kill: bool,
    },
    /// Restart a node.
    RestartNode {
        /// Globally unique event name.
        name: String,
        /// Target node.
        node: String,
    },
    /// Split nodes into groups that cannot reach each other.
    NetworkPartition {
        /// Globally unique event name.
        name: String,
        /// Node groups; nodes in different groups are disconnected.
        partitions: Vec<Vec<String>>,
    },
    /// Heal every partition.
    RemoveNetworkPartition {
        /// Globally unique event name.
        name: String,
    },
    /// Skew a node's perceived time.
    ClockDrift {
        /// Globally unique event name.
        name: String,
        /// Target node.
        node: String,
        /// Offset from real time in milliseconds.
        offset_ms: i64,
    },
    /// Free-standing marker, optionally tied to a workload.
    Workload {
        /// Globally unique event name.
        name: String,
        /// Workload this marker belongs to.
        #[serde(default)]
        workload: Option<String>,
    },
}

impl ExternalEvent {
    /// The event's name.
    pub fn name(&self) -> &str {
        match self {
            ExternalEvent::StartNode { name, .. }
            | ExternalEvent::StopNode { name, .. }
            | ExternalEvent::RestartNode { name, .. }
            | ExternalEvent::NetworkPartition { name, .. }
            | ExternalEvent::RemoveNetworkPartition { name }
            | ExternalEvent::ClockDrift { name, .. }
            | ExternalEvent::Workload { name, .. } => name,
        }
    }

    /// Short label of the variant, for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ExternalEvent::StartNode { .. } => "start node event",
            ExternalEvent::StopNode { .. } => "stop node event",
            ExternalEvent::RestartNode { .. } => "restart node event",
            ExternalEvent::NetworkPartition { .. } => "network partition event",
            ExternalEvent::RemoveNetworkPartition { .. } => "remove network partition event",
            ExternalEvent::ClockDrift { .. } => "clock drift event",
            ExternalEvent::Workload { .. } => "workload event",
        }
    }

    /// Nodes this event acts on.
    pub fn nodes(&self) -> Vec<&str> {
        match self {
            ExternalEvent::StartNode { node, .. }
            | ExternalEvent::StopNode { node, .. }
            | ExternalEvent::RestartNode { node, .. }
            | ExternalEvent::ClockDrift { node, .. } => vec![node.as_str()],
            ExternalEvent::NetworkPartition { partitions, .. } => partitions
                .iter()
                .flat_map(|group| group.iter().map(String::as_str))
                .collect(),
            ExternalEvent::RemoveNetworkPartition { .. } | ExternalEvent::Workload { .. } => {
                Vec::new()
            }
        }
    }
}

/// A resolved event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRef<'a> {
    /// Checkpoint on `node`.
    Internal {
        /// Owning node.
        node: &'a Node,
        /// The checkpoint.
        event: &'a InternalEvent,
    },
    /// Driver-side event.
    External(&'a ExternalEvent),
}

/// The immutable root of a choreographed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment name, used to label the run.
    #[serde(default)]
    pub name: String,
    /// Declared services.
    #[serde(default)]
    pub services: Vec<Service>,
    /// Declared nodes.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Declared workloads.
    #[serde(default)]
    pub workloads: Vec<Workload>,
    /// Declared driver-side events.
    #[serde(default)]
    pub external_events: Vec<ExternalEvent>,
    /// The order events must occur in.
    #[serde(default)]
    pub run_sequence: RunSequence,
}

impl Deployment {
    /// Parse a deployment from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a deployment from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Look up a workload by name.
    pub fn workload(&self, name: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.name == name)
    }

    /// Look up a driver-side event by name.
    pub fn external_event(&self, name: &str) -> Option<&ExternalEvent> {
        self.external_events.iter().find(|e| e.name() == name)
    }

    /// Look up a checkpoint by name, together with its node.
    pub fn internal_event(&self, name: &str) -> Option<(&Node, &InternalEvent)> {
        self.nodes.iter().find_map(|node| {
            node.events
                .iter()
                .find(|e| e.name() == name)
                .map(|event| (node, event))
        })
    }

    /// Resolve any event name.
    pub fn event(&self, name: &str) -> Option<EventRef<'_>> {
        if let Some((node, event)) = self.internal_event(name) {
            return Some(EventRef::Internal { node, event });
        }
        self.external_event(name).map(EventRef::External)
    }

    /// Every declared event name, internal first, in declaration order.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .flat_map(|n| n.events.iter().map(InternalEvent::name))
            .chain(self.external_events.iter().map(ExternalEvent::name))
    }

    /// Nodes started automatically at run launch.
    pub fn autostart_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.offline)
    }
}
