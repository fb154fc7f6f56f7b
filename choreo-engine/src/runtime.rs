//! Runtime engine: node lifecycle, fault injection and wait helpers.
//!
//! Every operation reports failure through [`RuntimeError`]; none is retried.
//! Lifecycle commands are idempotent against a node already in the target
//! state, as tracked by the engine itself.

use crate::backend::{ExecResult, NodeBackend};
use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::faults::{clock_drift_args, partition_rules, PartitionRule};
use choreo_core::Deployment;
use choreo_server::{Coordinator, WaitResult};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Extra time granted to a graceful stop beyond the container's own grace.
const STOP_SLACK: Duration = Duration::from_secs(5);

/// Lifecycle state of a node as last commanded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not running.
    Stopped,
    /// Started or restarted.
    Running,
}

/// Drives the nodes of one deployment.
pub struct RuntimeEngine {
    backend: Arc<dyn NodeBackend>,
    coordinator: Arc<Coordinator>,
    deployment: Arc<Deployment>,
    config: RuntimeConfig,
    states: DashMap<String, NodeState>,
    partitions: Mutex<Vec<PartitionRule>>,
}

impl RuntimeEngine {
    /// Create an engine; every node starts out [`NodeState::Stopped`].
    pub fn new(
        backend: Arc<dyn NodeBackend>,
        coordinator: Arc<Coordinator>,
        deployment: Arc<Deployment>,
        config: RuntimeConfig,
    ) -> Self {
        let states = deployment
            .nodes
            .iter()
            .map(|node| (node.name.clone(), NodeState::Stopped))
            .collect();
        Self {
            backend,
            coordinator,
            deployment,
            config,
            states,
            partitions: Mutex::new(Vec::new()),
        }
    }

    /// The coordinator this engine waits on.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// The deployment being driven.
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// Current state of `node`, if declared.
    pub fn node_state(&self, node: &str) -> Option<NodeState> {
        self.states.get(node).map(|state| *state)
    }

    fn ensure_declared(&self, node: &str) -> RuntimeResult<()> {
        if self.states.contains_key(node) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownNode(node.to_string()))
        }
    }

    fn set_state(&self, node: &str, state: NodeState) {
        self.states.insert(node.to_string(), state);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start `node`; a no-op if it is already running.
    pub async fn start_node(&self, node: &str) -> RuntimeResult<()> {
        self.ensure_declared(node)?;
        if self.node_state(node) == Some(NodeState::Running) {
            debug!(node, "node already running");
            return Ok(());
        }

        self.backend.start(node).await?;
        self.set_state(node, NodeState::Running);
        info!(node, "node started");
        Ok(())
    }

    /// Stop `node`; a no-op if it is already stopped.
    ///
    /// A graceful stop that fails or outlasts the grace period is escalated
    /// to a kill. With `kill` set the node is killed straight away.
    pub async fn stop_node(&self, node: &str, kill: bool) -> RuntimeResult<()> {
        self.ensure_declared(node)?;
        if self.node_state(node) == Some(NodeState::Stopped) {
            debug!(node, "node already stopped");
            return Ok(());
        }

        if kill {
            self.backend.kill(node).await?;
        } else {
            let grace = self.config.stop_grace();
            match tokio::time::timeout(grace + STOP_SLACK, self.backend.stop(node, grace)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(node, error = %e, "graceful stop failed, killing");
                    self.backend.kill(node).await?;
                }
                Err(_) => {
                    warn!(node, ?grace, "graceful stop timed out, killing");
                    self.backend.kill(node).await?;
                }
            }
        }

        self.set_state(node, NodeState::Stopped);
        info!(node, kill, "node stopped");
        Ok(())
    }

    /// Restart `node`, whatever its current state.
    pub async fn restart_node(&self, node: &str) -> RuntimeResult<()> {
        self.ensure_declared(node)?;
        self.backend.restart(node, self.config.stop_grace()).await?;
        self.set_state(node, NodeState::Running);
        info!(node, "node restarted");
        Ok(())
    }

    /// Stop every running node, attempting all of them.
    ///
    /// Returns the first failure after every node was attempted.
    pub async fn stop_all(&self) -> RuntimeResult<()> {
        let running: Vec<String> = self
            .states
            .iter()
            .filter(|entry| *entry.value() == NodeState::Running)
            .map(|entry| entry.key().clone())
            .collect();

        let mut first_error = None;
        for node in running {
            if let Err(e) = self.stop_node(&node, false).await {
                warn!(node = %node, error = %e, "failed to stop node");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Isolate `groups` of nodes from each other.
    ///
    /// Rules already installed stay recorded even if a later one fails, so a
    /// following [`remove_network_partition`](Self::remove_network_partition)
    /// heals a partial partition too.
    pub async fn network_partition(&self, groups: &[Vec<String>]) -> RuntimeResult<()> {
        let mut addresses = BTreeMap::new();
        for node in groups.iter().flatten() {
            self.ensure_declared(node)?;
            addresses.insert(node.clone(), self.node_address(node).await?);
        }

        let rules = partition_rules(groups, &addresses, &self.config.network_interface);
        let mut installed = self.partitions.lock().await;
        for rule in rules {
            debug!(node = %rule.node, command = %rule.to_command(), "installing partition rule");
            for args in rule.to_insert_args() {
                self.exec_ok(&rule.node, &args).await?;
            }
            installed.push(rule);
        }

        info!(groups = ?groups, "network partitioned");
        Ok(())
    }

    /// Remove every partition rule installed by this engine.
    ///
    /// Every rule is attempted; the first failure is returned afterwards.
    pub async fn remove_network_partition(&self) -> RuntimeResult<()> {
        let rules = std::mem::take(&mut *self.partitions.lock().await);
        let mut first_error = None;

        for rule in &rules {
            for args in rule.to_delete_args() {
                if let Err(e) = self.exec_ok(&rule.node, &args).await {
                    warn!(node = %rule.node, error = %e, "failed to remove partition rule");
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(rules = rules.len(), "network partition removed");
        first_error.map_or(Ok(()), Err)
    }

    /// Skew the time `node` perceives by `offset_ms` without stopping it.
    pub async fn clock_drift(&self, node: &str, offset_ms: i64) -> RuntimeResult<()> {
        self.ensure_declared(node)?;
        let args = clock_drift_args(offset_ms, &self.config.clock_drift_file);
        self.exec_ok(node, &args).await?;
        info!(node, offset_ms, "clock drift applied");
        Ok(())
    }

    // ========================================================================
    // Workloads and commands
    // ========================================================================

    /// Run a declared workload to completion.
    ///
    /// Workloads bound to a node run inside it; the others run on the driver.
    pub async fn run_workload(&self, name: &str) -> RuntimeResult<ExecResult> {
        let workload = self
            .deployment
            .workload(name)
            .ok_or_else(|| RuntimeError::UnknownWorkload(name.to_string()))?;

        match &workload.node {
            Some(node) => self.exec_ok(node, &workload.command).await,
            None => {
                let (program, args) = workload.command.split_first().ok_or_else(|| {
                    RuntimeError::Backend(format!("workload `{}` has no command", name))
                })?;
                debug!(workload = name, program = %program, "running workload on driver");
                let output = tokio::process::Command::new(program)
                    .args(args)
                    .output()
                    .await?;

                let result = ExecResult {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                };
                if !result.success() {
                    return Err(RuntimeError::ExecFailed {
                        node: "driver".to_string(),
                        exit_code: result.exit_code,
                        stderr: result.stderr,
                    });
                }
                Ok(result)
            }
        }
    }

    /// Network address of `node`.
    pub async fn node_address(&self, node: &str) -> RuntimeResult<String> {
        self.ensure_declared(node)?;
        self.backend.address(node).await
    }

    async fn exec_ok(&self, node: &str, cmd: &[String]) -> RuntimeResult<ExecResult> {
        let result = self.backend.exec(node, cmd).await?;
        if !result.success() {
            return Err(RuntimeError::ExecFailed {
                node: node.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    // ========================================================================
    // Waiting on the run sequence
    // ========================================================================

    /// Block until `event` is satisfied, or until `timeout` elapses.
    pub async fn wait_for(&self, event: &str, timeout: Option<Duration>) -> WaitResult<()> {
        self.coordinator.wait_satisfied(event, timeout).await
    }

    /// Block until `event` is satisfied, then run `callback`.
    pub async fn enforce_order<F, Fut, R>(
        &self,
        event: &str,
        timeout: Option<Duration>,
        callback: F,
    ) -> WaitResult<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        self.wait_for(event, timeout).await?;
        Ok(callback().await)
    }
}

impl std::fmt::Debug for RuntimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeEngine")
            .field("deployment", &self.deployment.name)
            .field("config", &self.config)
            .finish()
    }
}
