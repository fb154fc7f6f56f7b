//! Run controller: launches a choreographed run and owns its stop sequence.
//!
//! ```text
//! run(deployment, config)
//!   ├── verify declarations (fatal before anything starts)
//!   ├── coordinator + coordination server
//!   ├── start every non-offline node
//!   ├── one task per external event and scheduling marker
//!   └── supervisor: first failure or remote abort -> stop sequence
//! ```
//!
//! The stop sequence runs exactly once, whoever triggers it: cancel the
//! tasks, abort the coordinator if the run is incomplete, stop every node,
//! shut the server down.

use crate::backend::{DockerBackend, NodeBackend};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result, RuntimeError};
use crate::events::{EventAction, ExternalEventTask};
use crate::runtime::RuntimeEngine;
use choreo_core::{scheduling_event_names, verify_or_err, Deployment};
use choreo_server::{Coordinator, ProtocolConfig, ServerHandle};
use choreo_types::{
    ENV_INSTRUMENTABLE_PATHS, ENV_LIBRARY_PATHS, ENV_NODE, ENV_POLL_MAX_MS, ENV_POLL_MIN_MS,
    ENV_RECEIPT_TIMEOUT_MS, ENV_SERVER_ADDR,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Launch a run against the Docker containers of `config.runtime.compose_project`.
pub async fn run(deployment: Deployment, config: EngineConfig) -> Result<RunHandle> {
    verify_or_err(&deployment)?;
    let backend = DockerBackend::connect(config.runtime.project_name())?;
    info!(project = backend.project(), "connected to docker");
    run_with_backend(deployment, config, Arc::new(backend)).await
}

/// Launch a run driving nodes through `backend`.
pub async fn run_with_backend(
    deployment: Deployment,
    config: EngineConfig,
    backend: Arc<dyn NodeBackend>,
) -> Result<RunHandle> {
    verify_or_err(&deployment)?;
    let deployment = Arc::new(deployment);

    let coordinator = Arc::new(Coordinator::from_deployment(&deployment));
    let server = ServerHandle::start(&config.coordination, coordinator.clone()).await?;
    let server_address = server.local_addr();

    let runtime = Arc::new(RuntimeEngine::new(
        backend,
        coordinator.clone(),
        deployment.clone(),
        config.runtime.clone(),
    ));

    for node in deployment.autostart_nodes() {
        if let Err(e) = runtime.start_node(&node.name).await {
            error!(node = %node.name, error = %e, "failed to start node, tearing down");
            if let Err(stop_err) = runtime.stop_all().await {
                warn!(error = %stop_err, "teardown after failed start was incomplete");
            }
            server.shutdown().await?;
            return Err(e.into());
        }
    }

    let (failures_tx, failures_rx) = mpsc::unbounded_channel();
    let receipt_timeout = config.coordination.protocol.receipt_timeout();

    let mut tasks: Vec<ExternalEventTask> = deployment
        .external_events
        .iter()
        .map(|event| {
            ExternalEventTask::spawn(
                EventAction::External(event.clone()),
                runtime.clone(),
                receipt_timeout,
                failures_tx.clone(),
            )
        })
        .collect();
    tasks.extend(scheduling_event_names(&deployment).into_iter().map(|name| {
        ExternalEventTask::spawn(
            EventAction::Marker(name.to_string()),
            runtime.clone(),
            receipt_timeout,
            failures_tx.clone(),
        )
    }));
    drop(failures_tx);

    info!(
        deployment = %deployment.name,
        steps = deployment.run_sequence.len(),
        tasks = tasks.len(),
        %server_address,
        "run launched"
    );

    let (stopped, _) = watch::channel(false);
    let shared = Arc::new(RunShared {
        runtime,
        coordinator,
        tasks: Mutex::new(tasks),
        server: Mutex::new(Some(server)),
        failure: std::sync::Mutex::new(None),
        stopping: AtomicBool::new(false),
        stop_lock: Mutex::new(()),
        stopped,
        stop_grace: config.runtime.stop_grace(),
    });
    let supervisor = tokio::spawn(supervise(shared.clone(), failures_rx));

    let advertised = config
        .runtime
        .advertise_address
        .clone()
        .unwrap_or_else(|| server_address.to_string());

    Ok(RunHandle {
        shared,
        supervisor,
        server_address,
        advertised,
        protocol: config.coordination.protocol,
    })
}

struct RunShared {
    runtime: Arc<RuntimeEngine>,
    coordinator: Arc<Coordinator>,
    tasks: Mutex<Vec<ExternalEventTask>>,
    server: Mutex<Option<ServerHandle>>,
    failure: std::sync::Mutex<Option<EngineError>>,
    stopping: AtomicBool,
    stop_lock: Mutex<()>,
    stopped: watch::Sender<bool>,
    stop_grace: Duration,
}

impl RunShared {
    fn record_failure(&self, failure: EngineError) {
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(failure);
        }
    }

    fn failure_message(&self) -> Option<String> {
        self.failure
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|e| e.to_string()))
    }

    /// The shared stop sequence. Only the first caller's failure is kept;
    /// later callers wait for the sequence to finish.
    async fn stop(&self, failure: Option<EngineError>) -> Result<()> {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            if let Some(failure) = failure {
                self.record_failure(failure);
            }
        }

        let _guard = self.stop_lock.lock().await;
        if *self.stopped.borrow() {
            return Ok(());
        }
        info!("stopping run");

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        futures_util::future::join_all(tasks.into_iter().map(|task| task.stop(self.stop_grace)))
            .await;

        if !self.coordinator.is_run_sequence_completed() {
            let reason = self
                .failure_message()
                .unwrap_or_else(|| "run stopped".to_string());
            self.coordinator.abort(&reason);
        }

        let nodes = self.runtime.stop_all().await;

        let server = self.server.lock().await.take();
        let shutdown = match server {
            Some(server) => server.shutdown().await,
            None => Ok(()),
        };

        self.stopped.send_replace(true);
        info!(history = ?self.coordinator.history(), "run stopped");

        nodes?;
        shutdown?;
        Ok(())
    }
}

async fn supervise(shared: Arc<RunShared>, mut failures: mpsc::UnboundedReceiver<EngineError>) {
    let mut changes = shared.coordinator.subscribe();
    let mut stopped = shared.stopped.subscribe();
    let mut failures_open = true;

    loop {
        tokio::select! {
            failure = failures.recv(), if failures_open => match failure {
                Some(failure) => {
                    error!(error = %failure, "run failed");
                    if let Err(e) = shared.stop(Some(failure)).await {
                        warn!(error = %e, "stop sequence incomplete");
                    }
                    return;
                }
                None => failures_open = false,
            },
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
                if let Some(reason) = shared.coordinator.aborted() {
                    if shared.stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    warn!(reason = %reason, "run aborted by a participant");
                    if let Err(e) = shared.stop(Some(EngineError::Aborted { reason })).await {
                        warn!(error = %e, "stop sequence incomplete");
                    }
                    return;
                }
            }
            _ = async { let _ = stopped.wait_for(|s| *s).await; } => return,
        }
    }
}

/// A launched run.
pub struct RunHandle {
    shared: Arc<RunShared>,
    supervisor: JoinHandle<()>,
    server_address: SocketAddr,
    advertised: String,
    protocol: ProtocolConfig,
}

impl RunHandle {
    /// The runtime engine driving the nodes.
    pub fn runtime(&self) -> &Arc<RuntimeEngine> {
        &self.shared.runtime
    }

    /// The run's coordinator.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.shared.coordinator
    }

    /// Address the coordination server is bound to.
    pub fn server_address(&self) -> SocketAddr {
        self.server_address
    }

    /// Process configuration for the checkpoints of `node`.
    pub fn node_environment(&self, node: &str) -> Result<BTreeMap<String, String>> {
        let deployment = self.shared.runtime.deployment();
        let declared = deployment
            .node(node)
            .ok_or_else(|| RuntimeError::UnknownNode(node.to_string()))?;
        let service = deployment.service(&declared.service);

        let mut env = BTreeMap::new();
        env.insert(ENV_SERVER_ADDR.to_string(), self.advertised.clone());
        env.insert(ENV_NODE.to_string(), node.to_string());
        env.insert(
            ENV_RECEIPT_TIMEOUT_MS.to_string(),
            self.protocol.receipt_timeout().as_millis().to_string(),
        );
        env.insert(
            ENV_POLL_MIN_MS.to_string(),
            self.protocol.poll_interval_min().as_millis().to_string(),
        );
        env.insert(
            ENV_POLL_MAX_MS.to_string(),
            self.protocol.poll_interval_max().as_millis().to_string(),
        );
        env.insert(
            ENV_INSTRUMENTABLE_PATHS.to_string(),
            join_paths(service.map(|s| s.instrumentable_paths.as_slice())),
        );
        env.insert(
            ENV_LIBRARY_PATHS.to_string(),
            join_paths(service.map(|s| s.library_paths.as_slice())),
        );
        Ok(env)
    }

    /// Wait until the run sequence completes.
    ///
    /// Fails with the run's failure if it stops first, or with
    /// [`EngineError::CompletionTimeout`] once `timeout` elapses; a timeout
    /// does not stop the run. With `stop_on_completion` the stop sequence
    /// runs once the sequence completes.
    pub async fn wait_for_run_sequence_completion(
        &self,
        timeout: Duration,
        stop_on_completion: bool,
    ) -> Result<()> {
        let coordinator = &self.shared.coordinator;
        let mut changes = coordinator.subscribe();
        let mut stopped = self.shared.stopped.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            changes.borrow_and_update();
            if coordinator.is_run_sequence_completed() {
                info!("run sequence completed");
                if stop_on_completion {
                    self.stop().await?;
                }
                return Ok(());
            }
            if *stopped.borrow_and_update() {
                return Err(self.take_failure().unwrap_or_else(|| EngineError::Aborted {
                    reason: coordinator
                        .aborted()
                        .unwrap_or_else(|| "run stopped".to_string()),
                }));
            }

            tokio::select! {
                changed = tokio::time::timeout_at(deadline, changes.changed()) => {
                    if changed.is_err() {
                        return Err(EngineError::CompletionTimeout(timeout));
                    }
                }
                _ = stopped.changed() => {}
            }
        }
    }

    /// Run the stop sequence; a no-op once the run has stopped.
    pub async fn stop(&self) -> Result<()> {
        self.shared.stop(None).await
    }

    /// Whether the stop sequence has completed.
    pub fn is_stopped(&self) -> bool {
        *self.shared.stopped.borrow()
    }

    /// Description of the failure that stopped the run, if any.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure_message()
    }

    /// Take the failure that stopped the run, if any.
    pub fn take_failure(&self) -> Option<EngineError> {
        self.shared.failure.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if !self.is_stopped() {
            warn!("run handle dropped before stop; nodes are left running");
        }
        self.supervisor.abort();
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("server_address", &self.server_address)
            .field("advertised", &self.advertised)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn join_paths(paths: Option<&[PathBuf]>) -> String {
    paths
        .unwrap_or_default()
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":")
}
