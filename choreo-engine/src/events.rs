//! External event tasks.
//!
//! Each driver-side event runs on its own task for the whole run:
//! wait for its turn, perform the action, signal. A failure is pushed to the
//! run's failure channel and the task ends; nothing is retried.

use crate::error::{EngineError, RuntimeResult};
use crate::runtime::RuntimeEngine;
use choreo_core::ExternalEvent;
use choreo_server::WaitError;
use choreo_types::Response;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a task does once released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    /// Perform an external event through the runtime engine.
    External(ExternalEvent),
    /// Nothing; the name is only signaled (scheduling markers).
    Marker(String),
}

impl EventAction {
    /// Name the task waits on and signals.
    pub fn name(&self) -> &str {
        match self {
            EventAction::External(event) => event.name(),
            EventAction::Marker(name) => name,
        }
    }
}

/// A running external event task.
///
/// Dropping the task cancels it if it is still waiting for its turn.
#[derive(Debug)]
pub struct ExternalEventTask {
    name: String,
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

impl ExternalEventTask {
    /// Spawn the task for `action`.
    ///
    /// Failures (receipt timeout, failed action, aborted run) are sent on
    /// `failures`.
    pub fn spawn(
        action: EventAction,
        runtime: Arc<RuntimeEngine>,
        receipt_timeout: Duration,
        failures: mpsc::UnboundedSender<EngineError>,
    ) -> Self {
        let name = action.name().to_string();
        let (cancel, cancelled) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let event = action.name().to_string();
            if let Err(e) = drive(action, runtime, receipt_timeout, cancelled).await {
                error!(event = %event, error = %e, "external event failed");
                let _ = failures.send(e);
            }
        });

        Self {
            name,
            handle,
            cancel,
        }
    }

    /// Event name this task drives.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task and wait up to `grace` for it to end.
    ///
    /// A task still waiting for its turn ends at once; one performing its
    /// action finishes it first. Past `grace` the task is aborted, which
    /// gives no cleanup guarantee.
    pub async fn stop(mut self, grace: Duration) {
        let _ = self.cancel.send(true);
        if tokio::time::timeout(grace, &mut self.handle).await.is_err() {
            warn!(event = %self.name, ?grace, "external event task did not stop, aborting");
            self.handle.abort();
        }
    }

    /// Abort the task immediately.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

async fn drive(
    action: EventAction,
    runtime: Arc<RuntimeEngine>,
    receipt_timeout: Duration,
    mut cancelled: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let event = action.name().to_string();
    let coordinator = runtime.coordinator().clone();

    tokio::select! {
        _ = async { let _ = cancelled.wait_for(|cancel| *cancel).await; } => {
            debug!(event = %event, "external event cancelled before its turn");
            return Ok(());
        }
        turn = coordinator.wait_turn(&event, receipt_timeout) => {
            turn.map_err(|e| wait_failure(&event, receipt_timeout, e))?;
        }
    }

    if let EventAction::External(external) = &action {
        info!(event = %event, kind = external.kind(), "performing external event");
        perform(external, &runtime)
            .await
            .map_err(|e| EngineError::ActionExecution {
                event: event.clone(),
                reason: e.to_string(),
            })?;
    }

    match coordinator.signal(&event) {
        Response::Ack { duplicate } => {
            debug!(event = %event, duplicate, "external event signaled");
            Ok(())
        }
        Response::Aborted { reason } => Err(EngineError::Aborted { reason }),
        other => Err(EngineError::ActionExecution {
            event,
            reason: format!("signal rejected: {:?}", other),
        }),
    }
}

async fn perform(event: &ExternalEvent, runtime: &RuntimeEngine) -> RuntimeResult<()> {
    match event {
        ExternalEvent::StartNode { node, .. } => runtime.start_node(node).await,
        ExternalEvent::StopNode { node, kill, .. } => runtime.stop_node(node, *kill).await,
        ExternalEvent::RestartNode { node, .. } => runtime.restart_node(node).await,
        ExternalEvent::NetworkPartition { partitions, .. } => {
            runtime.network_partition(partitions).await
        }
        ExternalEvent::RemoveNetworkPartition { .. } => runtime.remove_network_partition().await,
        ExternalEvent::ClockDrift {
            node, offset_ms, ..
        } => runtime.clock_drift(node, *offset_ms).await,
        ExternalEvent::Workload {
            workload: Some(workload),
            ..
        } => runtime.run_workload(workload).await.map(|_| ()),
        ExternalEvent::Workload { workload: None, .. } => Ok(()),
    }
}

fn wait_failure(event: &str, receipt_timeout: Duration, error: WaitError) -> EngineError {
    match error {
        WaitError::ReceiptTimeout { event, waited } => {
            EngineError::ProtocolTimeout { event, waited }
        }
        WaitError::Timeout { event } => EngineError::ProtocolTimeout {
            event,
            waited: receipt_timeout,
        },
        WaitError::Aborted { reason } => EngineError::Aborted { reason },
        WaitError::Fault(fault) => EngineError::ActionExecution {
            event: event.to_string(),
            reason: fault.to_string(),
        },
    }
}
