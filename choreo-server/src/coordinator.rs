//! The coordinator: single-writer event table of a run.
//!
//! Every request from every participant is applied under one lock, so
//! "mark satisfied" and "advance the cursor" are never observed apart.
//! After each state change a generation counter is bumped on a `watch`
//! channel; in-process waiters block on it instead of polling.

use choreo_core::{Deployment, Scheduler, SchedulerError, SchedulerState, SignalOutcome};
use choreo_types::{EventStatus, Fault, Request, Response, RunStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{WaitError, WaitResult};

/// Operational metrics for monitoring a run.
///
/// All counters are monotonically increasing.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    /// Total POLL requests handled.
    pub polls_total: AtomicU64,
    /// Total SIGNAL requests that changed state.
    pub signals_total: AtomicU64,
    /// Total SIGNAL requests for already satisfied events.
    pub duplicate_signals_total: AtomicU64,
    /// Total cursor advances.
    pub advances_total: AtomicU64,
    /// Total ABORT requests handled.
    pub aborts_total: AtomicU64,
    /// Total requests answered with a fault.
    pub faults_total: AtomicU64,
}

#[derive(Debug)]
struct RunState {
    scheduler: Scheduler,
    aborted: Option<String>,
}

/// Owns the scheduler of one run.
#[derive(Debug)]
pub struct Coordinator {
    state: Mutex<RunState>,
    changes: watch::Sender<u64>,
    metrics: CoordinatorMetrics,
    started: Instant,
}

impl Coordinator {
    /// Create a coordinator around `scheduler`.
    pub fn new(scheduler: Scheduler) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Mutex::new(RunState {
                scheduler,
                aborted: None,
            }),
            changes,
            metrics: CoordinatorMetrics::default(),
            started: Instant::now(),
        }
    }

    /// Create a coordinator for a (verified) deployment.
    pub fn from_deployment(deployment: &Deployment) -> Self {
        Self::new(Scheduler::new(
            deployment.run_sequence.clone(),
            deployment.event_names(),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    fn fault(&self, error: SchedulerError) -> Response {
        self.metrics.faults_total.fetch_add(1, Ordering::Relaxed);
        let fault = match error {
            SchedulerError::UnknownEvent(event) => Fault::UnknownEvent { event },
            SchedulerError::OutOfOrder {
                event,
                step,
                cursor,
            } => Fault::OutOfOrder {
                event,
                step,
                cursor,
            },
        };
        warn!(%fault, "protocol fault");
        Response::Fault(fault)
    }

    /// Apply one protocol request.
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Poll { event } => self.poll(&event),
            Request::Signal { event } => self.signal(&event),
            Request::Query { event } => self.query(&event),
            Request::Status => Response::RunStatus(self.status()),
            Request::Abort { reason } => self.abort(&reason),
        }
    }

    /// POLL: `Ready` when it is `event`'s turn, `Wait` otherwise.
    pub fn poll(&self, event: &str) -> Response {
        self.metrics.polls_total.fetch_add(1, Ordering::Relaxed);
        let state = self.lock();
        if let Some(reason) = &state.aborted {
            return Response::Aborted {
                reason: reason.clone(),
            };
        }
        match state.scheduler.is_turn(event) {
            Ok(true) => Response::Ready,
            Ok(false) => {
                debug!(event, cursor = state.scheduler.cursor(), "not yet");
                Response::Wait {
                    cursor: state.scheduler.cursor(),
                    progress: state.scheduler.progress(),
                }
            }
            Err(e) => {
                drop(state);
                self.fault(e)
            }
        }
    }

    /// SIGNAL: mark `event` satisfied. Idempotent.
    pub fn signal(&self, event: &str) -> Response {
        let mut state = self.lock();
        if let Some(reason) = &state.aborted {
            return Response::Aborted {
                reason: reason.clone(),
            };
        }

        match state.scheduler.mark_satisfied(event) {
            Ok(SignalOutcome::Duplicate) => {
                self.metrics
                    .duplicate_signals_total
                    .fetch_add(1, Ordering::Relaxed);
                warn!(event, "duplicate signal ignored");
                Response::Ack { duplicate: true }
            }
            Ok(SignalOutcome::Unsequenced) => {
                self.metrics.signals_total.fetch_add(1, Ordering::Relaxed);
                debug!(event, "unsequenced event satisfied");
                drop(state);
                self.notify();
                Response::Ack { duplicate: false }
            }
            Ok(SignalOutcome::Satisfied { advanced_to }) => {
                self.metrics.signals_total.fetch_add(1, Ordering::Relaxed);
                match advanced_to {
                    Some(SchedulerState::At(step)) => {
                        self.metrics.advances_total.fetch_add(1, Ordering::Relaxed);
                        info!(event, step, "run sequence advanced");
                    }
                    Some(SchedulerState::Completed) => {
                        self.metrics.advances_total.fetch_add(1, Ordering::Relaxed);
                        info!(event, "run sequence completed");
                    }
                    None => debug!(event, "event satisfied, step still open"),
                }
                drop(state);
                self.notify();
                Response::Ack { duplicate: false }
            }
            Err(e) => {
                drop(state);
                self.fault(e)
            }
        }
    }

    /// QUERY: completion status of `event`.
    ///
    /// Once the run is aborted, pending events answer `Aborted` so gate
    /// waiters are released.
    pub fn query(&self, event: &str) -> Response {
        let state = self.lock();
        match state.scheduler.is_satisfied(event) {
            Ok(true) => Response::Status(EventStatus::Satisfied),
            Ok(false) => match &state.aborted {
                Some(reason) => Response::Aborted {
                    reason: reason.clone(),
                },
                None => Response::Status(EventStatus::Pending),
            },
            Err(e) => {
                drop(state);
                self.fault(e)
            }
        }
    }

    /// STATUS: overall progress.
    pub fn status(&self) -> RunStatus {
        let state = self.lock();
        RunStatus {
            cursor: state.scheduler.cursor(),
            total_steps: state.scheduler.sequence().len(),
            completed: state.scheduler.is_completed(),
            aborted: state.aborted.clone(),
        }
    }

    /// ABORT: flip the run to aborted. The first reason wins.
    pub fn abort(&self, reason: &str) -> Response {
        self.metrics.aborts_total.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        if state.aborted.is_none() {
            warn!(reason, "run aborted");
            state.aborted = Some(reason.to_string());
        }
        let reason = state.aborted.clone().unwrap_or_default();
        drop(state);
        self.notify();
        Response::Aborted { reason }
    }

    /// Whether every step has been satisfied.
    pub fn is_run_sequence_completed(&self) -> bool {
        self.lock().scheduler.is_completed()
    }

    /// Abort reason, if the run was aborted.
    pub fn aborted(&self) -> Option<String> {
        self.lock().aborted.clone()
    }

    /// Event names in the order they were satisfied.
    pub fn history(&self) -> Vec<String> {
        self.lock().scheduler.satisfied_order().to_vec()
    }

    /// Receiver bumped after every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Access to the operational metrics.
    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    /// Time since the coordinator was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// In-process `block_and_poll`: wait until it is `event`'s turn.
    ///
    /// The receipt deadline restarts whenever a signal for the awaited step
    /// is accepted, including one that leaves a concurrent step open. A
    /// timeout does not abort the run; the caller owns the stop sequence.
    pub async fn wait_turn(&self, event: &str, receipt_timeout: Duration) -> WaitResult<()> {
        let mut changes = self.subscribe();
        let mut deadline = tokio::time::Instant::now() + receipt_timeout;
        let mut last_progress = None;

        loop {
            changes.borrow_and_update();
            match self.poll(event) {
                Response::Ready => return Ok(()),
                Response::Wait { progress, .. } => {
                    if last_progress != Some(progress) {
                        last_progress = Some(progress);
                        deadline = tokio::time::Instant::now() + receipt_timeout;
                    }
                }
                Response::Aborted { reason } => return Err(WaitError::Aborted { reason }),
                Response::Fault(fault) => return Err(WaitError::Fault(fault)),
                other => {
                    return Err(WaitError::Fault(Fault::Malformed {
                        reason: format!("unexpected poll answer {:?}", other),
                    }))
                }
            }

            if tokio::time::timeout_at(deadline, changes.changed())
                .await
                .is_err()
            {
                warn!(event, waited = ?receipt_timeout, "receipt timeout");
                return Err(WaitError::ReceiptTimeout {
                    event: event.to_string(),
                    waited: receipt_timeout,
                });
            }
        }
    }

    /// Wait until `event` is satisfied, or until `timeout` elapses.
    pub async fn wait_satisfied(&self, event: &str, timeout: Option<Duration>) -> WaitResult<()> {
        let mut changes = self.subscribe();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            changes.borrow_and_update();
            match self.query(event) {
                Response::Status(EventStatus::Satisfied) => return Ok(()),
                Response::Status(EventStatus::Pending) => {}
                Response::Aborted { reason } => return Err(WaitError::Aborted { reason }),
                Response::Fault(fault) => return Err(WaitError::Fault(fault)),
                other => {
                    return Err(WaitError::Fault(Fault::Malformed {
                        reason: format!("unexpected query answer {:?}", other),
                    }))
                }
            }

            let changed = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, changes.changed()).await,
                None => Ok(changes.changed().await),
            };
            if changed.is_err() {
                return Err(WaitError::Timeout {
                    event: event.to_string(),
                });
            }
        }
    }
}
