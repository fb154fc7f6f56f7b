//! Checkpoint executor.
//!
//! Instrumented code calls [`Checkpoints::reached`] every time it passes a
//! code location. The executor counts hits per (location, position) and runs
//! each matching [`InstrumentationDefinition`] exactly once, at its expected
//! occurrence. Definitions without an occurrence (scheduling gates) run on
//! every hit.

use choreo_core::{InstrumentationDefinition, InstrumentationPoint, Operation, Position};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::client::{ClientError, CoordinationClient};
use crate::transport::Transport;

/// Runtime hook behind the "force garbage collection" operation.
pub trait GcHook: Send + Sync {
    /// Collect garbage now.
    fn collect(&self);
}

/// Executes instrumentation definitions against a coordination client.
pub struct Checkpoints<T: Transport> {
    client: CoordinationClient<T>,
    definitions: Vec<InstrumentationDefinition>,
    hits: Mutex<HashMap<(String, Position), u32>>,
    gc: Option<Arc<dyn GcHook>>,
}

impl<T: Transport> Checkpoints<T> {
    /// Create an executor for one node's definitions.
    pub fn new(client: CoordinationClient<T>, definitions: Vec<InstrumentationDefinition>) -> Self {
        Self {
            client,
            definitions,
            hits: Mutex::new(HashMap::new()),
            gc: None,
        }
    }

    /// Install the runtime's garbage collection hook.
    pub fn with_gc_hook(mut self, hook: Arc<dyn GcHook>) -> Self {
        self.gc = Some(hook);
        self
    }

    /// The coordination client used by the checkpoints.
    pub fn client(&self) -> &CoordinationClient<T> {
        &self.client
    }

    /// Number of times `location` has been reached at `position`.
    pub fn hits(&self, location: &str, position: Position) -> u32 {
        let hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        hits.get(&(location.to_string(), position))
            .copied()
            .unwrap_or(0)
    }

    /// Called by instrumented code at `location`.
    ///
    /// Runs, in declaration order, every definition for this point whose
    /// occurrence matches the current hit count.
    pub async fn reached(&self, location: &str, position: Position) -> Result<(), ClientError> {
        let hit = {
            let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
            let count = hits.entry((location.to_string(), position)).or_insert(0);
            *count += 1;
            *count
        };

        for definition in &self.definitions {
            let matches_point = matches!(
                &definition.point,
                InstrumentationPoint::Location { location: l, position: p }
                    if l == location && *p == position
            );
            if !matches_point {
                continue;
            }
            if definition.occurrence.is_some_and(|o| o != hit) {
                continue;
            }
            debug!(location, ?position, hit, "checkpoint fired");
            self.execute(&definition.operations).await?;
        }

        Ok(())
    }

    /// Run every background definition once, in order.
    pub async fn run_background(&self) -> Result<(), ClientError> {
        for definition in &self.definitions {
            if definition.point == InstrumentationPoint::Background {
                self.execute(&definition.operations).await?;
            }
        }
        Ok(())
    }

    async fn execute(&self, operations: &[Operation]) -> Result<(), ClientError> {
        for operation in operations {
            match operation {
                Operation::BlockAndPoll(event) => self.client.block_and_poll(event).await?,
                Operation::SendEvent(event) => self.client.send_event(event).await?,
                Operation::Gate { block, unblock } => {
                    if self.client.is_satisfied(block).await?
                        && !self.client.is_satisfied(unblock).await?
                    {
                        info!(block = %block, unblock = %unblock, "gate closed, waiting");
                        self.client.wait_for(unblock, None).await?;
                    }
                }
                Operation::ForceGarbageCollection => match &self.gc {
                    Some(hook) => hook.collect(),
                    None => {
                        // The event must not be signaled; stop the run instead.
                        let err = ClientError::GcUnavailable;
                        if let Err(e) = self.client.abort(&err.to_string()).await {
                            warn!(error = %e, "abort after failed checkpoint action failed");
                        }
                        return Err(err);
                    }
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientTiming, PollBackoff};
    use crate::transport::MockTransport;
    use choreo_types::{EventStatus, Request, Response};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn checkpoints(
        transport: &MockTransport,
        definitions: Vec<InstrumentationDefinition>,
    ) -> Checkpoints<MockTransport> {
        let timing = ClientTiming {
            receipt_timeout: Duration::from_secs(1),
            backoff: PollBackoff::new(Duration::from_millis(1), Duration::from_millis(2)),
        };
        Checkpoints::new(
            CoordinationClient::with_timing(transport.clone(), timing),
            definitions,
        )
    }

    fn at(location: &str) -> InstrumentationPoint {
        InstrumentationPoint::Location {
            location: location.into(),
            position: Position::Before,
        }
    }

    fn event_checkpoint(location: &str, event: &str, occurrence: u32) -> InstrumentationDefinition {
        InstrumentationDefinition {
            point: at(location),
            occurrence: Some(occurrence),
            operations: vec![
                Operation::BlockAndPoll(event.into()),
                Operation::SendEvent(event.into()),
            ],
        }
    }

    #[tokio::test]
    async fn fires_only_at_expected_occurrence() {
        let transport = MockTransport::new();
        transport.queue_response(Response::Ready);
        transport.queue_response(Response::Ack { duplicate: false });

        let cp = checkpoints(&transport, vec![event_checkpoint("append", "e2", 2)]);

        cp.reached("append", Position::Before).await.unwrap();
        assert!(transport.requests().is_empty());

        cp.reached("append", Position::Before).await.unwrap();
        assert_eq!(
            transport.requests(),
            vec![
                Request::Poll { event: "e2".into() },
                Request::Signal { event: "e2".into() },
            ]
        );

        cp.reached("append", Position::Before).await.unwrap();
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(cp.hits("append", Position::Before), 3);
    }

    #[tokio::test]
    async fn positions_are_counted_separately() {
        let transport = MockTransport::new();
        let cp = checkpoints(&transport, vec![event_checkpoint("append", "e1", 1)]);

        cp.reached("append", Position::After).await.unwrap();
        assert!(transport.requests().is_empty());
        assert_eq!(cp.hits("append", Position::Before), 0);
    }

    #[tokio::test]
    async fn open_gate_passes_through() {
        let transport = MockTransport::new();
        // block not yet satisfied
        transport.queue_response(Response::Status(EventStatus::Pending));

        let gate = InstrumentationDefinition {
            point: at("append"),
            occurrence: None,
            operations: vec![Operation::Gate {
                block: "bbe2".into(),
                unblock: "ubbe2".into(),
            }],
        };
        let cp = checkpoints(&transport, vec![gate]);
        cp.reached("append", Position::Before).await.unwrap();
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn closed_gate_waits_for_unblock() {
        let transport = MockTransport::new();
        transport.queue_response(Response::Status(EventStatus::Satisfied)); // block
        transport.queue_response(Response::Status(EventStatus::Pending)); // unblock
        transport.queue_response(Response::Status(EventStatus::Pending)); // wait_for
        transport.queue_response(Response::Status(EventStatus::Satisfied)); // wait_for

        let gate = InstrumentationDefinition {
            point: at("append"),
            occurrence: None,
            operations: vec![Operation::Gate {
                block: "bbe2".into(),
                unblock: "ubbe2".into(),
            }],
        };
        let cp = checkpoints(&transport, vec![gate]);
        cp.reached("append", Position::Before).await.unwrap();

        let queried: Vec<_> = transport
            .requests()
            .iter()
            .filter_map(|r| r.event().map(String::from))
            .collect();
        assert_eq!(queried, ["bbe2", "ubbe2", "ubbe2", "ubbe2"]);
    }

    struct CountingGc(AtomicU32);

    impl GcHook for CountingGc {
        fn collect(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn background_definition_forces_gc() {
        let transport = MockTransport::new();
        transport.queue_response(Response::Ready);
        transport.queue_response(Response::Ack { duplicate: false });

        let gc = Arc::new(CountingGc(AtomicU32::new(0)));
        let cp = checkpoints(
            &transport,
            vec![InstrumentationDefinition {
                point: InstrumentationPoint::Background,
                occurrence: Some(1),
                operations: vec![
                    Operation::BlockAndPoll("gc1".into()),
                    Operation::ForceGarbageCollection,
                    Operation::SendEvent("gc1".into()),
                ],
            }],
        )
        .with_gc_hook(gc.clone());

        cp.run_background().await.unwrap();
        assert_eq!(gc.0.load(Ordering::SeqCst), 1);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn gc_without_hook_fails_and_never_signals() {
        let transport = MockTransport::new();
        transport.queue_response(Response::Ready);
        transport.queue_response(Response::Aborted {
            reason: "no garbage collection hook installed".into(),
        });

        let cp = checkpoints(
            &transport,
            vec![InstrumentationDefinition {
                point: InstrumentationPoint::Background,
                occurrence: Some(1),
                operations: vec![
                    Operation::BlockAndPoll("gc1".into()),
                    Operation::ForceGarbageCollection,
                    Operation::SendEvent("gc1".into()),
                ],
            }],
        );

        let err = cp.run_background().await.unwrap_err();
        assert!(matches!(err, ClientError::GcUnavailable));

        let requests = transport.requests();
        assert_eq!(requests[0], Request::Poll { event: "gc1".into() });
        assert!(matches!(requests[1], Request::Abort { .. }));
        assert!(!requests
            .iter()
            .any(|r| matches!(r, Request::Signal { .. })));
    }

    #[tokio::test]
    async fn checkpoint_failure_propagates() {
        let transport = MockTransport::new();
        transport.queue_response(Response::Aborted {
            reason: "stopped".into(),
        });

        let cp = checkpoints(&transport, vec![event_checkpoint("append", "e1", 1)]);
        let err = cp.reached("append", Position::Before).await.unwrap_err();
        assert!(matches!(err, ClientError::Aborted { .. }));
    }
}
