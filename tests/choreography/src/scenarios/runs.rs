//! Driver-side runs: external event tasks, remote checkpoints and the stop
//! sequence, against a mock node backend.

use crate::harness::{node_checkpoints, participant, random_delay};
use choreo_core::{Deployment, Position};
use choreo_engine::{run_with_backend, BackendCall, EngineConfig, EngineError, MockBackend};
use std::sync::Arc;
use std::time::Duration;

fn config(receipt_timeout_secs: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.coordination.server.bind_address = "127.0.0.1:0".to_string();
    config.coordination.protocol.receipt_timeout_secs = receipt_timeout_secs;
    config.runtime.stop_grace_secs = 1;
    config
}

const LATE_START: &str = r#"
name = "late-start"
run_sequence = "start-n2 * e1"

[[services]]
name = "kv"

[[nodes]]
name = "n1"
service = "kv"

[[nodes.events]]
kind = "stack_trace"
name = "e1"
location = "kv::server::serve"

[[nodes]]
name = "n2"
service = "kv"
offline = true

[[external_events]]
kind = "start_node"
name = "start-n2"
node = "n2"
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checkpoint_waits_for_external_event() {
    let deployment = Deployment::from_toml_str(LATE_START).unwrap();
    let backend = MockBackend::new();
    let handle = run_with_backend(deployment.clone(), config(10), Arc::new(backend.clone()))
        .await
        .unwrap();
    let address = handle.server_address().to_string();
    let checkpoints =
        node_checkpoints(&deployment, "n1", &address, Duration::from_secs(10)).unwrap();

    checkpoints
        .reached("kv::server::serve", Position::Before)
        .await
        .unwrap();

    handle
        .wait_for_run_sequence_completion(Duration::from_secs(5), true)
        .await
        .unwrap();
    assert_eq!(handle.coordinator().history(), vec!["start-n2", "e1"]);

    let calls = backend.calls();
    assert_eq!(calls[0], BackendCall::Start("n1".into()));
    assert_eq!(calls[1], BackendCall::Start("n2".into()));
    assert!(handle.is_stopped());
}

#[tokio::test]
async fn receipt_timeout_stops_the_run() {
    let deployment = Deployment::from_toml_str(
        r#"
name = "stalled"
run_sequence = "e1 * e2"

[[services]]
name = "kv"

[[nodes]]
name = "n1"
service = "kv"

[[nodes.events]]
kind = "stack_trace"
name = "e1"
location = "kv::never::reached"

[[external_events]]
kind = "workload"
name = "e2"
"#,
    )
    .unwrap();
    let backend = MockBackend::new();
    let handle = run_with_backend(deployment, config(1), Arc::new(backend.clone()))
        .await
        .unwrap();

    let err = handle
        .wait_for_run_sequence_completion(Duration::from_secs(10), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ProtocolTimeout { ref event, waited }
            if event == "e2" && waited == Duration::from_secs(1)
    ));
    assert!(handle.is_stopped());
    assert!(handle.coordinator().aborted().is_some());
    assert_eq!(
        backend.calls().last(),
        Some(&BackendCall::Stop("n1".into(), Duration::from_secs(1)))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_abort_stops_the_run() {
    let deployment = Deployment::from_toml_str(LATE_START).unwrap();
    let backend = MockBackend::new();
    let handle = run_with_backend(deployment, config(30), Arc::new(backend.clone()))
        .await
        .unwrap();

    // start-n2 has run by the time e1 is polled; abort instead of reaching e1.
    handle
        .runtime()
        .wait_for("start-n2", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    let client = participant(&handle.server_address().to_string(), Duration::from_secs(5)).unwrap();
    client.abort("n1 crashed").await.unwrap();

    let err = handle
        .wait_for_run_sequence_completion(Duration::from_secs(5), false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Aborted { ref reason } if reason == "n1 crashed"));
    assert!(handle.is_stopped());

    let stops: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, BackendCall::Stop(..)))
        .collect();
    assert_eq!(stops.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn enforce_order_holds_under_random_delays() {
    let deployment = Deployment::from_toml_str(
        r#"
name = "markers"
run_sequence = "w1 w2 w3"

[[external_events]]
kind = "workload"
name = "w1"

[[external_events]]
kind = "workload"
name = "w2"

[[external_events]]
kind = "workload"
name = "w3"
"#,
    )
    .unwrap();
    let handle = run_with_backend(deployment, config(10), Arc::new(MockBackend::new()))
        .await
        .unwrap();

    let waiters: Vec<_> = ["w3", "w1", "w2"]
        .into_iter()
        .map(|event| {
            let runtime = handle.runtime().clone();
            tokio::spawn(async move {
                random_delay(20).await;
                runtime
                    .enforce_order(event, Some(Duration::from_secs(5)), || async {
                        runtime.coordinator().history()
                    })
                    .await
                    .map(|history| (event, history))
            })
        })
        .collect();

    for waiter in waiters {
        let (event, history) = waiter.await.unwrap().unwrap();
        let position = history.iter().position(|h| h == event).unwrap();
        let expected: Vec<&str> = ["w1", "w2", "w3"][..=position].to_vec();
        assert_eq!(history[..=position], expected[..]);
    }

    handle
        .wait_for_run_sequence_completion(Duration::from_secs(5), true)
        .await
        .unwrap();
}
