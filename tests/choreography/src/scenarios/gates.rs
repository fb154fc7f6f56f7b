//! Scheduling gates: BLOCK/UNBLOCK pairs around a checkpoint location.
//!
//! The BLOCK and UNBLOCK names are driven by the run's marker tasks; the
//! checkpoints run here and reach the coordinator over HTTP.

use crate::harness::{node_checkpoints, random_delay};
use choreo_core::{Deployment, Position};
use choreo_engine::{run_with_backend, EngineConfig, MockBackend};
use std::sync::Arc;
use std::time::Duration;

const RECEIPT_TIMEOUT: Duration = Duration::from_secs(10);

const APPEND: &str = "kv::raft::append";
const BECOME_LEADER: &str = "kv::raft::become_leader";
const COMMIT: &str = "kv::raft::commit";

const DEPLOYMENT: &str = r#"
name = "gated-append"
run_sequence = "bbe2 * e1 * ubbe2 * e2 * e3"

[[services]]
name = "kv"

[[nodes]]
name = "n1"
service = "kv"

[[nodes.events]]
kind = "stack_trace"
name = "e1"
location = "kv::raft::become_leader"

[[nodes.events]]
kind = "stack_trace"
name = "e2"
location = "kv::raft::append"
occurrence = 2

[[nodes.events]]
kind = "stack_trace"
name = "e3"
location = "kv::raft::commit"

[[nodes.events]]
kind = "scheduling"
name = "bbe2"
operation = "block"
position = "before"
target = "e2"

[[nodes.events]]
kind = "scheduling"
name = "ubbe2"
operation = "unblock"
position = "before"
target = "e2"
"#;

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.coordination.server.bind_address = "127.0.0.1:0".to_string();
    config.runtime.stop_grace_secs = 1;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate_holds_threads_between_block_and_unblock() {
    let deployment = Deployment::from_toml_str(DEPLOYMENT).unwrap();
    let handle = run_with_backend(
        deployment.clone(),
        config(),
        Arc::new(MockBackend::new()),
    )
    .await
    .unwrap();
    let address = handle.server_address().to_string();
    let checkpoints =
        Arc::new(node_checkpoints(&deployment, "n1", &address, RECEIPT_TIMEOUT).unwrap());

    handle
        .runtime()
        .wait_for("bbe2", Some(Duration::from_secs(5)))
        .await
        .unwrap();

    // First append arrives while the gate is closed.
    let held = {
        let checkpoints = checkpoints.clone();
        tokio::spawn(async move { checkpoints.reached(APPEND, Position::Before).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!held.is_finished());
    assert_eq!(checkpoints.hits(APPEND, Position::Before), 1);

    // Reaching e1 lets the ubbe2 marker run, which opens the gate.
    checkpoints
        .reached(BECOME_LEADER, Position::Before)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), held)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let coordinator = handle.coordinator();
    assert_eq!(coordinator.history(), vec!["bbe2", "e1", "ubbe2"]);

    // Second append is the e2 occurrence and passes the open gate.
    checkpoints.reached(APPEND, Position::Before).await.unwrap();
    checkpoints.reached(COMMIT, Position::Before).await.unwrap();

    handle
        .wait_for_run_sequence_completion(Duration::from_secs(5), true)
        .await
        .unwrap();
    assert_eq!(
        handle.coordinator().history(),
        vec!["bbe2", "e1", "ubbe2", "e2", "e3"]
    );
    assert!(handle.is_stopped());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_gate_does_not_hold_threads() {
    let deployment = Deployment::from_toml_str(DEPLOYMENT).unwrap();
    let handle = run_with_backend(
        deployment.clone(),
        config(),
        Arc::new(MockBackend::new()),
    )
    .await
    .unwrap();
    let address = handle.server_address().to_string();
    let checkpoints = node_checkpoints(&deployment, "n1", &address, RECEIPT_TIMEOUT).unwrap();

    handle
        .runtime()
        .wait_for("bbe2", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    checkpoints
        .reached(BECOME_LEADER, Position::Before)
        .await
        .unwrap();
    handle
        .runtime()
        .wait_for("ubbe2", Some(Duration::from_secs(5)))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        checkpoints.reached(APPEND, Position::Before).await.unwrap();
        checkpoints.reached(APPEND, Position::Before).await.unwrap();
        checkpoints.reached(COMMIT, Position::Before).await.unwrap();
    })
    .await
    .unwrap();

    handle
        .wait_for_run_sequence_completion(Duration::from_secs(5), true)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn signal_order_is_fixed_under_jitter() {
    for _ in 0..3 {
        let deployment = Deployment::from_toml_str(DEPLOYMENT).unwrap();
        let handle = run_with_backend(
            deployment.clone(),
            config(),
            Arc::new(MockBackend::new()),
        )
        .await
        .unwrap();
        let address = handle.server_address().to_string();
        let checkpoints =
            Arc::new(node_checkpoints(&deployment, "n1", &address, RECEIPT_TIMEOUT).unwrap());

        // The append path may run before, alongside or after e1 and ubbe2.
        let appender = {
            let checkpoints = checkpoints.clone();
            let coordinator = handle.coordinator().clone();
            tokio::spawn(async move {
                random_delay(40).await;
                checkpoints.reached(APPEND, Position::Before).await.unwrap();
                random_delay(40).await;
                checkpoints.reached(APPEND, Position::Before).await.unwrap();
                coordinator.history()
            })
        };
        let leader = {
            let checkpoints = checkpoints.clone();
            tokio::spawn(async move {
                random_delay(40).await;
                checkpoints
                    .reached(BECOME_LEADER, Position::Before)
                    .await
                    .unwrap();
            })
        };
        let committer = {
            let checkpoints = checkpoints.clone();
            tokio::spawn(async move {
                random_delay(40).await;
                checkpoints.reached(COMMIT, Position::Before).await.unwrap();
            })
        };

        let seen_by_appender = appender.await.unwrap();
        leader.await.unwrap();
        committer.await.unwrap();

        // e2's thread only returns once ubbe2 has been signaled.
        assert!(seen_by_appender.iter().any(|name| name == "ubbe2"));

        handle
            .wait_for_run_sequence_completion(Duration::from_secs(5), true)
            .await
            .unwrap();
        assert_eq!(
            handle.coordinator().history(),
            vec!["bbe2", "e1", "ubbe2", "e2", "e3"]
        );
    }
}
