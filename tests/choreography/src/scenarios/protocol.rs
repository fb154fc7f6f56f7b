//! Protocol behavior seen by remote participants.

use crate::assertions::satisfied_once;
use crate::harness::ChoreoHarness;
use choreo_client::ClientError;
use std::sync::atomic::Ordering;
use std::time::Duration;

const RECEIPT_TIMEOUT: Duration = Duration::from_secs(10);

const DEPLOYMENT: &str = r#"
name = "protocol"
run_sequence = "a * b"

[[external_events]]
kind = "workload"
name = "a"

[[external_events]]
kind = "workload"
name = "b"

[[external_events]]
kind = "workload"
name = "free"
"#;

#[tokio::test]
async fn duplicate_signals_are_silent() {
    let harness = ChoreoHarness::start(DEPLOYMENT).await.unwrap();
    let client = harness.client(RECEIPT_TIMEOUT).unwrap();

    client.send_event("a").await.unwrap();
    client.send_event("a").await.unwrap();
    client.send_event("a").await.unwrap();

    let history = harness.coordinator().history();
    assert_eq!(history, vec!["a"]);
    assert!(satisfied_once(&history).passed);

    let metrics = harness.coordinator().metrics();
    assert_eq!(metrics.signals_total.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.duplicate_signals_total.load(Ordering::Relaxed), 2);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn completion_is_reported_once() {
    let harness = ChoreoHarness::start(DEPLOYMENT).await.unwrap();
    let client = harness.client(RECEIPT_TIMEOUT).unwrap();

    assert!(!client.is_run_sequence_completed().await.unwrap());
    client.send_event("a").await.unwrap();
    assert!(!client.is_run_sequence_completed().await.unwrap());
    client.send_event("b").await.unwrap();
    assert!(client.is_run_sequence_completed().await.unwrap());

    // Re-signaling after completion changes nothing.
    client.send_event("b").await.unwrap();
    let status = client.run_status().await.unwrap();
    assert!(status.completed);
    assert_eq!(status.cursor, status.total_steps);

    let advances = harness.coordinator().metrics().advances_total.load(Ordering::Relaxed);
    assert_eq!(advances, 2);
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn early_signal_is_rejected_without_effect() {
    let harness = ChoreoHarness::start(DEPLOYMENT).await.unwrap();
    let client = harness.client(RECEIPT_TIMEOUT).unwrap();

    let err = client.send_event("b").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::OutOfOrder { ref event, step: 1, cursor: 0 } if event == "b"
    ));
    assert!(harness.coordinator().history().is_empty());
    assert!(!client.is_satisfied("b").await.unwrap());
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsequenced_and_unknown_events() {
    let harness = ChoreoHarness::start(DEPLOYMENT).await.unwrap();
    let client = harness.client(RECEIPT_TIMEOUT).unwrap();

    client.block_and_poll("free").await.unwrap();
    client.send_event("free").await.unwrap();
    assert_eq!(harness.coordinator().status().cursor, 0);

    let err = client.block_and_poll("ghost").await.unwrap_err();
    assert!(matches!(err, ClientError::UnknownEvent(ref e) if e == "ghost"));
    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn receipt_timeout_aborts_the_run() {
    let harness = ChoreoHarness::start(DEPLOYMENT).await.unwrap();
    let impatient = harness.client(Duration::from_millis(200)).unwrap();

    let err = impatient.block_and_poll("b").await.unwrap_err();
    assert!(matches!(err, ClientError::ReceiptTimeout { ref event, .. } if event == "b"));

    let reason = harness.coordinator().aborted().unwrap();
    assert!(reason.contains("`b`"));

    // Every later participant is turned away.
    let other = harness.client(RECEIPT_TIMEOUT).unwrap();
    assert!(matches!(
        other.block_and_poll("a").await,
        Err(ClientError::Aborted { .. })
    ));
    assert!(matches!(
        other.send_event("a").await,
        Err(ClientError::Aborted { .. })
    ));
    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_participant_sees_abort() {
    let harness = ChoreoHarness::start(DEPLOYMENT).await.unwrap();
    let waiter = harness.client(RECEIPT_TIMEOUT).unwrap();
    let aborter = harness.client(RECEIPT_TIMEOUT).unwrap();

    let waiting = tokio::spawn(async move { waiter.block_and_poll("b").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    aborter.abort("operator stop").await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(ClientError::Aborted { ref reason }) if reason == "operator stop"
    ));
    harness.shutdown().await.unwrap();
}
