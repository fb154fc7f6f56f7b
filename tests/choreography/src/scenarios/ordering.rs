//! Release order under randomized delays.
//!
//! Participants start in random order and sleep random amounts before
//! polling and before signaling; the coordinator alone decides who goes next.

use crate::assertions::{respects_sequence, satisfied_once};
use crate::harness::{random_delay, ChoreoHarness};
use rand::seq::SliceRandom;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RECEIPT_TIMEOUT: Duration = Duration::from_secs(10);

fn markers(sequence: &str, names: &[&str]) -> String {
    let mut toml = format!("name = \"ordering\"\nrun_sequence = \"{}\"\n", sequence);
    for name in names {
        toml.push_str(&format!(
            "\n[[external_events]]\nkind = \"workload\"\nname = \"{}\"\n",
            name
        ));
    }
    toml
}

/// Spawn one participant per name; each logs the moment it is released.
async fn race(harness: &ChoreoHarness, names: &[&'static str]) -> Vec<String> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut order = names.to_vec();
    order.shuffle(&mut rand::thread_rng());

    let tasks: Vec<_> = order
        .into_iter()
        .map(|name| {
            let client = harness.client(RECEIPT_TIMEOUT).unwrap();
            let log = log.clone();
            tokio::spawn(async move {
                random_delay(30).await;
                client.block_and_poll(name).await.unwrap();
                log.lock().unwrap().push(name.to_string());
                random_delay(10).await;
                client.send_event(name).await.unwrap();
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    let released = log.lock().unwrap().clone();
    released
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn strict_order_holds_under_random_delays() {
    let names = ["a", "b", "c", "d", "e"];

    for _ in 0..5 {
        let harness = ChoreoHarness::start(&markers("a b c d e", &names))
            .await
            .unwrap();

        let released = race(&harness, &names).await;
        assert_eq!(released, names);

        let history = harness.coordinator().history();
        let sequence = &harness.deployment().run_sequence;
        assert!(respects_sequence(&history, sequence).passed);
        assert!(satisfied_once(&history).passed);
        assert!(harness.coordinator().is_run_sequence_completed());

        harness.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_siblings_are_released_together() {
    let names = ["a", "b", "c", "d"];
    let harness = ChoreoHarness::start(&markers("a {b c} d", &names))
        .await
        .unwrap();

    let released = race(&harness, &names).await;
    assert_eq!(released[0], "a");
    assert_eq!(released[3], "d");
    let mut middle = released[1..3].to_vec();
    middle.sort();
    assert_eq!(middle, vec!["b", "c"]);

    let history = harness.coordinator().history();
    assert!(respects_sequence(&history, &harness.deployment().run_sequence).passed);
    harness.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn released_caller_is_not_blocked_by_later_steps() {
    let names = ["a", "b"];
    let harness = ChoreoHarness::start(&markers("a b", &names)).await.unwrap();
    let client = harness.client(RECEIPT_TIMEOUT).unwrap();

    // Nobody ever signals b; a is still released at once.
    tokio::time::timeout(Duration::from_secs(2), client.block_and_poll("a"))
        .await
        .unwrap()
        .unwrap();
    client.send_event("a").await.unwrap();

    assert_eq!(harness.coordinator().status().cursor, 1);
    harness.shutdown().await.unwrap();
}
