//! Prometheus metrics endpoint.

use crate::coordinator::Coordinator;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&coordinator),
    )
}

fn render(coordinator: &Coordinator) -> String {
    let m = coordinator.metrics();
    let run = coordinator.status();

    // Gauges: current state
    let cursor = run.cursor;
    let total_steps = run.total_steps;
    let completed = u8::from(run.completed);
    let aborted = u8::from(run.aborted.is_some());

    // Counters: monotonic since startup
    let polls = m.polls_total.load(Ordering::Relaxed);
    let signals = m.signals_total.load(Ordering::Relaxed);
    let duplicates = m.duplicate_signals_total.load(Ordering::Relaxed);
    let advances = m.advances_total.load(Ordering::Relaxed);
    let aborts = m.aborts_total.load(Ordering::Relaxed);
    let faults = m.faults_total.load(Ordering::Relaxed);

    format!(
        r#"# HELP choreo_run_cursor Index of the step currently awaited
# TYPE choreo_run_cursor gauge
choreo_run_cursor {cursor}

# HELP choreo_run_steps Number of steps in the run sequence
# TYPE choreo_run_steps gauge
choreo_run_steps {total_steps}

# HELP choreo_run_completed Whether the run sequence has completed
# TYPE choreo_run_completed gauge
choreo_run_completed {completed}

# HELP choreo_run_aborted Whether the run has been aborted
# TYPE choreo_run_aborted gauge
choreo_run_aborted {aborted}

# HELP choreo_server_info Server information
# TYPE choreo_server_info gauge
choreo_server_info{{version="{version}"}} 1

# HELP choreo_polls_total Total POLL requests handled
# TYPE choreo_polls_total counter
choreo_polls_total {polls}

# HELP choreo_signals_total Total SIGNAL requests that changed state
# TYPE choreo_signals_total counter
choreo_signals_total {signals}

# HELP choreo_duplicate_signals_total Total SIGNAL requests for satisfied events
# TYPE choreo_duplicate_signals_total counter
choreo_duplicate_signals_total {duplicates}

# HELP choreo_advances_total Total run sequence cursor advances
# TYPE choreo_advances_total counter
choreo_advances_total {advances}

# HELP choreo_aborts_total Total ABORT requests handled
# TYPE choreo_aborts_total counter
choreo_aborts_total {aborts}

# HELP choreo_faults_total Total requests answered with a protocol fault
# TYPE choreo_faults_total counter
choreo_faults_total {faults}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
