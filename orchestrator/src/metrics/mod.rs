//! Prometheus metrics export
//!
//! Provides metrics endpoint for monitoring and alerting

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use tracing::warn;

use crate::container::SessionKind;
use crate::AppState;

/// Prometheus metrics recorder
static METRICS_HANDLE: Lazy<Option<PrometheusHandle>> = Lazy::new(|| {
    let installed = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("ces_run_duration_seconds".to_string()),
            &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0],
        )
        .and_then(|builder| builder.install_recorder());

    match installed {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    }
});

/// Initialize metrics system
pub fn init_metrics() -> bool {
    METRICS_HANDLE.is_some()
}

/// Record a finished ephemeral run
pub fn record_run(language: &str, outcome: &'static str, duration_secs: f64) {
    counter!("ces_runs_total", "language" => language.to_string(), "outcome" => outcome).increment(1);
    histogram!("ces_run_duration_seconds", "language" => language.to_string()).record(duration_secs);
}

pub fn record_session_created(kind: SessionKind) {
    counter!("ces_sessions_created_total", "kind" => kind.as_str()).increment(1);
    if kind == SessionKind::Interactive {
        gauge!("ces_active_interactive_sessions").increment(1.0);
    }
}

pub fn record_session_closed(kind: SessionKind, reason: &'static str) {
    counter!("ces_sessions_closed_total", "kind" => kind.as_str(), "reason" => reason).increment(1);
    if kind == SessionKind::Interactive {
        gauge!("ces_active_interactive_sessions").decrement(1.0);
    }
}

/// Record one notebook run (`ok`, `timeout`, `error`)
pub fn record_notebook_run(outcome: &'static str) {
    counter!("ces_notebook_runs_total", "outcome" => outcome).increment(1);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    gauge!("ces_active_interactive_sessions").set(state.interactive.active_count().await as f64);

    match METRICS_HANDLE.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("Content-Type", "text/plain; version=0.0.4")],
            String::new(),
        ),
    }
}
