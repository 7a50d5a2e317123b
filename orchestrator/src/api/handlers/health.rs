//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::{HealthResponse, HealthStatus};
use crate::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = state.started_at.elapsed().as_secs();
    let active_sessions =
        state.interactive.active_count().await + state.notebooks.active_count().await;
    let runtime_version = state.runtime.version().await;

    // Degraded when the container runtime does not answer
    let status = if runtime_version.is_some() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        active_sessions: active_sessions as u64,
        runtime_version,
    })
}
