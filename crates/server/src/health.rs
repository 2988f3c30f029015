//! Health, readiness, and metrics endpoints. Readiness reports the live
//! session count and executor cache occupancy rather than just "process is
//! up" (§9 "operators need to see the call runner's pulse, not just the
//! process's").

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.runner.cache_stats();
    Json(json!({
        "status": "ready",
        "activeSessions": state.runner.active_session_count(),
        "executorCache": {
            "size": stats.size,
            "maxSize": stats.max_size,
        },
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
