//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `draining` once shutdown began
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Events waiting for the dispatcher consumer
    pub pending_events: usize,
    /// Stage handlers and poll jobs in flight
    pub running_tasks: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let status = if state.dispatcher.is_shutting_down() {
        "draining"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        pending_events: state.dispatcher.pending(),
        running_tasks: state.dispatcher.running(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
