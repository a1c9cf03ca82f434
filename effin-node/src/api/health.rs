//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("effin-node")
    pub module: String,
    /// Origin this node submits as
    pub bank_id: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Transactions waiting for a worker
    pub queue_depth: usize,
    pub processed: u64,
    pub alerts: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let snapshot = state.metrics.snapshot();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "effin-node".to_string(),
        bank_id: state.bank_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        queue_depth: state.queue_depth.get(),
        processed: snapshot.processed,
        alerts: snapshot.alerts,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
