//! Health, metrics and status HTTP endpoints (Axum).

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::Arc;

use vitality_breaker::BreakerRegistry;

use crate::metrics::WorkerMetrics;
use crate::telemetry::Telemetry;

pub struct HealthState {
    pub metrics: WorkerMetrics,
    pub telemetry: Arc<Telemetry>,
    pub breakers: Arc<BreakerRegistry>,
    pub ready: Arc<std::sync::atomic::AtomicBool>,
}

pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<Arc<HealthState>>) -> Result<&'static str, StatusCode> {
    if state.ready.load(std::sync::atomic::Ordering::Relaxed) {
        Ok("OK")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> String {
    let open = state
        .breakers
        .snapshot_all()
        .iter()
        .filter(|s| s.state == vitality_breaker::CircuitState::Open)
        .count();
    state.metrics.breakers_open.set(open as i64);
    state.metrics.encode()
}

async fn status(State(state): State<Arc<HealthState>>) -> Json<serde_json::Value> {
    let snapshot = state.telemetry.snapshot(state.breakers.snapshot_all());
    Json(serde_json::to_value(&snapshot).unwrap_or_default())
}
