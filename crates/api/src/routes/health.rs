use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint. No auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.scheduler.jobs().await;
    Json(json!({
        "status": "ok",
        "mode": state.trading_mode.to_string(),
        "pair": state.pair,
        "scheduled_jobs": jobs.len(),
    }))
}
