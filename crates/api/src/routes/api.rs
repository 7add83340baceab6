use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::info;

use common::{Cycle, Error, Strategy};

use crate::{ApiError, AppState};

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/strategies", get(list_strategies))
        .route("/api/strategies/reload", post(reload))
        .route("/api/strategies/:id/enable", post(enable))
        .route("/api/strategies/:id/disable", post(disable))
        .route("/api/strategies/:id/cycles", get(cycles))
}

// ─── Strategies ───────────────────────────────────────────────────────────────

async fn list_strategies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let strategies = state.store.list_strategies().await?;
    let jobs = state.scheduler.jobs().await;

    let mut out = Vec::with_capacity(strategies.len());
    for s in &strategies {
        let open_cycles = state.store.get_open_cycles_for_strategy(s.id).await?.len();
        let mut v = serde_json::to_value(s).map_err(Error::from)?;
        v["scheduled"] = json!(jobs.iter().any(|j| j.strategy_id == s.id));
        v["open_cycles"] = json!(open_cycles);
        out.push(v);
    }
    Ok(Json(json!({ "strategies": out, "total": out.len() })))
}

async fn strategy_or_404(state: &AppState, id: i64) -> Result<Strategy, ApiError> {
    state
        .store
        .get_strategy(id)
        .await?
        .ok_or_else(|| ApiError::from(Error::NotFound(format!("strategy {id}"))))
}

async fn set_enabled(state: &AppState, id: i64, enabled: bool) -> Result<Json<Value>, ApiError> {
    let mut strategy = strategy_or_404(state, id).await?;
    strategy.enabled = enabled;
    // Reschedule first so an invalid strategy is never persisted as enabled.
    state.scheduler.update_strategy(&strategy).await?;
    state.store.set_strategy_enabled(id, enabled).await?;
    info!(strategy_id = id, enabled, "Strategy toggled via API");
    Ok(Json(json!({
        "id": id,
        "enabled": enabled,
        "scheduled": state.scheduler.is_scheduled(id).await,
    })))
}

async fn enable(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>, ApiError> {
    set_enabled(&state, id, true).await
}

async fn disable(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>, ApiError> {
    set_enabled(&state, id, false).await
}

// ─── Reload ───────────────────────────────────────────────────────────────────

async fn reload(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let scheduled = state.scheduler.reload().await?;
    info!(scheduled, "Strategies reloaded via API");
    Ok(Json(json!({ "status": "reloaded", "scheduled": scheduled })))
}

// ─── Cycles ───────────────────────────────────────────────────────────────────

fn cycle_json(c: &Cycle) -> Value {
    json!({
        "id": c.id,
        "status": c.status().to_string(),
        "buy_price": c.buy_order.price,
        "amount": c.buy_order.amount,
        "target_price": c.target_price,
        "max_price": c.max_price,
        "sell_price": c.sell_order.as_ref().map(|o| o.price),
        "profit": c.profit(),
        "created_at": c.created_at,
    })
}

async fn cycles(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>, ApiError> {
    strategy_or_404(&state, id).await?;
    let open = state.store.get_open_cycles_for_strategy(id).await?;
    let completed = state.store.get_completed_cycles_for_strategy(id).await?;
    let realized: f64 = completed.iter().filter_map(Cycle::profit).sum();

    Ok(Json(json!({
        "open": open.iter().map(cycle_json).collect::<Vec<_>>(),
        "completed": completed.iter().map(cycle_json).collect::<Vec<_>>(),
        "realized_profit": realized,
    })))
}
