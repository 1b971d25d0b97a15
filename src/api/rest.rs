// =============================================================================
// Dashboard REST API — fleet state, order records, admin controls
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::error::AppError;
use crate::state::{AppState, FleetSnapshot};
use crate::types::{OrderIntent, OrderRecord};

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let public = Router::new().route("/api/v1/health", get(health));

    let authenticated = Router::new()
        .route("/api/v1/fleet", get(fleet_snapshot))
        .route("/api/v1/sessions", get(list_sessions))
        .route("/api/v1/sessions/:account", get(session_detail))
        .route("/api/v1/sessions/:account/restart", post(restart_session))
        .route("/api/v1/orders/open", get(open_orders))
        .route("/api/v1/orders/closed", get(closed_orders))
        .route("/api/v1/dispatch", post(dispatch_intent))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume));

    let ws = Router::new()
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .with_state(state.clone());
    let webhook = crate::api::webhook::router(state.clone());

    public
        .merge(authenticated)
        .with_state(state)
        .merge(ws)
        .merge(webhook)
        .layer(cors)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn fleet_snapshot(AuthBearer(_): AuthBearer, State(state): State<Arc<AppState>>) -> Json<FleetSnapshot> {
    Json(state.build_snapshot())
}

async fn list_sessions(
    AuthBearer(_): AuthBearer,
    State(state): State<Arc<AppState>>,
) -> Json<Vec<crate::session::SessionSnapshot>> {
    Json(state.fleet.sessions.iter().map(|s| s.snapshot()).collect())
}

async fn session_detail(
    AuthBearer(_): AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
) -> Result<Json<crate::session::SessionSnapshot>, AppError> {
    state
        .fleet
        .find(&account)
        .map(|s| Json(s.snapshot()))
        .ok_or_else(|| AppError::Validation(format!("unknown account {account}")))
}

async fn restart_session(
    AuthBearer(_): AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = state
        .fleet
        .find(&account)
        .ok_or_else(|| AppError::Validation(format!("unknown account {account}")))?;
    session.set_phase(crate::types::LifecyclePhase::Crashed);
    state.push_decision(format!("operator requested restart of {account}"));
    Ok(Json(serde_json::json!({ "status": "restart requested" })))
}

async fn open_orders(AuthBearer(_): AuthBearer, State(state): State<Arc<AppState>>) -> Json<Vec<OrderRecord>> {
    Json(state.records.open_records())
}

async fn closed_orders(AuthBearer(_): AuthBearer, State(state): State<Arc<AppState>>) -> Json<Vec<OrderRecord>> {
    Json(state.records.closed_records())
}

async fn dispatch_intent(
    AuthBearer(_): AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(intent): Json<OrderIntent>,
) -> Result<Json<Vec<OrderRecord>>, AppError> {
    let records = state.dispatch.dispatch(intent).await?;
    state.increment_version();
    Ok(Json(records))
}

#[derive(Deserialize)]
struct PauseRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn control_pause(
    AuthBearer(_): AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<PauseRequest>,
) -> Json<serde_json::Value> {
    state.dispatch.set_paused(true);
    state.push_decision(format!(
        "dispatch paused{}",
        req.reason.map(|r| format!(": {r}")).unwrap_or_default()
    ));
    Json(serde_json::json!({ "status": "paused" }))
}

async fn control_resume(AuthBearer(_): AuthBearer, State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.dispatch.set_paused(false);
    state.push_decision("dispatch resumed");
    Json(serde_json::json!({ "status": "resumed" }))
}
