// =============================================================================
// Copy-Trade Fleet Engine — library root
// =============================================================================
//
// `main.rs` only owns process bootstrap (dotenv, tracing-subscriber init) and
// calls straight into `run()`. Splitting the two lets integration tests build
// a real `axum::Router` against an in-process `AppState` without a listening
// socket.
// =============================================================================

pub mod api;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod health;
pub mod launch;
pub mod probe;
pub mod recovery;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::FleetConfig;
use crate::credentials::CredentialStore;
use crate::dispatch::engine::DispatchEngine;
use crate::dispatch::record::OrderRecordStore;
use crate::state::AppState;
use crate::supervisor::Fleet;

pub const CONFIG_PATH: &str = "fleet_config.json";

/// Boot one Session per configured credential, bring each through the
/// lifecycle lattice to `READY`, then run the health monitor, restart loop,
/// reconciliation sweep, and dashboard/webhook API server until a shutdown
/// signal arrives.
pub async fn run() -> anyhow::Result<()> {
    info!("copy-trade fleet engine starting up");

    let config = FleetConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        info!(error = %e, "no usable fleet config on disk, starting from defaults");
        FleetConfig::default()
    });

    let credentials_path = std::env::var("FLEET_CREDENTIALS_PATH").unwrap_or_else(|_| "credentials.txt".to_string());
    let credentials = CredentialStore::load(&credentials_path)?;
    if credentials.is_empty() {
        error!(path = %credentials_path, "credential store is empty, no sessions to launch");
        return Ok(());
    }

    let fleet = Arc::new(Fleet::bootstrap(config, &credentials)?);

    let cancel = CancellationToken::new();

    // ── Bring every Session up through the lifecycle lattice ───────────────
    let mut launch_handles = Vec::new();
    for session in fleet.sessions.clone() {
        let fleet = fleet.clone();
        launch_handles.push(tokio::spawn(async move {
            if let Err(e) = supervisor::launch_session(&session, &fleet).await {
                error!(account = %session.account, error = %e, "initial launch failed");
            }
        }));
    }
    for handle in launch_handles {
        let _ = handle.await;
    }

    // ── Per-session login sentinel ──────────────────────────────────────
    for session in fleet.sessions.clone() {
        let fleet = fleet.clone();
        let cancel = cancel.clone();
        tokio::spawn(supervisor::run_login_sentinel(session, fleet, cancel));
    }

    let records = Arc::new(OrderRecordStore::new());
    let dispatch_engine = Arc::new(DispatchEngine::new(fleet.clone(), records.clone()));
    let app_state = Arc::new(AppState::new(fleet.clone(), records.clone(), dispatch_engine));

    // ── Health monitor ───────────────────────────────────────────────────
    let (restart_tx, restart_rx) = mpsc::unbounded_channel();
    let sessions_for_monitor = Arc::new(fleet.sessions.clone());
    {
        let health_config = fleet.config.health.clone();
        let cancel = cancel.clone();
        tokio::spawn(health::monitor::run(sessions_for_monitor, health_config, restart_tx, cancel));
    }

    // ── Restart loop ─────────────────────────────────────────────────────
    {
        let fleet = fleet.clone();
        let cancel = cancel.clone();
        tokio::spawn(supervisor::run_restart_loop(fleet, restart_rx, cancel));
    }

    // ── Reconciliation sweep ─────────────────────────────────────────────
    {
        let records = records.clone();
        let fleet = fleet.clone();
        let cancel = cancel.clone();
        tokio::spawn(dispatch::reconcile::run(records, fleet, 30, cancel));
    }

    // ── Dashboard + webhook API server ──────────────────────────────────
    let bind_addr = std::env::var("FLEET_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8088".to_string());
    let router = api::rest::router(app_state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "dashboard API listening");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, winding down");
    cancel.cancel();

    if let Err(e) = server.await {
        error!(error = %e, "API server task join failed");
    }

    if let Err(e) = fleet.config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save fleet config on shutdown");
    }

    for session in &fleet.sessions {
        let ctx = session.trading_context.read().clone();
        recovery::save_best_effort(&fleet.config.recovery_dir, &session.account, &ctx);
    }

    info!("shutdown complete");
    Ok(())
}
