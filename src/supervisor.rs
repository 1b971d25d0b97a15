// =============================================================================
// Session Fleet Supervisor — launch, lifecycle drive, crash/restart
// =============================================================================
//
// One Supervisor owns every Session in the fleet. A per-Session task walks
// it through the `LifecyclePhase` lattice on (re)launch; crashes and
// health-escalated restarts are handled by the same restart policy, with
// exponential backoff capped per `RestartPolicy` (spec.md §4.3).
// =============================================================================

use std::process::{Child, Command};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;
use crate::credentials::CredentialStore;
use crate::driver::bridge::{self, AuthState};
use crate::driver::script;
use crate::error::SupervisorError;
use crate::health::monitor::RestartRequest;
use crate::launch::{allocate_profile_dir, launch_flags, PortPool};
use crate::recovery;
use crate::session::Session;
use crate::types::LifecyclePhase;

fn chrome_binary() -> String {
    std::env::var("FLEET_CHROME_BINARY").unwrap_or_else(|_| "google-chrome-stable".to_string())
}

pub struct Fleet {
    pub sessions: Vec<Arc<Session>>,
    pub port_pool: PortPool,
    pub credentials: CredentialStore,
    pub config: FleetConfig,
}

impl Fleet {
    /// Build (but do not launch) one Session per credential-store identity.
    pub fn bootstrap(config: FleetConfig, credentials: &CredentialStore) -> Result<Self, SupervisorError> {
        let port_pool = PortPool::new(&config);
        let mut sessions = Vec::with_capacity(credentials.len());

        for account in credentials.identities() {
            let (primary_port, backup_port) = port_pool.acquire_pair()?;
            let profile_dir = allocate_profile_dir(&config.profile_root, account)
                .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))?;
            let session = Session::new(
                account.to_string(),
                profile_dir,
                primary_port,
                backup_port,
                config.governor.clone(),
            );

            if let Ok(Some(ctx)) = recovery::load(&config.recovery_dir, account) {
                *session.trading_context.write() = ctx;
            }

            sessions.push(Arc::new(session));
        }

        Ok(Self {
            sessions,
            port_pool,
            credentials: credentials.clone(),
            config,
        })
    }

    pub fn find(&self, account: &str) -> Option<&Arc<Session>> {
        self.sessions.iter().find(|s| s.account == account)
    }
}

/// Spawn a Chrome process bound to `port`, rooted at `profile_dir`.
fn spawn_chrome(port: u16, profile_dir: &std::path::Path) -> Result<Child, SupervisorError> {
    Command::new(chrome_binary())
        .args(launch_flags(port, profile_dir))
        .spawn()
        .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))
}

/// Poll the CDP HTTP endpoint until it answers, resolving the process's
/// `webSocketDebuggerUrl` (spec.md §4.3 step 2, `CONNECTING`).
async fn discover_ws_url(port: u16, budget: Duration) -> Result<String, SupervisorError> {
    let deadline = tokio::time::Instant::now() + budget;
    let url = format!("http://127.0.0.1:{port}/json/version");
    loop {
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if let Some(ws) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws.to_string());
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(SupervisorError::PhaseTimeout {
                phase: "CONNECTING".to_string(),
                budget_ms: budget.as_millis() as u64,
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Walk one channel through LAUNCHING -> CONNECTING, attaching a live tab.
async fn bring_channel_up(
    channel: &crate::session::Channel,
    profile_dir: &std::path::Path,
    config: &FleetConfig,
) -> Result<(), SupervisorError> {
    // `child` is intentionally dropped here: we track the process solely by
    // pid and signal it directly on teardown, rather than holding the
    // `Child` handle for the process's full lifetime.
    let pid = spawn_chrome(channel.port, profile_dir)?.id();

    let ws_url = discover_ws_url(channel.port, Duration::from_secs(15)).await?;
    let browser = headless_chrome::Browser::connect(ws_url)
        .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))?;
    let tab = browser
        .new_tab()
        .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))?;

    tab.navigate_to(&config.application_url)
        .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))?;
    tab.wait_until_navigated()
        .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))?;

    tab.evaluate(script::DRIVER_SCRIPT, false)
        .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))?;

    channel.attach(Arc::new(browser), tab, pid);
    Ok(())
}

/// How many classify/act cycles `authenticate` will run before giving up
/// and surfacing `AuthenticationFailed` (spec.md §4.3 step 5).
const AUTH_MAX_ATTEMPTS: u32 = 20;
const AUTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Replay stored credentials against whatever auth surface the application
/// is actually showing: a login form, an account chooser, or (if the
/// profile's session cookie is still valid) nothing at all (spec.md §4.3
/// step 5). Polls `classifyAuthState` since the login form and the
/// post-login account chooser render asynchronously.
async fn authenticate(session: &Arc<Session>, credentials: &CredentialStore) -> Result<(), SupervisorError> {
    let secret = credentials
        .secret_for(&session.account)
        .ok_or_else(|| SupervisorError::AuthenticationFailed(format!("no credential on file for {}", session.account)))?
        .to_string();

    for attempt in 0..AUTH_MAX_ATTEMPTS {
        let tab = session
            .primary
            .tab
            .read()
            .clone()
            .ok_or_else(|| SupervisorError::AuthenticationFailed("primary tab missing".into()))?;

        let state = tokio::task::spawn_blocking(move || bridge::classify_auth_state(&tab))
            .await
            .map_err(|e| SupervisorError::AuthenticationFailed(e.to_string()))?
            .map_err(|e| SupervisorError::AuthenticationFailed(e.to_string()))?;

        match state {
            AuthState::Authenticated => return Ok(()),
            AuthState::LoginForm => {
                let session_cl = session.clone();
                let secret = secret.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let tab = session_cl.primary.tab.read().clone().unwrap();
                    bridge::type_credentials(&tab, &session_cl.account, &secret, &session_cl.governor)
                })
                .await
                .map_err(|e| SupervisorError::AuthenticationFailed(e.to_string()))?;
                if let Err(e) = result {
                    tracing::warn!(account = %session.account, attempt, error = %e, "credential replay attempt failed");
                }
            }
            AuthState::AccountChooser => {
                let session_cl = session.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let tab = session_cl.primary.tab.read().clone().unwrap();
                    bridge::pick_account(&tab, &session_cl.account, &session_cl.governor)
                })
                .await
                .map_err(|e| SupervisorError::AuthenticationFailed(e.to_string()))?;
                if let Err(e) = result {
                    tracing::warn!(account = %session.account, attempt, error = %e, "account chooser selection failed");
                }
            }
            AuthState::Unknown => {}
        }

        tokio::time::sleep(AUTH_POLL_INTERVAL).await;
    }

    Err(SupervisorError::AuthenticationFailed(format!(
        "{} did not reach an authenticated state within {AUTH_MAX_ATTEMPTS} attempts",
        session.account
    )))
}

/// Full startup sequence for one Session (spec.md §4.3): both channels come
/// up, credentials are replayed against whatever auth surface is shown, the
/// recovered `TradingContext` is restored into the live ticket, and the
/// driver is confirmed present before entering `READY`.
pub async fn launch_session(session: &Arc<Session>, fleet: &Fleet) -> Result<(), SupervisorError> {
    let config = &fleet.config;
    session.set_phase(LifecyclePhase::Launching);
    bring_channel_up(&session.primary, &session.profile_dir, config).await?;

    session.set_phase(LifecyclePhase::Connecting);
    bring_channel_up(&session.backup, &session.profile_dir, config).await?;

    session.set_phase(LifecyclePhase::Loading);
    let tab = session
        .primary
        .tab
        .read()
        .clone()
        .ok_or_else(|| SupervisorError::LaunchFailed("primary tab missing after load".into()))?;
    bridge::ensure_injected(&tab).map_err(|e| SupervisorError::LaunchFailed(e.to_string()))?;

    session.set_phase(LifecyclePhase::Authenticating);
    authenticate(session, &fleet.credentials).await?;

    let ctx = session.trading_context.read().clone();
    if !ctx.symbol.is_empty() {
        let session_cl = session.clone();
        let restored = tokio::task::spawn_blocking(move || {
            let tab = session_cl.primary.tab.read().clone().unwrap();
            bridge::restore_trading_context(&tab, &ctx, &session_cl.governor)
        })
        .await
        .map_err(|e| SupervisorError::LaunchFailed(e.to_string()))?;
        if let Err(e) = restored {
            tracing::warn!(account = %session.account, error = %e, "failed to restore trading context into ticket");
        }
    }

    session.set_phase(LifecyclePhase::Ready);
    session.set_health(crate::types::HealthState::Healthy);
    tracing::info!(account = %session.account, "session is ready");
    Ok(())
}

/// Background task that re-verifies a `Ready` session's auth surface every
/// interval and re-runs credential replay if the site has silently logged
/// it out (spec.md §4.3 step 5, distinct from the one-shot check done
/// during launch). Runs for the Session's whole lifetime.
pub async fn run_login_sentinel(session: Arc<Session>, fleet: Arc<Fleet>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if session.phase() != LifecyclePhase::Ready {
            continue;
        }

        let tab = session.primary.tab.read().clone();
        let Some(tab) = tab else { continue };
        let state = tokio::task::spawn_blocking(move || bridge::classify_auth_state(&tab)).await;
        let state = match state {
            Ok(Ok(s)) => s,
            _ => continue,
        };

        if state != AuthState::Authenticated {
            tracing::warn!(account = %session.account, "login sentinel observed a logged-out session, re-authenticating");
            let _guard = session.op_lock.lock().await;
            if let Err(e) = authenticate(&session, &fleet.credentials).await {
                tracing::error!(account = %session.account, error = %e, "login sentinel re-authentication failed");
                session.set_health(crate::types::HealthState::Failed);
            }
        }
    }
}

/// Tear down both channels' processes. Best-effort: failures to kill are
/// logged, never propagated, since a restart will allocate fresh ports and
/// a fresh profile lock regardless.
fn teardown(session: &Session) {
    for channel in [&session.primary, &session.backup] {
        if let Some(pid) = *channel.pid.read() {
            #[cfg(unix)]
            unsafe {
                libc_kill(pid as i32);
            }
            #[cfg(not(unix))]
            let _ = pid;
        }
        channel.detach();
    }
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    let _ = kill(pid, 15); // SIGTERM
}

/// Restart loop driven by health-monitor escalations and direct crash
/// detection. Each attempt backs off per `RestartPolicy`; exhausting the
/// budget retires the Session permanently (spec.md §4.3).
pub async fn run_restart_loop(
    fleet: Arc<Fleet>,
    mut restart_rx: mpsc::UnboundedReceiver<RestartRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            req = restart_rx.recv() => {
                let Some(req) = req else { return };
                let Some(session) = fleet.find(&req.account).cloned() else { continue };
                restart_one(&fleet, &session).await;
            }
        }
    }
}

async fn restart_one(fleet: &Arc<Fleet>, session: &Arc<Session>) {
    let _guard = session.op_lock.lock().await;
    session.set_phase(LifecyclePhase::Crashed);
    teardown(session);

    let attempt = session.restart_count.fetch_add(1, Ordering::SeqCst);
    if attempt >= fleet.config.restart_policy.max_attempts {
        session.set_phase(LifecyclePhase::Retired);
        tracing::error!(account = %session.account, attempts = attempt, "restart budget exhausted, session retired");
        return;
    }

    let backoff = fleet.config.restart_policy.backoff_for(attempt);
    tracing::warn!(account = %session.account, attempt, backoff_secs = backoff.as_secs(), "restarting session");
    tokio::time::sleep(backoff).await;

    session.set_phase(LifecyclePhase::Recovering);
    if let Err(e) = launch_session(session, fleet).await {
        tracing::error!(account = %session.account, error = %e, "restart attempt failed");
        session.set_phase(LifecyclePhase::Crashed);
    }
}
