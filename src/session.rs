// =============================================================================
// Session — one browser process / one account, and its lifecycle lattice
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::driver::governor::{Governor, GovernorMode};
use crate::health::metrics::HealthMetrics;
use crate::types::{HealthState, LifecyclePhase, TradingContext};

/// A script-execution bridge into one Session's live runtime. Primary and
/// backup channels are distinct listeners on distinct debug ports
/// (spec.md GLOSSARY).
pub struct Channel {
    pub port: u16,
    pub is_primary: bool,
    pub pid: RwLock<Option<u32>>,
    /// `None` until the Supervisor has completed `CONNECTING` for this
    /// channel's port.
    pub tab: RwLock<Option<Arc<headless_chrome::Tab>>>,
    /// Kept alive only so the browser process's `Browser` handle (and its
    /// background CDP reader thread) isn't dropped while the channel is in
    /// use. Never queried directly — `tab` is the operational handle.
    pub browser: RwLock<Option<Arc<headless_chrome::Browser>>>,
}

impl Channel {
    pub fn new(port: u16, is_primary: bool) -> Self {
        Self {
            port,
            is_primary,
            pid: RwLock::new(None),
            tab: RwLock::new(None),
            browser: RwLock::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.tab.read().is_some()
    }

    pub fn attach(&self, browser: Arc<headless_chrome::Browser>, tab: Arc<headless_chrome::Tab>, pid: u32) {
        *self.browser.write() = Some(browser);
        *self.tab.write() = Some(tab);
        *self.pid.write() = Some(pid);
    }

    pub fn detach(&self) {
        *self.tab.write() = None;
        *self.browser.write() = None;
        *self.pid.write() = None;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("port", &self.port)
            .field("is_primary", &self.is_primary)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Serializable view of a Session for dashboard/fleet snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub account: String,
    pub debug_port: u16,
    pub backup_port: Option<u16>,
    pub pid: Option<u32>,
    pub phase: LifecyclePhase,
    pub health: HealthState,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    pub active_channel_is_primary: bool,
}

/// One per configured credential (spec.md §3).
pub struct Session {
    pub account: String,
    pub profile_dir: std::path::PathBuf,

    pub primary: Channel,
    pub backup: Channel,
    /// Which channel is currently serving dispatch traffic.
    pub active_is_primary: RwLock<bool>,

    pub phase: RwLock<LifecyclePhase>,
    pub health: RwLock<HealthState>,
    pub trading_context: RwLock<TradingContext>,
    pub restart_count: AtomicU32,
    pub created_at: DateTime<Utc>,

    pub metrics: HealthMetrics,
    pub governor: Governor,

    /// Enforces a single in-flight operation per Session (spec.md §5).
    pub op_lock: AsyncMutex<()>,
}

impl Session {
    pub fn new(
        account: String,
        profile_dir: std::path::PathBuf,
        primary_port: u16,
        backup_port: u16,
        governor_config: crate::config::GovernorConfig,
    ) -> Self {
        Self {
            account,
            profile_dir,
            primary: Channel::new(primary_port, true),
            backup: Channel::new(backup_port, false),
            active_is_primary: RwLock::new(true),
            phase: RwLock::new(LifecyclePhase::Initial),
            health: RwLock::new(HealthState::Unknown),
            trading_context: RwLock::new(TradingContext::default()),
            restart_count: AtomicU32::new(0),
            created_at: Utc::now(),
            metrics: HealthMetrics::new(),
            governor: Governor::new(governor_config),
            op_lock: AsyncMutex::new(()),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.read()
    }

    pub fn health(&self) -> HealthState {
        *self.health.read()
    }

    /// Move to `next`, logging the transition. Does not itself enforce the
    /// lattice — callers (Supervisor) are expected to only request legal
    /// transitions, since the lattice is linear except for the restart loop.
    pub fn set_phase(&self, next: LifecyclePhase) {
        let prev = {
            let mut guard = self.phase.write();
            let prev = *guard;
            *guard = next;
            prev
        };
        tracing::info!(account = %self.account, from = %prev, to = %next, "lifecycle transition");
    }

    pub fn set_health(&self, next: HealthState) {
        let prev = {
            let mut guard = self.health.write();
            let prev = *guard;
            *guard = next;
            prev
        };
        if prev != next {
            tracing::info!(account = %self.account, from = %prev, to = %next, "health transition");
        }
    }

    /// Eligibility predicate (spec.md §3 invariants, §8): ready + healthy,
    /// and not in the governor's `CRITICAL` pacing mode, or explicitly
    /// exempted by the caller for a state-probing intent. `CRITICAL` gates
    /// fan-out entirely rather than just widening retry backoff, since by
    /// the time a Session is that degraded a new order only adds load.
    pub fn is_eligible(&self, state_probe: bool) -> bool {
        if state_probe {
            return true;
        }
        self.phase() == LifecyclePhase::Ready
            && self.health() == HealthState::Healthy
            && self.governor.mode() != GovernorMode::Critical
    }

    pub fn active_channel(&self) -> &Channel {
        if *self.active_is_primary.read() {
            &self.primary
        } else {
            &self.backup
        }
    }

    /// Swap the active channel to the backup (health monitor failover,
    /// spec.md §4.4 step 5).
    pub fn failover_to_backup(&self) {
        let mut active = self.active_is_primary.write();
        if *active {
            *active = false;
            tracing::warn!(account = %self.account, "failed over to backup channel");
        }
    }

    pub fn failback_to_primary(&self) {
        let mut active = self.active_is_primary.write();
        if !*active {
            *active = true;
            tracing::info!(account = %self.account, "failed back to primary channel");
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            account: self.account.clone(),
            debug_port: self.primary.port,
            backup_port: Some(self.backup.port),
            pid: *self.primary.pid.read(),
            phase: self.phase(),
            health: self.health(),
            restart_count: self.restart_count.load(Ordering::Relaxed),
            created_at: self.created_at,
            active_channel_is_primary: *self.active_is_primary.read(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("phase", &self.phase())
            .field("health", &self.health())
            .field("restart_count", &self.restart_count.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session() -> Session {
        Session::new(
            "trader_a".into(),
            "/tmp/trader_a".into(),
            9222,
            9223,
            crate::config::GovernorConfig::default(),
        )
    }

    #[test]
    fn new_session_starts_initial_unknown() {
        let s = make_session();
        assert_eq!(s.phase(), LifecyclePhase::Initial);
        assert_eq!(s.health(), HealthState::Unknown);
        assert!(!s.is_eligible(false));
    }

    #[test]
    fn eligible_requires_ready_and_healthy() {
        let s = make_session();
        s.set_phase(LifecyclePhase::Ready);
        assert!(!s.is_eligible(false));
        s.set_health(HealthState::Healthy);
        assert!(s.is_eligible(false));
    }

    #[test]
    fn state_probe_intents_are_always_eligible() {
        let s = make_session();
        assert!(s.is_eligible(true));
    }

    #[test]
    fn failover_then_failback() {
        let s = make_session();
        assert!(*s.active_is_primary.read());
        s.failover_to_backup();
        assert!(!*s.active_is_primary.read());
        assert_eq!(s.active_channel().port, s.backup.port);
        s.failback_to_primary();
        assert!(*s.active_is_primary.read());
    }

    #[test]
    fn ports_never_equal_reserved_bootstrap() {
        let s = make_session();
        let bootstrap = 9000;
        assert_ne!(s.primary.port, bootstrap);
        assert_ne!(s.backup.port, bootstrap);
    }
}
