// =============================================================================
// AppState — root shared state, wired into every API handler
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::dispatch::engine::DispatchEngine;
use crate::dispatch::record::OrderRecordStore;
use crate::session::SessionSnapshot;
use crate::supervisor::Fleet;

const MAX_RECENT_ERRORS: usize = 50;
const MAX_RECENT_DECISIONS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct RecentError {
    pub ts_ms: i64,
    pub account: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentDecision {
    pub ts_ms: i64,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    pub sessions: Vec<SessionSnapshot>,
    pub open_order_count: usize,
    pub closed_order_count: usize,
    pub dispatch_paused: bool,
    pub uptime_secs: u64,
    pub recent_errors: Vec<RecentError>,
    pub recent_decisions: Vec<RecentDecision>,
}

pub struct AppState {
    pub fleet: Arc<Fleet>,
    pub records: Arc<OrderRecordStore>,
    pub dispatch: Arc<DispatchEngine>,

    pub version: AtomicU64,
    pub ws_sequence: AtomicU64,
    pub start_time: Instant,

    recent_errors: RwLock<Vec<RecentError>>,
    recent_decisions: RwLock<Vec<RecentDecision>>,
}

impl AppState {
    pub fn new(fleet: Arc<Fleet>, records: Arc<OrderRecordStore>, dispatch: Arc<DispatchEngine>) -> Self {
        Self {
            fleet,
            records,
            dispatch,
            version: AtomicU64::new(0),
            ws_sequence: AtomicU64::new(0),
            start_time: Instant::now(),
            recent_errors: RwLock::new(Vec::new()),
            recent_decisions: RwLock::new(Vec::new()),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn push_error(&self, account: Option<String>, message: impl Into<String>) {
        let mut errors = self.recent_errors.write();
        errors.push(RecentError {
            ts_ms: chrono::Utc::now().timestamp_millis(),
            account,
            message: message.into(),
        });
        if errors.len() > MAX_RECENT_ERRORS {
            let drop = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(0..drop);
        }
        self.increment_version();
    }

    pub fn push_decision(&self, summary: impl Into<String>) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(RecentDecision {
            ts_ms: chrono::Utc::now().timestamp_millis(),
            summary: summary.into(),
        });
        if decisions.len() > MAX_RECENT_DECISIONS {
            let drop = decisions.len() - MAX_RECENT_DECISIONS;
            decisions.drain(0..drop);
        }
        self.increment_version();
    }

    pub fn build_snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            sessions: self.fleet.sessions.iter().map(|s| s.snapshot()).collect(),
            open_order_count: self.records.open_records().len(),
            closed_order_count: self.records.closed_records().len(),
            dispatch_paused: self.fleet.config.dispatch_paused,
            uptime_secs: self.start_time.elapsed().as_secs(),
            recent_errors: self.recent_errors.read().clone(),
            recent_decisions: self.recent_decisions.read().clone(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.fleet.sessions.len())
            .field("version", &self.version.load(Ordering::Relaxed))
            .finish()
    }
}
