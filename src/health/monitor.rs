// =============================================================================
// Connection Health Monitor — periodic layered probing and failure ladder
// =============================================================================
//
// One tokio task drives the whole fleet. Each round fans out one probe
// pass per session (capped at `probe_fanout_cap` concurrent probes),
// collects results while holding no locks, then updates each session's
// health state and requests recovery action only after releasing them
// (spec.md §4.4, mirroring the lock-scope discipline used elsewhere in
// this codebase for periodic sweeps).
// =============================================================================

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::HealthConfig;
use crate::health::classifier;
use crate::probe;
use crate::session::Session;
use crate::types::HealthState;

/// Requests the Supervisor take recovery action on a Session — either a
/// soft recovery attempt already happened here (failover) or the ladder is
/// exhausted and a full restart is needed.
#[derive(Debug, Clone)]
pub struct RestartRequest {
    pub account: String,
}

pub async fn run(
    sessions: Arc<Vec<Arc<Session>>>,
    config: HealthConfig,
    restart_tx: mpsc::UnboundedSender<RestartRequest>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.check_interval_secs));
    let fanout = Arc::new(Semaphore::new(config.probe_fanout_cap.max(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("health monitor shutting down");
                return;
            }
            _ = ticker.tick() => {
                check_round(&sessions, &config, &fanout, &restart_tx).await;
            }
        }
    }
}

async fn check_round(
    sessions: &Arc<Vec<Arc<Session>>>,
    config: &HealthConfig,
    fanout: &Arc<Semaphore>,
    restart_tx: &mpsc::UnboundedSender<RestartRequest>,
) {
    let mut handles = Vec::with_capacity(sessions.len());
    for session in sessions.iter().cloned() {
        let fanout = fanout.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let _permit = fanout.acquire().await.expect("semaphore not closed");
            probe_one(&session, &config).await
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "health probe task panicked");
        }
    }

    for session in sessions.iter() {
        apply_ladder(session, config, restart_tx);
    }
}

async fn probe_one(session: &Arc<Session>, config: &HealthConfig) {
    if session.phase().is_terminal() {
        return;
    }
    let channel = session.active_channel();
    let tab = channel.tab.read().clone();
    let round = probe::run_layered(channel.port, tab.as_ref()).await;
    let all_passed = round.len() == 5 && round.iter().all(|m| m.ok);
    session.metrics.record_round(&round, all_passed);

    if !all_passed {
        let class = classifier::classify(&round, config);
        tracing::warn!(account = %session.account, failure = %class, "health probe round failed");
    }
}

fn apply_ladder(session: &Arc<Session>, config: &HealthConfig, restart_tx: &mpsc::UnboundedSender<RestartRequest>) {
    let failures = session.metrics.consecutive_failures();
    let successes = session.metrics.consecutive_successes();

    if failures >= config.failure_threshold {
        if *session.active_is_primary.read() {
            session.failover_to_backup();
            session.set_health(HealthState::Recovering);
        } else {
            session.set_health(HealthState::Failed);
            let _ = restart_tx.send(RestartRequest {
                account: session.account.clone(),
            });
        }
    } else if successes >= config.recovery_threshold {
        if session.health() != HealthState::Healthy {
            session.failback_to_primary();
            session.set_health(HealthState::Healthy);
        }
    } else if failures > 0 {
        session.set_health(HealthState::Degraded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig {
            check_interval_secs: 5,
            failure_threshold: 2,
            recovery_threshold: 2,
            degraded_response_ms: 2_000,
            failed_response_ms: 5_000,
            probe_fanout_cap: 4,
        }
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            "trader_a".into(),
            "/tmp/trader_a".into(),
            9222,
            9223,
            crate::config::GovernorConfig::default(),
        ))
    }

    #[test]
    fn single_failure_marks_degraded_not_failed() {
        let s = session();
        let (tx, _rx) = mpsc::unbounded_channel();
        s.metrics.record_round(&[], false);
        apply_ladder(&s, &config(), &tx);
        assert_eq!(s.health(), HealthState::Degraded);
    }

    #[test]
    fn sustained_failure_on_primary_triggers_failover_not_restart() {
        let s = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        s.metrics.record_round(&[], false);
        s.metrics.record_round(&[], false);
        apply_ladder(&s, &config(), &tx);
        assert!(!*s.active_is_primary.read());
        assert_eq!(s.health(), HealthState::Recovering);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sustained_failure_on_backup_requests_restart() {
        let s = session();
        s.failover_to_backup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        s.metrics.record_round(&[], false);
        s.metrics.record_round(&[], false);
        apply_ladder(&s, &config(), &tx);
        assert_eq!(s.health(), HealthState::Failed);
        assert!(rx.try_recv().is_ok());
    }
}
