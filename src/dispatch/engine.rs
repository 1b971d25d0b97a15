// =============================================================================
// Order Dispatch & Validation Engine — fan-out, aggregation (spec.md §4.5)
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dispatch::record::{fingerprint, OrderRecordStore};
use crate::dispatch::validation::{eligible_sessions, validate_structural};
use crate::driver::bridge::{self, SubmitOutcome};
use crate::error::{AppError, DriverError};
use crate::session::Session;
use crate::supervisor::Fleet;
use crate::types::{Action, BracketSpec, OrderIntent, OrderKind, OrderPhase, OrderRecord};

pub struct DispatchEngine {
    fleet: Arc<Fleet>,
    records: Arc<OrderRecordStore>,
    paused: AtomicBool,
}

impl DispatchEngine {
    pub fn new(fleet: Arc<Fleet>, records: Arc<OrderRecordStore>) -> Self {
        let paused = fleet.config.dispatch_paused;
        Self {
            fleet,
            records,
            paused: AtomicBool::new(paused),
        }
    }

    pub fn records(&self) -> &Arc<OrderRecordStore> {
        &self.records
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Full 5-step dispatch procedure. Structural validation and fleet-wide
    /// pause gate first; everything downstream is per-session and
    /// independently fallible — one account's rejection never blocks
    /// another's fill.
    pub async fn dispatch(&self, intent: OrderIntent) -> Result<Vec<OrderRecord>, AppError> {
        validate_structural(&intent)?;
        if self.is_paused() && !intent.state_probe {
            return Err(AppError::Validation("dispatch is paused".into()));
        }

        let targets: Vec<Arc<Session>> = {
            let picked = eligible_sessions(&intent, &self.fleet.sessions);
            picked.into_iter().cloned().collect()
        };

        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut handles = Vec::new();
        let mut nonce: u32 = 0;
        for session in targets {
            let mut levels = intent.materialize_levels();
            if levels.len() > 1 {
                let tick_size = intent.tick_size.unwrap_or(1.0);
                levels = price_scale_in_levels(&session, levels, tick_size).await;
            }
            for level in levels {
                let fp = fingerprint(&session.account, &level, nonce);
                nonce += 1;
                let records = self.records.clone();
                handles.push(tokio::spawn(dispatch_one(session.clone(), level, fp, records)));
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(record) => results.push(record),
                Err(e) => tracing::error!(error = %e, "dispatch task panicked"),
            }
        }
        Ok(results)
    }
}

/// Fetch one reference price from the session's market-analyzer panel and
/// space each scale-in child `index * spacing_ticks` away from it. A child
/// with no resolvable reference price is left at market, unspaced — this is
/// a best-effort ladder, not a hard precondition for dispatch (spec.md
/// §4.2 scale-in).
async fn price_scale_in_levels(session: &Arc<Session>, levels: Vec<OrderIntent>, tick_size: f64) -> Vec<OrderIntent> {
    let tab = session.active_channel().tab.read().clone();
    let Some(tab) = tab else { return levels };

    let session = session.clone();
    let reference = tokio::task::spawn_blocking(move || bridge::read_market_price(&tab, &session.governor)).await;
    let reference = match reference {
        Ok(Ok(price)) => price,
        _ => {
            tracing::warn!("no reference price available, submitting scale-in levels unspaced");
            return levels;
        }
    };

    levels
        .into_iter()
        .map(|mut level| {
            let (Some(idx), Some(spacing)) = (level.scale_in_level_index, level.scale_in.map(|s| s.spacing_ticks))
            else {
                return level;
            };
            let offset = idx as f64 * spacing as f64 * tick_size;
            let price = match level.action {
                Action::Buy => reference - offset,
                Action::Sell => reference + offset,
            };
            if level.order_kind == OrderKind::Market {
                level.order_kind = OrderKind::Limit;
            }
            level.limit_price = Some(price);
            level
        })
        .collect()
}

async fn dispatch_one(session: Arc<Session>, intent: OrderIntent, fp: String, records: Arc<OrderRecordStore>) -> OrderRecord {
    let mut record = OrderRecord::new(fp.clone(), session.account.clone(), &intent);
    records.insert(record.clone());

    let _guard = session.op_lock.lock().await;
    records.advance(&fp, OrderPhase::Submitted);
    record.advance(OrderPhase::Submitted);

    if intent.bracket.is_some() {
        dispatch_bracket(&session, &intent, &fp, &records, &mut record).await;
    } else {
        let outcome = run_submit(session.clone(), intent.clone()).await;
        apply_submit_outcome(&session, &fp, &records, &mut record, outcome);
    }

    records.get(&fp).unwrap_or(record)
}

/// Composes a bracket as three linked `submitOrder` runs sharing a parent
/// fingerprint: the entry, then a TP child and an SL child priced off the
/// market-analyzer's reference price (spec.md §4.2). Either child failing
/// triggers a best-effort cancel of the legs already placed and surfaces
/// `PARTIAL` on the parent — never a silent success.
async fn dispatch_bracket(
    session: &Arc<Session>,
    intent: &OrderIntent,
    fp: &str,
    records: &Arc<OrderRecordStore>,
    record: &mut OrderRecord,
) {
    let entry_outcome = run_submit(session.clone(), intent.clone()).await;
    apply_submit_outcome(session, fp, records, record, entry_outcome);
    if record.phase != OrderPhase::Acknowledged {
        return;
    }

    let bracket = intent.bracket.expect("dispatch_bracket only called when intent.bracket is Some");
    let tick_size = intent.tick_size.unwrap_or(1.0);

    let tab = session.active_channel().tab.read().clone();
    let reference = match tab {
        Some(tab) => {
            let session_cl = session.clone();
            tokio::task::spawn_blocking(move || bridge::read_market_price(&tab, &session_cl.governor)).await
        }
        None => Ok(Err(DriverError::Bridge("no attached tab".into()))),
    };
    let reference = match reference {
        Ok(Ok(price)) => price,
        _ => {
            tracing::warn!(
                account = %session.account,
                fingerprint = %fp,
                "no reference price for bracket legs, marking PARTIAL"
            );
            records.advance(fp, OrderPhase::Partial);
            record.advance(OrderPhase::Partial);
            return;
        }
    };

    let (tp_intent, sl_intent) = build_bracket_legs(intent, bracket, reference, tick_size);
    let tp_fp = format!("{fp}-tp");
    let sl_fp = format!("{fp}-sl");

    records.update(fp, |r| r.bracket_children = vec![tp_fp.clone(), sl_fp.clone()]);
    record.bracket_children = vec![tp_fp.clone(), sl_fp.clone()];

    let tp_phase = submit_child_leg(session, tp_intent, tp_fp, records).await;
    let sl_phase = submit_child_leg(session, sl_intent, sl_fp, records).await;

    let both_ok = matches!(tp_phase, OrderPhase::Acknowledged | OrderPhase::Filled)
        && matches!(sl_phase, OrderPhase::Acknowledged | OrderPhase::Filled);

    if !both_ok {
        tracing::warn!(
            account = %session.account,
            fingerprint = %fp,
            tp_phase = %tp_phase,
            sl_phase = %sl_phase,
            "bracket child failed, best-effort cancelling legs"
        );
        let session_cl = session.clone();
        let symbol = intent.symbol.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(tab) = session_cl.active_channel().tab.read().clone() {
                let _ = bridge::exit_position(&tab, &symbol, &session_cl.governor);
            }
        })
        .await;
        records.advance(fp, OrderPhase::Partial);
        record.advance(OrderPhase::Partial);
    }
}

/// TP/SL prices measured in ticks from the reference price, closing on the
/// opposite side of the entry.
fn build_bracket_legs(intent: &OrderIntent, bracket: BracketSpec, reference: f64, tick_size: f64) -> (OrderIntent, OrderIntent) {
    let exit_action = intent.action.opposite();
    let (tp_price, sl_price) = match intent.action {
        Action::Buy => (
            reference + bracket.tp_ticks as f64 * tick_size,
            reference - bracket.sl_ticks as f64 * tick_size,
        ),
        Action::Sell => (
            reference - bracket.tp_ticks as f64 * tick_size,
            reference + bracket.sl_ticks as f64 * tick_size,
        ),
    };

    let mut tp = intent.clone();
    tp.action = exit_action;
    tp.order_kind = OrderKind::Limit;
    tp.limit_price = Some(tp_price);
    tp.stop_price = None;
    tp.bracket = None;
    tp.scale_in = None;
    tp.scale_in_level_index = None;

    let mut sl = intent.clone();
    sl.action = exit_action;
    sl.order_kind = OrderKind::Stop;
    sl.stop_price = Some(sl_price);
    sl.limit_price = None;
    sl.bracket = None;
    sl.scale_in = None;
    sl.scale_in_level_index = None;

    (tp, sl)
}

async fn submit_child_leg(session: &Arc<Session>, intent: OrderIntent, fp: String, records: &Arc<OrderRecordStore>) -> OrderPhase {
    let mut record = OrderRecord::new(fp.clone(), session.account.clone(), &intent);
    records.insert(record.clone());
    records.advance(&fp, OrderPhase::Submitted);
    record.advance(OrderPhase::Submitted);

    let outcome = run_submit(session.clone(), intent).await;
    apply_submit_outcome(session, &fp, records, &mut record, outcome);
    record.phase
}

async fn run_submit(
    session: Arc<Session>,
    intent: OrderIntent,
) -> Result<Result<SubmitOutcome, DriverError>, tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || submit_entry(&session, &intent)).await
}

/// Blocking CDP call through the Driver bridge. Runs on a `spawn_blocking`
/// worker since `headless_chrome` evaluation is synchronous.
fn submit_entry(session: &Session, intent: &OrderIntent) -> Result<SubmitOutcome, DriverError> {
    let channel = session.active_channel();
    let tab = channel
        .tab
        .read()
        .clone()
        .ok_or_else(|| DriverError::Bridge("no attached tab".into()))?;
    bridge::submit_order(&tab, intent, &session.governor)
}

fn apply_submit_outcome(
    session: &Session,
    fp: &str,
    records: &OrderRecordStore,
    record: &mut OrderRecord,
    outcome: Result<Result<SubmitOutcome, DriverError>, tokio::task::JoinError>,
) {
    match outcome {
        Ok(Ok(SubmitOutcome::Acknowledged)) => {
            records.advance(fp, OrderPhase::Acknowledged);
            record.advance(OrderPhase::Acknowledged);
        }
        Ok(Ok(SubmitOutcome::Unacknowledged)) => {
            tracing::error!(
                account = %session.account,
                fingerprint = %fp,
                "operator alert: submit click observed with no acknowledgement, marking ORPHANED"
            );
            records.advance(fp, OrderPhase::Orphaned);
            record.advance(OrderPhase::Orphaned);
        }
        Ok(Err(e)) => {
            tracing::warn!(account = %session.account, fingerprint = %fp, error = %e, "order submission failed");
            records.advance(fp, OrderPhase::Rejected);
            record.advance(OrderPhase::Rejected);
            record.rejection_code = Some(e.kind());
            record.rejection_reason = Some(e.to_string());
        }
        Err(join_err) => {
            tracing::error!(account = %session.account, fingerprint = %fp, error = %join_err, "submit task panicked");
            records.advance(fp, OrderPhase::Orphaned);
            record.advance(OrderPhase::Orphaned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::launch::PortPool;
    use crate::types::{AccountTarget, ScaleInPlan};

    fn intent() -> OrderIntent {
        OrderIntent {
            account: AccountTarget::All,
            action: Action::Buy,
            symbol: "NQ".into(),
            quantity: 1.0,
            order_kind: OrderKind::Market,
            limit_price: None,
            stop_price: None,
            tick_size: Some(0.25),
            bracket: None,
            scale_in: None,
            state_probe: false,
            scale_in_level_index: None,
        }
    }

    #[tokio::test]
    async fn dispatch_with_no_eligible_sessions_returns_empty() {
        let config = FleetConfig::default();
        let fleet = Arc::new(Fleet {
            sessions: Vec::new(),
            port_pool: PortPool::new(&config),
            credentials: crate::credentials::CredentialStore::default(),
            config,
        });
        let engine = DispatchEngine::new(fleet, Arc::new(OrderRecordStore::new()));
        let result = engine.dispatch(intent()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn dispatch_rejects_invalid_intent_before_touching_fleet() {
        let config = FleetConfig::default();
        let fleet = Arc::new(Fleet {
            sessions: Vec::new(),
            port_pool: PortPool::new(&config),
            credentials: crate::credentials::CredentialStore::default(),
            config,
        });
        let engine = DispatchEngine::new(fleet, Arc::new(OrderRecordStore::new()));
        let mut bad = intent();
        bad.symbol = "".into();
        assert!(engine.dispatch(bad).await.is_err());
    }

    #[test]
    fn build_bracket_legs_closes_on_opposite_side_of_entry() {
        let mut buy = intent();
        buy.bracket = Some(BracketSpec { tp_ticks: 100, sl_ticks: 40 });
        let (tp, sl) = build_bracket_legs(&buy, buy.bracket.unwrap(), 20_000.0, 0.25);
        assert_eq!(tp.action, Action::Sell);
        assert_eq!(sl.action, Action::Sell);
        assert_eq!(tp.limit_price, Some(20_000.0 + 100.0 * 0.25));
        assert_eq!(sl.stop_price, Some(20_000.0 - 40.0 * 0.25));
    }

    #[test]
    fn scale_in_materialization_keeps_level_index_for_later_pricing() {
        let mut scaled = intent();
        scaled.quantity = 4.0;
        scaled.scale_in = Some(ScaleInPlan { levels: 4, spacing_ticks: 20 });
        let levels = scaled.materialize_levels();
        let indices: Vec<u32> = levels.iter().map(|l| l.scale_in_level_index.unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
