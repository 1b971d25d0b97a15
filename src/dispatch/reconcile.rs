// =============================================================================
// Reconciliation — orphan detection against the order record store
// =============================================================================
//
// SAFETY POLICY: this module only ever marks records `Filled` (on positive
// evidence from the account table) or `Orphaned`. It never cancels an order,
// never closes a position, and never mutates account state on the trading
// site. An order stuck past its acknowledgement budget with no corroborating
// account-table evidence is a signal for a human operator to look at the
// account directly, not something this process resolves on its own.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dispatch::record::OrderRecordStore;
use crate::driver::bridge;
use crate::supervisor::Fleet;
use crate::types::{AccountRow, OrderPhase};

/// How long a `Submitted` order may sit without an acknowledgement before
/// it's checked for a post-hoc fill, and flagged orphaned absent one
/// (spec.md §4.2 `Orphaned`, §4.5 step 5).
const ACK_BUDGET_MS: i64 = 10_000;

pub async fn run(records: Arc<OrderRecordStore>, fleet: Arc<Fleet>, interval_secs: u64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => reconcile_once(&records, &fleet).await,
        }
    }
}

async fn reconcile_once(records: &Arc<OrderRecordStore>, fleet: &Arc<Fleet>) {
    for record in records.stale_submitted(ACK_BUDGET_MS) {
        let Some(row) = scrape_account_row(fleet, &record.account).await else {
            tracing::warn!(
                fingerprint = %record.fingerprint,
                account = %record.account,
                symbol = %record.symbol,
                "order stuck in SUBMITTED past acknowledgement budget with no corroborating fill, marking ORPHANED"
            );
            records.advance(&record.fingerprint, OrderPhase::Orphaned);
            continue;
        };

        if looks_filled(&row) {
            tracing::info!(
                fingerprint = %record.fingerprint,
                account = %record.account,
                symbol = %record.symbol,
                "stale SUBMITTED order corroborated by a post-hoc fill in the account table"
            );
            records.advance(&record.fingerprint, OrderPhase::Acknowledged);
            records.advance(&record.fingerprint, OrderPhase::Filled);
        } else {
            tracing::warn!(
                fingerprint = %record.fingerprint,
                account = %record.account,
                symbol = %record.symbol,
                "order stuck in SUBMITTED past acknowledgement budget with no corroborating fill, marking ORPHANED"
            );
            records.advance(&record.fingerprint, OrderPhase::Orphaned);
        }
    }

    // Nothing in this engine observes a fill directly once an order reaches
    // Acknowledged — the account table is the only corroborating signal
    // available, same as the stale-Submitted check above (spec.md §4.5 step 5).
    for record in records.open_acknowledged() {
        if let Some(row) = scrape_account_row(fleet, &record.account).await {
            if looks_filled(&row) {
                records.advance(&record.fingerprint, OrderPhase::Filled);
            }
        }
    }
}

/// Scrape the owning session's account table and return the row for
/// `account`, if the session has a live tab and the row exists.
async fn scrape_account_row(fleet: &Arc<Fleet>, account: &str) -> Option<AccountRow> {
    let session = fleet.find(account)?;
    let tab = session.active_channel().tab.read().clone()?;
    let rows = tokio::task::spawn_blocking(move || bridge::scrape_accounts(&tab)).await.ok()?.ok()?;
    rows.into_iter().find(|r| r.account == account)
}

/// Whether `row` carries evidence of an open position for the stale order's
/// account. A nonzero open p&l cannot exist without a filled position.
fn looks_filled(row: &AccountRow) -> bool {
    row.open_pnl.abs() > f64::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::credentials::CredentialStore;
    use crate::launch::PortPool;
    use crate::session::Session;
    use crate::types::{Action, AccountTarget, OrderIntent, OrderKind, OrderRecord};

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

    fn empty_fleet() -> Arc<Fleet> {
        let config = FleetConfig::default();
        Arc::new(Fleet {
            sessions: Vec::new(),
            port_pool: PortPool::new(&config),
            credentials: CredentialStore::default(),
            config,
        })
    }

    #[tokio::test]
    async fn stale_submitted_order_with_no_session_becomes_orphaned() {
        let store = Arc::new(OrderRecordStore::new());
        let mut record = OrderRecord::new("fp-1".into(), "acct".into(), &intent());
        record.advance(OrderPhase::Submitted);
        record.submit_ts_ms = Some(chrono::Utc::now().timestamp_millis() - ACK_BUDGET_MS - 1_000);
        store.insert(record);

        reconcile_once(&store, &empty_fleet()).await;

        let resolved = store.get("fp-1").unwrap();
        assert_eq!(resolved.phase, OrderPhase::Orphaned);
        assert!(store.open_records().is_empty());
    }

    #[tokio::test]
    async fn stale_submitted_order_with_no_attached_tab_becomes_orphaned() {
        let store = Arc::new(OrderRecordStore::new());
        let mut record = OrderRecord::new("fp-2".into(), "trader_a".into(), &intent());
        record.advance(OrderPhase::Submitted);
        record.submit_ts_ms = Some(chrono::Utc::now().timestamp_millis() - ACK_BUDGET_MS - 1_000);
        store.insert(record);

        let config = FleetConfig::default();
        let session = Arc::new(Session::new(
            "trader_a".into(),
            "/tmp/trader_a".into(),
            9222,
            9223,
            config.governor.clone(),
        ));
        let fleet = Arc::new(Fleet {
            sessions: vec![session],
            port_pool: PortPool::new(&config),
            credentials: CredentialStore::default(),
            config,
        });

        reconcile_once(&store, &fleet).await;

        let resolved = store.get("fp-2").unwrap();
        assert_eq!(resolved.phase, OrderPhase::Orphaned);
    }

    #[tokio::test]
    async fn acknowledged_order_with_no_attached_tab_stays_acknowledged() {
        let store = Arc::new(OrderRecordStore::new());
        let mut record = OrderRecord::new("fp-3".into(), "trader_a".into(), &intent());
        record.advance(OrderPhase::Submitted);
        record.advance(OrderPhase::Acknowledged);
        store.insert(record);

        let config = FleetConfig::default();
        let session = Arc::new(Session::new(
            "trader_a".into(),
            "/tmp/trader_a".into(),
            9222,
            9223,
            config.governor.clone(),
        ));
        let fleet = Arc::new(Fleet {
            sessions: vec![session],
            port_pool: PortPool::new(&config),
            credentials: CredentialStore::default(),
            config,
        });

        reconcile_once(&store, &fleet).await;

        let resolved = store.get("fp-3").unwrap();
        assert_eq!(resolved.phase, OrderPhase::Acknowledged);
        assert_eq!(store.open_records().len(), 1);
    }

    #[test]
    fn looks_filled_requires_nonzero_open_pnl() {
        let flat = AccountRow {
            account: "a".into(),
            balance: 1000.0,
            open_pnl: 0.0,
            net_liq: 1000.0,
        };
        let open = AccountRow {
            open_pnl: 42.5,
            ..flat.clone()
        };
        assert!(!looks_filled(&flat));
        assert!(looks_filled(&open));
    }
}
