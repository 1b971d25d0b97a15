// =============================================================================
// Order record store — open/closed split, fingerprint-addressed
// =============================================================================

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::types::{Fill, OrderIntent, OrderPhase, OrderRecord};

/// Deterministic per-(account, intent, attempt) fingerprint. Re-dispatching
/// the exact same intent to the exact same account within the same
/// millisecond and nonce collapses to the same fingerprint — the fan-out
/// engine bumps `nonce` per materialized child so siblings never collide
/// (spec.md §3 invariants: fingerprints are globally unique).
pub fn fingerprint(account: &str, intent: &OrderIntent, nonce: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.as_bytes());
    hasher.update(intent.symbol.as_bytes());
    hasher.update(intent.action.to_string().as_bytes());
    hasher.update(intent.quantity.to_bits().to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    hex::encode(hasher.finalize())
}

pub struct OrderRecordStore {
    open: RwLock<Vec<OrderRecord>>,
    closed: RwLock<Vec<OrderRecord>>,
}

impl OrderRecordStore {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    pub fn insert(&self, record: OrderRecord) {
        self.open.write().push(record);
    }

    /// Advance the record identified by `fingerprint` and, if the move
    /// lands on a terminal phase, migrate it from `open` to `closed`.
    pub fn advance(&self, fingerprint: &str, next: OrderPhase) -> bool {
        let mut open = self.open.write();
        let Some(idx) = open.iter().position(|r| r.fingerprint == fingerprint) else {
            return false;
        };
        let advanced = open[idx].advance(next);
        if advanced && open[idx].phase.is_terminal() {
            let record = open.remove(idx);
            self.closed.write().push(record);
        }
        advanced
    }

    /// Apply an arbitrary mutation to the open record identified by
    /// `fingerprint` — used for fields `advance` doesn't own, such as
    /// linking bracket child fingerprints onto the parent.
    pub fn update<F: FnOnce(&mut OrderRecord)>(&self, fingerprint: &str, f: F) -> bool {
        let mut open = self.open.write();
        match open.iter_mut().find(|r| r.fingerprint == fingerprint) {
            Some(r) => {
                f(r);
                true
            }
            None => false,
        }
    }

    pub fn record_fill(&self, fingerprint: &str, fill: Fill) -> bool {
        let mut open = self.open.write();
        match open.iter_mut().find(|r| r.fingerprint == fingerprint) {
            Some(r) => {
                r.record_fill(fill);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<OrderRecord> {
        self.open
            .read()
            .iter()
            .find(|r| r.fingerprint == fingerprint)
            .cloned()
            .or_else(|| self.closed.read().iter().find(|r| r.fingerprint == fingerprint).cloned())
    }

    pub fn open_records(&self) -> Vec<OrderRecord> {
        self.open.read().clone()
    }

    pub fn closed_records(&self) -> Vec<OrderRecord> {
        self.closed.read().clone()
    }

    /// Open records that have sat in `Submitted` past `budget_ms` without an
    /// acknowledgement — the reconciler's orphan candidates (spec.md §4.5
    /// step 5, §4.2 Orphaned).
    pub fn stale_submitted(&self, budget_ms: i64) -> Vec<OrderRecord> {
        let now = chrono::Utc::now().timestamp_millis();
        self.open
            .read()
            .iter()
            .filter(|r| {
                r.phase == OrderPhase::Submitted
                    && r.submit_ts_ms.map(|ts| now - ts > budget_ms).unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Open records still sitting in `Acknowledged` — every such record is a
    /// fill candidate for the reconciler's account-table cross-check, since
    /// nothing else in this engine ever observes a fill directly (spec.md
    /// §4.5 step 5).
    pub fn open_acknowledged(&self) -> Vec<OrderRecord> {
        self.open
            .read()
            .iter()
            .filter(|r| r.phase == OrderPhase::Acknowledged)
            .cloned()
            .collect()
    }
}

impl Default for OrderRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OrderRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderRecordStore")
            .field("open", &self.open.read().len())
            .field("closed", &self.closed.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, AccountTarget, OrderKind};

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

    #[test]
    fn fingerprints_differ_by_nonce() {
        let a = fingerprint("acct", &intent(), 0);
        let b = fingerprint("acct", &intent(), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn terminal_advance_migrates_to_closed() {
        let store = OrderRecordStore::new();
        let record = OrderRecord::new("fp-1".into(), "acct".into(), &intent());
        store.insert(record);
        assert_eq!(store.open_records().len(), 1);

        store.advance("fp-1", OrderPhase::Submitted);
        store.advance("fp-1", OrderPhase::Acknowledged);
        store.advance("fp-1", OrderPhase::Filled);

        assert_eq!(store.open_records().len(), 0);
        assert_eq!(store.closed_records().len(), 1);
    }

    #[test]
    fn invalid_advance_is_rejected_and_record_stays_open() {
        let store = OrderRecordStore::new();
        store.insert(OrderRecord::new("fp-2".into(), "acct".into(), &intent()));
        assert!(!store.advance("fp-2", OrderPhase::Filled));
        assert_eq!(store.open_records().len(), 1);
    }
}
