// =============================================================================
// Shared types used across the copy-trade fleet engine
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Lifecycle & health
// =============================================================================

/// Forward-only lifecycle lattice for one Session. `Degraded`/`Recovering`/
/// `Crashed` may loop back to `Authenticating` across a restart; `Retired` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecyclePhase {
    Initial,
    Launching,
    Connecting,
    Loading,
    Authenticating,
    Ready,
    Degraded,
    Recovering,
    Crashed,
    Retired,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "INITIAL",
            Self::Launching => "LAUNCHING",
            Self::Connecting => "CONNECTING",
            Self::Loading => "LOADING",
            Self::Authenticating => "AUTHENTICATING",
            Self::Ready => "READY",
            Self::Degraded => "DEGRADED",
            Self::Recovering => "RECOVERING",
            Self::Crashed => "CRASHED",
            Self::Retired => "RETIRED",
        };
        write!(f, "{s}")
    }
}

impl LifecyclePhase {
    /// Whether a restart may re-enter `Authenticating` from this phase.
    pub fn can_loop_to_authenticating(self) -> bool {
        matches!(self, Self::Degraded | Self::Recovering | Self::Crashed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Retired)
    }
}

/// Orthogonal to `LifecyclePhase` — a Session can be `Ready` + `Degraded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Failed,
    Recovering,
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Failed => "FAILED",
            Self::Recovering => "RECOVERING",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Classification of a `Failed` health downgrade (spec.md §4.4 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    NetworkDisconnection,
    SlowResponse,
    AuthenticationExpired,
    DomUnresponsive,
    RuntimeFailure,
    DriverMissing,
    ApplicationStale,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NetworkDisconnection => "NETWORK_DISCONNECTION",
            Self::SlowResponse => "SLOW_RESPONSE",
            Self::AuthenticationExpired => "AUTHENTICATION_EXPIRED",
            Self::DomUnresponsive => "DOM_UNRESPONSIVE",
            Self::RuntimeFailure => "RUNTIME_FAILURE",
            Self::DriverMissing => "DRIVER_MISSING",
            Self::ApplicationStale => "APPLICATION_STALE",
        };
        write!(f, "{s}")
    }
}

/// One probe layer's result, folded into the rolling window kept by the
/// Connection Health Monitor (spec.md §4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthMetric {
    pub ts_ms: i64,
    pub layer: ProbeLayer,
    pub ok: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeLayer {
    Tcp,
    Http,
    Runtime,
    Dom,
    Application,
}

impl std::fmt::Display for ProbeLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tcp => "TCP",
            Self::Http => "HTTP",
            Self::Runtime => "RUNTIME",
            Self::Dom => "DOM",
            Self::Application => "APPLICATION",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Trading context (preserved across restarts)
// =============================================================================

/// Trading context restored into the order ticket on every (re)authentication
/// and snapshotted to `recovery/<account>.json` on every mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradingContext {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub tp_ticks: u32,
    #[serde(default)]
    pub sl_ticks: u32,
    #[serde(default)]
    pub tick_size: f64,
    #[serde(default)]
    pub auth_identity: Option<String>,
    /// Fingerprints of orders submitted but not yet resolved to a terminal
    /// phase. Survives a restart so reconciliation can resume.
    #[serde(default)]
    pub in_flight_fingerprints: Vec<String>,
}

// =============================================================================
// Order intent (declarative, pre-materialization)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

impl Action {
    /// The closing side for a bracket TP/SL child leg.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}

/// Optional bracket attached to an intent: take-profit / stop-loss offsets in
/// ticks, measured from the fill price of the parent order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BracketSpec {
    pub tp_ticks: u32,
    pub sl_ticks: u32,
}

/// Optional scale-in plan: split the parent quantity across `levels` child
/// orders spaced by `spacing_ticks`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScaleInPlan {
    pub levels: u32,
    pub spacing_ticks: u32,
}

/// Which sessions an intent targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTarget {
    All,
    One(String),
}

/// A declarative trade request, prior to per-account materialization into
/// `OrderRecord`s. Mirrors the dashboard/webhook wire payload (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub account: AccountTarget,
    pub action: Action,
    pub symbol: String,
    pub quantity: f64,
    #[serde(default = "default_order_kind")]
    pub order_kind: OrderKind,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub tick_size: Option<f64>,
    #[serde(default)]
    pub bracket: Option<BracketSpec>,
    #[serde(default)]
    pub scale_in: Option<ScaleInPlan>,
    /// True for a state-probing intent, exempt from the `Ready` eligibility
    /// gate (spec.md §3 invariants).
    #[serde(default)]
    pub state_probe: bool,
    /// Set by `materialize_levels` on each scale-in child; the dispatcher
    /// uses it together with `scale_in.spacing_ticks` to offset the child's
    /// price from a session-side reference price fetched at dispatch time.
    /// Never set on the parent intent as submitted over the wire.
    #[serde(default)]
    pub scale_in_level_index: Option<u32>,
}

fn default_order_kind() -> OrderKind {
    OrderKind::Market
}

impl OrderIntent {
    /// Structural validation (spec.md §4.5 step 1). Does not consult the
    /// session registry — pure function of the intent itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("symbol must not be empty".into());
        }
        if self.quantity <= 0.0 {
            return Err("quantity must be > 0".into());
        }
        if let Some(scale) = &self.scale_in {
            if scale.levels == 0 {
                return Err("scale_in levels must be >= 1".into());
            }
            if scale.levels > 1 {
                let levels = scale.levels as f64;
                let per_level = self.quantity / levels;
                if per_level < 1.0 || (self.quantity % levels).abs() > f64::EPSILON {
                    return Err(format!(
                        "quantity {} is not evenly divisible into {} scale-in levels with at least one contract per level",
                        self.quantity, scale.levels
                    ));
                }
            }
        }
        Ok(())
    }

    /// Decompose a scale-in intent into `levels` sub-intents of
    /// `quantity/levels` size each (spec.md §4.2). Each child keeps
    /// `spacing_ticks` and records its own index so the dispatcher can price
    /// it `index * spacing_ticks` away from a reference price fetched right
    /// before submission — this function has no DOM access and cannot
    /// resolve a market price itself. Returns a single-element vec (a clone
    /// of `self`) when there is no scale-in plan.
    pub fn materialize_levels(&self) -> Vec<OrderIntent> {
        let Some(scale) = self.scale_in else {
            return vec![self.clone()];
        };
        if scale.levels <= 1 {
            return vec![self.clone()];
        }
        let per_level_qty = self.quantity / scale.levels as f64;
        (0..scale.levels)
            .map(|i| {
                let mut level = self.clone();
                level.quantity = per_level_qty;
                level.scale_in = Some(ScaleInPlan {
                    levels: 1,
                    spacing_ticks: scale.spacing_ticks,
                });
                level.scale_in_level_index = Some(i);
                level
            })
            .collect()
    }
}

// =============================================================================
// OrderRecord (materialized per session/intent pair)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPhase {
    PreValidated,
    Submitted,
    Acknowledged,
    Filled,
    Partial,
    Rejected,
    Cancelled,
    Orphaned,
}

impl std::fmt::Display for OrderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreValidated => "PRE_VALIDATED",
            Self::Submitted => "SUBMITTED",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Filled => "FILLED",
            Self::Partial => "PARTIAL",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Orphaned => "ORPHANED",
        };
        write!(f, "{s}")
    }
}

impl OrderPhase {
    /// Whether a given transition respects the monotone lattice ordering
    /// (spec.md §3 invariants — phases never move backward).
    pub fn can_transition_to(self, next: Self) -> bool {
        use OrderPhase::*;
        if self == next {
            return false;
        }
        matches!(
            (self, next),
            (PreValidated, Submitted)
                | (PreValidated, Rejected)
                | (Submitted, Acknowledged)
                | (Submitted, Orphaned)
                | (Submitted, Rejected)
                | (Acknowledged, Filled)
                | (Acknowledged, Partial)
                | (Acknowledged, Cancelled)
                | (Acknowledged, Orphaned)
                | (Partial, Filled)
                | (Partial, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Rejected | Self::Cancelled | Self::Orphaned
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fill {
    pub ts_ms: i64,
    pub px: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: OrderPhase,
    pub ts_ms: i64,
}

/// Normalized error taxonomy observed and reported by the in-page Driver
/// (spec.md §4.2). The exact mapping from observed banner text to these
/// kinds is UI-locale-dependent and left to a pluggable `ErrorClassifier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverErrorKind {
    InsufficientFunds,
    MarketClosed,
    ConnectionTimeout,
    OrderRejection,
    DomElementMissing,
    ValidationTimeout,
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::MarketClosed => "MARKET_CLOSED",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::OrderRejection => "ORDER_REJECTION",
            Self::DomElementMissing => "DOM_ELEMENT_MISSING",
            Self::ValidationTimeout => "VALIDATION_TIMEOUT",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryHint {
    Retry,
    Surface,
    Abort,
}

impl DriverErrorKind {
    /// Recovery hint table (spec.md §4.2).
    pub fn recovery_hint(self) -> RecoveryHint {
        match self {
            Self::InsufficientFunds | Self::MarketClosed => RecoveryHint::Surface,
            Self::ConnectionTimeout => RecoveryHint::Retry,
            Self::OrderRejection => RecoveryHint::Surface,
            Self::DomElementMissing | Self::ValidationTimeout => RecoveryHint::Abort,
            Self::Unknown => RecoveryHint::Surface,
        }
    }
}

/// Materialized, phased outcome for one (session, intent) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub fingerprint: String,
    pub account: String,
    pub symbol: String,
    pub action: Action,
    pub quantity: f64,
    pub phase: OrderPhase,
    #[serde(default)]
    pub submit_ts_ms: Option<i64>,
    #[serde(default)]
    pub first_fill_ts_ms: Option<i64>,
    #[serde(default)]
    pub complete_ts_ms: Option<i64>,
    #[serde(default)]
    pub fills: Vec<Fill>,
    pub requested_px: Option<f64>,
    #[serde(default)]
    pub avg_fill_px: Option<f64>,
    #[serde(default)]
    pub slippage: Option<f64>,
    #[serde(default)]
    pub bracket_children: Vec<String>,
    #[serde(default)]
    pub rejection_code: Option<DriverErrorKind>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub events: Vec<PhaseTransition>,
}

impl OrderRecord {
    pub fn new(fingerprint: String, account: String, intent: &OrderIntent) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            fingerprint,
            account,
            symbol: intent.symbol.clone(),
            action: intent.action,
            quantity: intent.quantity,
            phase: OrderPhase::PreValidated,
            submit_ts_ms: None,
            first_fill_ts_ms: None,
            complete_ts_ms: None,
            fills: Vec::new(),
            requested_px: intent.limit_price.or(intent.stop_price),
            avg_fill_px: None,
            slippage: None,
            bracket_children: Vec::new(),
            rejection_code: None,
            rejection_reason: None,
            events: vec![PhaseTransition {
                phase: OrderPhase::PreValidated,
                ts_ms: now,
            }],
        }
    }

    /// Advance to `next`, rejecting any move that violates the monotone
    /// lattice. Returns `false` without mutating state on an invalid move.
    pub fn advance(&mut self, next: OrderPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            return false;
        }
        let now = chrono::Utc::now().timestamp_millis();
        self.phase = next;
        self.events.push(PhaseTransition {
            phase: next,
            ts_ms: now,
        });
        match next {
            OrderPhase::Submitted => self.submit_ts_ms = Some(now),
            OrderPhase::Filled | OrderPhase::Partial => {
                if self.first_fill_ts_ms.is_none() {
                    self.first_fill_ts_ms = Some(now);
                }
            }
            _ => {}
        }
        if next.is_terminal() {
            self.complete_ts_ms = Some(now);
        }
        true
    }

    pub fn record_fill(&mut self, fill: Fill) {
        self.fills.push(fill);
        let total_qty: f64 = self.fills.iter().map(|f| f.qty).sum();
        if total_qty > 0.0 {
            let notional: f64 = self.fills.iter().map(|f| f.px * f.qty).sum();
            self.avg_fill_px = Some(notional / total_qty);
            if let Some(req) = self.requested_px {
                self.slippage = self.avg_fill_px.map(|avg| avg - req);
            }
        }
    }
}

// =============================================================================
// Account snapshot (dashboard-facing)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRow {
    pub account: String,
    pub balance: f64,
    pub open_pnl: f64,
    pub net_liq: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_intent() -> OrderIntent {
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
    fn scale_in_divisibility_rejects_remainder() {
        let mut intent = base_intent();
        intent.scale_in = Some(ScaleInPlan {
            levels: 4,
            spacing_ticks: 20,
        });
        assert!(intent.validate().is_err());
    }

    #[test]
    fn scale_in_divisibility_accepts_exact_multiple() {
        let mut intent = base_intent();
        intent.quantity = 4.0;
        intent.scale_in = Some(ScaleInPlan {
            levels: 4,
            spacing_ticks: 20,
        });
        assert!(intent.validate().is_ok());
        let levels = intent.materialize_levels();
        assert_eq!(levels.len(), 4);
        assert!(levels.iter().all(|l| (l.quantity - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn order_phase_never_moves_backward() {
        assert!(OrderPhase::PreValidated.can_transition_to(OrderPhase::Submitted));
        assert!(!OrderPhase::Submitted.can_transition_to(OrderPhase::PreValidated));
        assert!(!OrderPhase::Filled.can_transition_to(OrderPhase::Acknowledged));
    }

    #[test]
    fn orphaned_is_terminal() {
        assert!(OrderPhase::Orphaned.is_terminal());
        assert!(!OrderPhase::Orphaned.can_transition_to(OrderPhase::Filled));
    }

    #[test]
    fn order_record_advance_rejects_invalid_jump() {
        let intent = base_intent();
        let mut record = OrderRecord::new("fp-1".into(), "acct-1".into(), &intent);
        assert!(!record.advance(OrderPhase::Filled));
        assert_eq!(record.phase, OrderPhase::PreValidated);
        assert!(record.advance(OrderPhase::Submitted));
        assert!(record.advance(OrderPhase::Acknowledged));
        assert!(record.advance(OrderPhase::Filled));
        assert_eq!(record.events.len(), 4);
    }
}

#[cfg(test)]
mod phase_lattice_proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_phase() -> impl Strategy<Value = OrderPhase> {
        prop_oneof![
            Just(OrderPhase::PreValidated),
            Just(OrderPhase::Submitted),
            Just(OrderPhase::Acknowledged),
            Just(OrderPhase::Filled),
            Just(OrderPhase::Partial),
            Just(OrderPhase::Rejected),
            Just(OrderPhase::Cancelled),
            Just(OrderPhase::Orphaned),
        ]
    }

    proptest! {
        /// For any sequence of attempted transitions fed through the public
        /// `OrderRecord::advance` API, the record never lands on a phase
        /// reachable only by an illegal edge, and once a terminal phase is
        /// reached no later attempt moves it away again (spec.md §3
        /// invariants: phases never move backward, terminal phases stick).
        #[test]
        fn advance_sequence_respects_the_lattice(attempts in prop::collection::vec(any_phase(), 0..30)) {
            let intent = OrderIntent {
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
            };
            let mut record = OrderRecord::new("fp-proptest".into(), "acct-proptest".into(), &intent);

            for next in attempts {
                let prev_phase = record.phase;
                let prev_event_count = record.events.len();
                let was_terminal = prev_phase.is_terminal();

                let accepted = record.advance(next);

                if was_terminal {
                    prop_assert!(!accepted, "advance must refuse to leave a terminal phase");
                }
                if accepted {
                    prop_assert!(prev_phase.can_transition_to(next));
                    prop_assert_eq!(record.phase, next);
                    prop_assert_eq!(record.events.len(), prev_event_count + 1);
                    prop_assert_eq!(record.events.last().unwrap().phase, next);
                } else {
                    prop_assert_eq!(record.phase, prev_phase);
                    prop_assert_eq!(record.events.len(), prev_event_count);
                }
            }
        }
    }
}
