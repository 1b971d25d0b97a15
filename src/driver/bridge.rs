// =============================================================================
// Driver bridge — typed Rust calls into the injected in-page script
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use headless_chrome::Tab;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::driver::governor::{Governor, GovernorMode};
use crate::error::DriverError;
use crate::types::{AccountRow, DriverErrorKind, OrderIntent, TradingContext};

#[derive(Debug, Deserialize)]
struct RawResult {
    ok: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    elapsed_ms: Option<f64>,
    #[serde(default)]
    acknowledged: Option<bool>,
}

fn parse_kind(kind: Option<&str>) -> DriverErrorKind {
    match kind {
        Some("DOM_ELEMENT_MISSING") => DriverErrorKind::DomElementMissing,
        Some("VALIDATION_TIMEOUT") => DriverErrorKind::ValidationTimeout,
        Some("INSUFFICIENT_FUNDS") => DriverErrorKind::InsufficientFunds,
        Some("MARKET_CLOSED") => DriverErrorKind::MarketClosed,
        Some("CONNECTION_TIMEOUT") => DriverErrorKind::ConnectionTimeout,
        Some("ORDER_REJECTION") => DriverErrorKind::OrderRejection,
        _ => DriverErrorKind::Unknown,
    }
}

fn evaluate_raw(tab: &Tab, expr: &str, governor: &Governor) -> Result<RawResult, DriverError> {
    let start = Instant::now();
    let remote = tab
        .evaluate(expr, false)
        .map_err(|e| DriverError::Bridge(e.to_string()))?;
    let elapsed = start.elapsed().as_millis() as u64;
    governor.observe(elapsed);

    let value = remote
        .value
        .ok_or_else(|| DriverError::Bridge("driver call returned no value".into()))?;
    serde_json::from_value(value).map_err(|e| DriverError::Bridge(format!("malformed driver response: {e}")))
}

/// Evaluate `expr`, decode the driver's `{ok, kind, detail, elapsedMs}`
/// contract, and fold the measured time into `governor`. Used for calls with
/// no acknowledgement distinction (switchAccount, changeSymbol, ...).
fn call(tab: &Tab, expr: &str, governor: &Governor) -> Result<(), DriverError> {
    let raw = evaluate_raw(tab, expr, governor)?;
    if raw.ok {
        Ok(())
    } else {
        let reason = raw.detail.unwrap_or_else(|| "no detail".into());
        Err(DriverError::Rejection {
            kind: parse_kind(raw.kind.as_deref()),
            reason,
        })
    }
}

/// Outcome of a submission call once the Driver's own click has gone out.
/// `Unacknowledged` is the no-silent-failures case (spec.md §4.2, §8
/// scenario 3): the click happened but neither an error banner nor a
/// success signal was observed before POST_VALIDATE returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Acknowledged,
    Unacknowledged,
}

fn call_submit(tab: &Tab, expr: &str, governor: &Governor) -> Result<SubmitOutcome, DriverError> {
    let raw = evaluate_raw(tab, expr, governor)?;
    if raw.ok {
        if raw.acknowledged.unwrap_or(true) {
            Ok(SubmitOutcome::Acknowledged)
        } else {
            Ok(SubmitOutcome::Unacknowledged)
        }
    } else {
        let reason = raw.detail.unwrap_or_else(|| "no detail".into());
        Err(DriverError::Rejection {
            kind: parse_kind(raw.kind.as_deref()),
            reason,
        })
    }
}

/// Verify the bridge is present and reports readiness. A Session entering
/// `READY` without this returns `DriverMissing` (spec.md §4.3 step 7).
pub fn ensure_injected(tab: &Tab) -> Result<(), DriverError> {
    let remote = tab
        .evaluate("!!(window.__fleetDriver && window.__fleetDriver.ready)", false)
        .map_err(|e| DriverError::Bridge(e.to_string()))?;
    let ready = remote.value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false);
    if ready {
        Ok(())
    } else {
        Err(DriverError::DriverMissing("window.__fleetDriver not ready".into()))
    }
}

#[derive(Serialize)]
struct OrderParams<'a> {
    symbol: &'a str,
    action: String,
    quantity: f64,
    #[serde(rename = "orderKind")]
    order_kind: String,
    #[serde(rename = "limitPrice", skip_serializing_if = "Option::is_none")]
    limit_price: Option<f64>,
    #[serde(rename = "stopPrice", skip_serializing_if = "Option::is_none")]
    stop_price: Option<f64>,
    #[serde(rename = "writeAttempts")]
    write_attempts: u32,
    #[serde(rename = "skipDeepVerify")]
    skip_deep_verify: bool,
}

/// Base write-verify attempts before the governor's backoff multiplier is
/// applied (spec.md §4.2 write-verify loop; the multiplier itself is the
/// governor's `DEGRADED`/`CRITICAL` pacing response).
const BASE_WRITE_ATTEMPTS: u32 = 3;

fn order_params<'a>(intent: &'a OrderIntent, governor: &Governor) -> OrderParams<'a> {
    let mode = governor.mode();
    OrderParams {
        symbol: &intent.symbol,
        action: intent.action.to_string(),
        quantity: intent.quantity,
        order_kind: intent.order_kind.to_string(),
        limit_price: intent.limit_price,
        stop_price: intent.stop_price,
        write_attempts: BASE_WRITE_ATTEMPTS * governor.backoff_multiplier(),
        // The deep price re-verify is the heaviest non-critical POST_VALIDATE
        // check; DEGRADED and CRITICAL both shed it, keeping the essential
        // write-verify and banner/ack scans running regardless of mode.
        skip_deep_verify: mode != GovernorMode::Optimal,
    }
}

pub fn submit_order(tab: &Tab, intent: &OrderIntent, governor: &Governor) -> Result<SubmitOutcome, DriverError> {
    let params = json!(order_params(intent, governor));
    let expr = format!("window.__fleetDriver.submitOrder({params})");
    call_submit(tab, &expr, governor)
}

/// Thin alias for ticket UIs that expose a native one-shot bracket attach.
/// The dispatcher does not use this to build linked bracket legs — that
/// composition happens as three separate `submit_order` calls so each leg
/// gets its own fingerprint and phase (spec.md §4.2).
pub fn submit_bracket(tab: &Tab, intent: &OrderIntent, governor: &Governor) -> Result<SubmitOutcome, DriverError> {
    let params = json!(order_params(intent, governor));
    let expr = format!("window.__fleetDriver.submitBracket({params})");
    call_submit(tab, &expr, governor)
}

pub fn exit_position(tab: &Tab, symbol: &str, governor: &Governor) -> Result<(), DriverError> {
    let expr = format!("window.__fleetDriver.exitPosition({})", json!(symbol));
    call(tab, &expr, governor)
}

pub fn change_symbol(tab: &Tab, symbol: &str, governor: &Governor) -> Result<(), DriverError> {
    let expr = format!("window.__fleetDriver.changeSymbol({})", json!(symbol));
    call(tab, &expr, governor)
}

pub fn switch_account(tab: &Tab, account: &str, governor: &Governor) -> Result<(), DriverError> {
    let expr = format!("window.__fleetDriver.switchAccount({})", json!(account));
    call(tab, &expr, governor)
}

/// Last-price reference read from the market-analyzer panel, used to anchor
/// bracket TP/SL offsets and scale-in ladder spacing (spec.md §4.2). Never
/// touches the order ticket.
pub fn read_market_price(tab: &Tab, governor: &Governor) -> Result<f64, DriverError> {
    let raw = evaluate_raw(tab, "window.__fleetDriver.readMarketPrice()", governor)?;
    if !raw.ok {
        let reason = raw.detail.unwrap_or_else(|| "no detail".into());
        return Err(DriverError::Rejection {
            kind: parse_kind(raw.kind.as_deref()),
            reason,
        });
    }
    // readMarketPrice's success payload carries `price`, not the standard
    // submit contract — re-evaluate narrowly rather than widen RawResult.
    let remote = tab
        .evaluate("window.__fleetDriver.readMarketPrice().price", false)
        .map_err(|e| DriverError::Bridge(e.to_string()))?;
    remote
        .value
        .and_then(|v| v.as_f64())
        .ok_or_else(|| DriverError::Bridge("readMarketPrice returned no price".into()))
}

/// Authentication-state classification consulted at `AUTHENTICATING`
/// (spec.md §4.3 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    LoginForm,
    AccountChooser,
    Authenticated,
    Unknown,
}

pub fn classify_auth_state(tab: &Tab) -> Result<AuthState, DriverError> {
    let remote = tab
        .evaluate("window.__fleetDriver.classifyAuthState()", false)
        .map_err(|e| DriverError::Bridge(e.to_string()))?;
    let raw = remote.value.and_then(|v| v.as_str().map(|s| s.to_string()));
    Ok(match raw.as_deref() {
        Some("login_form") => AuthState::LoginForm,
        Some("account_chooser") => AuthState::AccountChooser,
        Some("authenticated") => AuthState::Authenticated,
        _ => AuthState::Unknown,
    })
}

pub fn type_credentials(tab: &Tab, identity: &str, secret: &str, governor: &Governor) -> Result<(), DriverError> {
    let expr = format!(
        "window.__fleetDriver.typeCredentials({}, {})",
        json!(identity),
        json!(secret)
    );
    call(tab, &expr, governor)
}

pub fn pick_account(tab: &Tab, identity: &str, governor: &Governor) -> Result<(), DriverError> {
    let expr = format!("window.__fleetDriver.pickAccount({})", json!(identity));
    call(tab, &expr, governor)
}

/// Replay a recovered `TradingContext` into the live ticket on entering
/// `READY` (spec.md §4.3 step 6).
pub fn restore_trading_context(tab: &Tab, ctx: &TradingContext, governor: &Governor) -> Result<(), DriverError> {
    let expr = format!("window.__fleetDriver.restoreTradingContext({})", json!(ctx));
    call(tab, &expr, governor)
}

pub fn scrape_accounts(tab: &Arc<Tab>) -> Result<Vec<AccountRow>, DriverError> {
    let remote = tab
        .evaluate("JSON.stringify(window.__fleetDriver.scrapeAccounts())", false)
        .map_err(|e| DriverError::Bridge(e.to_string()))?;
    let raw = remote
        .value
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .ok_or_else(|| DriverError::Bridge("scrapeAccounts returned no string".into()))?;

    #[derive(Deserialize)]
    struct RawRow {
        account: String,
        balance: f64,
        #[serde(rename = "openPnl")]
        open_pnl: f64,
        #[serde(rename = "netLiq")]
        net_liq: f64,
    }

    let rows: Vec<RawRow> =
        serde_json::from_str(&raw).map_err(|e| DriverError::Bridge(format!("malformed account scrape: {e}")))?;
    Ok(rows
        .into_iter()
        .map(|r| AccountRow {
            account: r.account,
            balance: r.balance,
            open_pnl: r.open_pnl,
            net_liq: r.net_liq,
        })
        .collect())
}
