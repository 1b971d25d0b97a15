// =============================================================================
// Inbound webhook — TradingView-style alert ingestion (spec.md §6)
// =============================================================================
//
// A single POST endpoint, gated by a shared passphrase embedded in the
// alert body rather than a header — this is the contract TradingView's
// alert webhook delivery actually offers (no custom headers, no bearer
// auth). The passphrase is compared in constant time for the same reason
// the admin token is (api/auth.rs).
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;
use crate::types::{AccountTarget, Action, OrderIntent, OrderKind, OrderRecord};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/webhook/tradingview", post(ingest)).with_state(state)
}

/// Wire shape of a TradingView alert message, as configured in the alert's
/// "Message" box. Fields beyond `passphrase`/`action`/`symbol`/`quantity`
/// are optional and mirror `OrderIntent`.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    passphrase: String,
    action: Action,
    symbol: String,
    quantity: f64,
    #[serde(default)]
    order_kind: Option<OrderKind>,
    #[serde(default)]
    limit_price: Option<f64>,
    #[serde(default)]
    stop_price: Option<f64>,
    #[serde(default)]
    account: Option<String>,
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn expected_passphrase() -> String {
    std::env::var("FLEET_WEBHOOK_SECRET").unwrap_or_default()
}

async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<Vec<OrderRecord>>, AppError> {
    let expected = expected_passphrase();
    if expected.is_empty() || !constant_time_eq(payload.passphrase.as_bytes(), expected.as_bytes()) {
        tracing::warn!("webhook request rejected: invalid passphrase");
        return Err(AppError::Unauthorized);
    }

    let intent = OrderIntent {
        account: payload.account.map(AccountTarget::One).unwrap_or(AccountTarget::All),
        action: payload.action,
        symbol: payload.symbol,
        quantity: payload.quantity,
        order_kind: payload.order_kind.unwrap_or(OrderKind::Market),
        limit_price: payload.limit_price,
        stop_price: payload.stop_price,
        tick_size: None,
        bracket: None,
        scale_in: None,
        state_probe: false,
        scale_in_level_index: None,
    };

    state.push_decision(format!("webhook alert: {} {} {}", intent.action, intent.quantity, intent.symbol));
    let records = state.dispatch.dispatch(intent).await?;
    state.increment_version();
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(constant_time_eq(b"abc", b"abc"));
    }
}
