// =============================================================================
// Layer 5 — trading application readiness
// =============================================================================

use headless_chrome::Tab;

/// The in-page Driver sets `window.__fleetDriver.ready = true` once it has
/// located the order-entry widget and confirmed the account selector is
/// populated (spec.md §4.2). This is the narrowest and most meaningful of
/// the five layers — the others can all pass while the trading surface
/// itself is still stuck on a loading spinner or an expired-session banner.
const READINESS_EXPR: &str = "!!(window.__fleetDriver && window.__fleetDriver.ready === true)";

pub fn probe(tab: &Tab) -> bool {
    match tab.evaluate(READINESS_EXPR, false) {
        Ok(remote) => remote.value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false),
        Err(_) => false,
    }
}
