// =============================================================================
// Layer 3 — JS runtime liveness
// =============================================================================

use headless_chrome::Tab;

/// Whether the page's JS runtime still evaluates expressions. A page stuck
/// on a crashed renderer or a blocking native dialog fails this check even
/// though the CDP socket itself is fine.
pub fn probe(tab: &Tab) -> bool {
    match tab.evaluate("1 + 1", false) {
        Ok(remote) => remote.value.as_ref().and_then(|v| v.as_i64()) == Some(2),
        Err(_) => false,
    }
}
