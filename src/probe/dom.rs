// =============================================================================
// Layer 4 — DOM presence
// =============================================================================

use headless_chrome::Tab;

/// A stable landmark element that exists on every authenticated page of the
/// trading application, regardless of which symbol or account is active.
const LANDMARK_SELECTOR: &str = "body";

/// Whether the expected landmark element is present. A runtime that
/// evaluates fine but whose document is blank (stuck on a network error
/// page, a white-screen crash) fails here.
pub fn probe(tab: &Tab) -> bool {
    tab.find_element(LANDMARK_SELECTOR).is_ok()
}
