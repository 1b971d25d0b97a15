// =============================================================================
// Layer 2 — CDP HTTP endpoint responsiveness
// =============================================================================

use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether `/json/version` on the CDP HTTP endpoint responds with a
/// successful status. Latency here feeds directly into the
/// degraded/failed response-time thresholds (spec.md §4.4).
pub async fn probe(port: u16) -> bool {
    let url = format!("http://127.0.0.1:{port}/json/version");
    let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    matches!(client.get(&url).send().await, Ok(resp) if resp.status().is_success())
}
