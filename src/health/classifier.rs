// =============================================================================
// Failure classifier — layered probe outcome -> FailureClass
// =============================================================================

use crate::config::HealthConfig;
use crate::types::{FailureClass, HealthMetric, ProbeLayer};

/// Classify a failed probe round. The last metric in `round` is the one
/// that tripped (every layer before it passed), so its `layer` identifies
/// what broke; latency against the degraded/failed thresholds distinguishes
/// a slow-but-alive channel from one that never got a layer to respond at
/// all (spec.md §4.4 step 4).
pub fn classify(round: &[HealthMetric], config: &HealthConfig) -> FailureClass {
    let Some(last) = round.last() else {
        return FailureClass::NetworkDisconnection;
    };

    if last.ok && last.latency_ms as u64 >= config.failed_response_ms {
        return FailureClass::SlowResponse;
    }

    match last.layer {
        ProbeLayer::Tcp => FailureClass::NetworkDisconnection,
        ProbeLayer::Http => {
            if last.latency_ms >= config.degraded_response_ms {
                FailureClass::SlowResponse
            } else {
                FailureClass::NetworkDisconnection
            }
        }
        ProbeLayer::Runtime => FailureClass::RuntimeFailure,
        ProbeLayer::Dom => FailureClass::DomUnresponsive,
        ProbeLayer::Application => FailureClass::ApplicationStale,
    }
}

/// Distinguish an auth-expiry banner from a generic application-stale
/// condition. The Driver surfaces this explicitly rather than the health
/// monitor inferring it from probe layers alone.
pub fn classify_auth_expired() -> FailureClass {
    FailureClass::AuthenticationExpired
}

pub fn classify_driver_missing() -> FailureClass {
    FailureClass::DriverMissing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig {
            check_interval_secs: 5,
            failure_threshold: 3,
            recovery_threshold: 2,
            degraded_response_ms: 2_000,
            failed_response_ms: 5_000,
            probe_fanout_cap: 8,
        }
    }

    fn metric(layer: ProbeLayer, ok: bool, latency_ms: u64) -> HealthMetric {
        HealthMetric {
            ts_ms: 0,
            layer,
            ok,
            latency_ms,
        }
    }

    #[test]
    fn tcp_failure_is_network_disconnection() {
        let round = vec![metric(ProbeLayer::Tcp, false, 10)];
        assert_eq!(classify(&round, &config()), FailureClass::NetworkDisconnection);
    }

    #[test]
    fn dom_failure_is_dom_unresponsive() {
        let round = vec![
            metric(ProbeLayer::Tcp, true, 1),
            metric(ProbeLayer::Http, true, 10),
            metric(ProbeLayer::Runtime, true, 1),
            metric(ProbeLayer::Dom, false, 1),
        ];
        assert_eq!(classify(&round, &config()), FailureClass::DomUnresponsive);
    }

    #[test]
    fn slow_http_is_slow_response() {
        let round = vec![metric(ProbeLayer::Tcp, true, 1), metric(ProbeLayer::Http, false, 3_000)];
        assert_eq!(classify(&round, &config()), FailureClass::SlowResponse);
    }
}
