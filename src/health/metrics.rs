// =============================================================================
// Rolling health metrics — per-session window of recent probe results
// =============================================================================

use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::types::HealthMetric;

const WINDOW: usize = 50;

struct Inner {
    recent: VecDeque<HealthMetric>,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

/// Tracks the rolling window and consecutive-outcome counters the failure
/// classifier and recovery ladder key off of (spec.md §4.4).
pub struct HealthMetrics {
    inner: RwLock<Inner>,
}

impl HealthMetrics {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                recent: VecDeque::with_capacity(WINDOW),
                consecutive_failures: 0,
                consecutive_successes: 0,
            }),
        }
    }

    /// Record the outcome of one probe round (the last metric in `round`
    /// determines overall pass/fail: a short-circuited round is a failure).
    pub fn record_round(&self, round: &[HealthMetric], all_layers_passed: bool) {
        let mut inner = self.inner.write();
        for metric in round {
            if inner.recent.len() == WINDOW {
                inner.recent.pop_front();
            }
            inner.recent.push_back(*metric);
        }
        if all_layers_passed {
            inner.consecutive_successes += 1;
            inner.consecutive_failures = 0;
        } else {
            inner.consecutive_failures += 1;
            inner.consecutive_successes = 0;
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.read().consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.inner.read().consecutive_successes
    }

    pub fn average_latency_ms(&self) -> f64 {
        let inner = self.inner.read();
        if inner.recent.is_empty() {
            return 0.0;
        }
        let sum: u64 = inner.recent.iter().map(|m| m.latency_ms).sum();
        sum as f64 / inner.recent.len() as f64
    }

    pub fn recent(&self) -> Vec<HealthMetric> {
        self.inner.read().recent.iter().copied().collect()
    }
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeLayer;

    fn metric(ok: bool, latency: u64) -> HealthMetric {
        HealthMetric {
            ts_ms: 0,
            layer: ProbeLayer::Tcp,
            ok,
            latency_ms: latency,
        }
    }

    #[test]
    fn consecutive_counters_reset_on_alternation() {
        let m = HealthMetrics::new();
        m.record_round(&[metric(true, 5)], true);
        m.record_round(&[metric(true, 5)], true);
        assert_eq!(m.consecutive_successes(), 2);
        m.record_round(&[metric(false, 5)], false);
        assert_eq!(m.consecutive_successes(), 0);
        assert_eq!(m.consecutive_failures(), 1);
    }

    #[test]
    fn window_caps_at_capacity() {
        let m = HealthMetrics::new();
        for _ in 0..(WINDOW + 10) {
            m.record_round(&[metric(true, 1)], true);
        }
        assert_eq!(m.recent().len(), WINDOW);
    }
}
