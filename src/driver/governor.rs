// =============================================================================
// Performance governor — adapts Driver pacing to observed operation latency
// =============================================================================
//
// Tracks a rolling window of per-operation elapsed times against the
// configured budget. A high violation rate downgrades the mode, which
// callers use to widen write-verify retry backoff and reduce fan-out
// concurrency (spec.md §4.2).
// =============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::config::GovernorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GovernorMode {
    Optimal,
    Degraded,
    Critical,
}

impl std::fmt::Display for GovernorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Optimal => "OPTIMAL",
            Self::Degraded => "DEGRADED",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

struct Inner {
    window: VecDeque<bool>,
    capacity: usize,
    mode: GovernorMode,
}

pub struct Governor {
    config: GovernorConfig,
    inner: Mutex<Inner>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        let capacity = config.rolling_window.max(1);
        Self {
            config,
            inner: Mutex::new(Inner {
                window: VecDeque::with_capacity(capacity),
                capacity,
                mode: GovernorMode::Optimal,
            }),
        }
    }

    /// Record one operation's elapsed time and recompute the mode.
    pub fn observe(&self, elapsed_ms: u64) -> GovernorMode {
        let violated = elapsed_ms > self.config.operation_budget_ms;
        let mut inner = self.inner.lock();
        if inner.window.len() == inner.capacity {
            inner.window.pop_front();
        }
        inner.window.push_back(violated);

        let violations = inner.window.iter().filter(|v| **v).count();
        let rate = violations as f64 / inner.window.len() as f64;

        inner.mode = if rate >= self.config.violation_rate_threshold * 4.0 {
            GovernorMode::Critical
        } else if rate >= self.config.violation_rate_threshold {
            GovernorMode::Degraded
        } else {
            GovernorMode::Optimal
        };
        inner.mode
    }

    pub fn mode(&self) -> GovernorMode {
        self.inner.lock().mode
    }

    /// Retry backoff multiplier applied to write-verify loops under
    /// degraded/critical pacing.
    pub fn backoff_multiplier(&self) -> u32 {
        match self.mode() {
            GovernorMode::Optimal => 1,
            GovernorMode::Degraded => 2,
            GovernorMode::Critical => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GovernorConfig {
        GovernorConfig {
            operation_budget_ms: 10,
            rolling_window: 10,
            violation_rate_threshold: 0.1,
        }
    }

    #[test]
    fn starts_optimal() {
        let g = Governor::new(config());
        assert_eq!(g.mode(), GovernorMode::Optimal);
    }

    #[test]
    fn sustained_violations_degrade_then_escalate() {
        let g = Governor::new(config());
        for _ in 0..2 {
            g.observe(50);
        }
        assert_eq!(g.mode(), GovernorMode::Degraded);

        for _ in 0..8 {
            g.observe(50);
        }
        assert_eq!(g.mode(), GovernorMode::Critical);
    }

    #[test]
    fn recovers_once_violations_roll_out_of_window() {
        let g = Governor::new(config());
        for _ in 0..10 {
            g.observe(50);
        }
        assert_eq!(g.mode(), GovernorMode::Critical);
        for _ in 0..10 {
            g.observe(1);
        }
        assert_eq!(g.mode(), GovernorMode::Optimal);
    }
}
