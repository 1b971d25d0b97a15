// =============================================================================
// Fleet Configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration for the copy-trade fleet engine. Every tunable
// parameter lives here; seed defaults come straight from spec.md §8.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_check_interval_secs() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    2
}

fn default_degraded_response_ms() -> u64 {
    2_000
}

fn default_failed_response_ms() -> u64 {
    5_000
}

fn default_operation_budget_ms() -> u64 {
    10
}

fn default_restart_max_attempts() -> u32 {
    3
}

fn default_restart_backoff_base_secs() -> u64 {
    2
}

fn default_restart_backoff_cap_secs() -> u64 {
    30
}

fn default_probe_fanout_cap() -> usize {
    8
}

fn default_bootstrap_port() -> u16 {
    9000
}

fn default_port_pool_start() -> u16 {
    9222
}

fn default_port_pool_size() -> u16 {
    200
}

fn default_application_url() -> String {
    "https://trader.tradovate.com/welcome".to_string()
}

fn default_profile_root() -> String {
    "profiles".to_string()
}

fn default_recovery_dir() -> String {
    "recovery".to_string()
}

fn default_violation_rate_threshold() -> f64 {
    0.01
}

fn default_governor_window() -> usize {
    50
}

// =============================================================================
// HealthConfig
// =============================================================================

/// Tunable parameters for the Connection Health Monitor (spec.md §4.4, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
    #[serde(default = "default_degraded_response_ms")]
    pub degraded_response_ms: u64,
    #[serde(default = "default_failed_response_ms")]
    pub failed_response_ms: u64,
    #[serde(default = "default_probe_fanout_cap")]
    pub probe_fanout_cap: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
            degraded_response_ms: default_degraded_response_ms(),
            failed_response_ms: default_failed_response_ms(),
            probe_fanout_cap: default_probe_fanout_cap(),
        }
    }
}

// =============================================================================
// GovernorConfig
// =============================================================================

/// Tunable parameters for the Driver's adaptive performance governor
/// (spec.md §4.2, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_operation_budget_ms")]
    pub operation_budget_ms: u64,
    #[serde(default = "default_governor_window")]
    pub rolling_window: usize,
    #[serde(default = "default_violation_rate_threshold")]
    pub violation_rate_threshold: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            operation_budget_ms: default_operation_budget_ms(),
            rolling_window: default_governor_window(),
            violation_rate_threshold: default_violation_rate_threshold(),
        }
    }
}

// =============================================================================
// RestartPolicy
// =============================================================================

/// Supervisor restart policy (spec.md §4.3, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartPolicy {
    #[serde(default = "default_restart_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_restart_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_restart_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_restart_max_attempts(),
            backoff_base_secs: default_restart_backoff_base_secs(),
            backoff_cap_secs: default_restart_backoff_cap_secs(),
        }
    }
}

impl RestartPolicy {
    /// Exponential backoff for the given 0-indexed attempt number, capped.
    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        let secs = self.backoff_base_secs.saturating_mul(1u64 << attempt.min(16));
        std::time::Duration::from_secs(secs.min(self.backoff_cap_secs))
    }
}

// =============================================================================
// FleetConfig
// =============================================================================

/// Top-level runtime configuration for the fleet engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Reserved bootstrap port — never assigned to a Session, never killed.
    #[serde(default = "default_bootstrap_port")]
    pub bootstrap_port: u16,

    /// First port in the per-account debug-port pool.
    #[serde(default = "default_port_pool_start")]
    pub port_pool_start: u16,

    /// Number of ports available in the pool (primary + backup channels).
    #[serde(default = "default_port_pool_size")]
    pub port_pool_size: u16,

    /// Initial tab URL for every launched Session.
    #[serde(default = "default_application_url")]
    pub application_url: String,

    /// Root directory under which per-account isolated profile dirs live.
    #[serde(default = "default_profile_root")]
    pub profile_root: String,

    /// Root directory for per-account recovery snapshots.
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: String,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub governor: GovernorConfig,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Whether fan-out dispatch is currently paused by an operator.
    #[serde(default)]
    pub dispatch_paused: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            bootstrap_port: default_bootstrap_port(),
            port_pool_start: default_port_pool_start(),
            port_pool_size: default_port_pool_size(),
            application_url: default_application_url(),
            profile_root: default_profile_root(),
            recovery_dir: default_recovery_dir(),
            health: HealthConfig::default(),
            governor: GovernorConfig::default(),
            restart_policy: RestartPolicy::default(),
            dispatch_paused: false,
        }
    }
}

impl FleetConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fleet config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse fleet config from {}", path.display()))?;

        info!(
            path = %path.display(),
            bootstrap_port = config.bootstrap_port,
            port_pool_start = config.port_pool_start,
            port_pool_size = config.port_pool_size,
            "fleet config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialize fleet config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "fleet config saved (atomic)");
        Ok(())
    }

    /// Whether `port` is the reserved bootstrap port (spec.md §3 invariants).
    pub fn is_reserved_port(&self, port: u16) -> bool {
        port == self.bootstrap_port
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_seed_values() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.health.check_interval_secs, 5);
        assert_eq!(cfg.health.failure_threshold, 3);
        assert_eq!(cfg.health.recovery_threshold, 2);
        assert_eq!(cfg.health.degraded_response_ms, 2_000);
        assert_eq!(cfg.health.failed_response_ms, 5_000);
        assert_eq!(cfg.governor.operation_budget_ms, 10);
        assert_eq!(cfg.restart_policy.max_attempts, 3);
        assert_eq!(cfg.restart_policy.backoff_base_secs, 2);
        assert_eq!(cfg.restart_policy.backoff_cap_secs, 30);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: FleetConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bootstrap_port, 9000);
        assert_eq!(cfg.port_pool_start, 9222);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = FleetConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: FleetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.bootstrap_port, cfg2.bootstrap_port);
        assert_eq!(cfg.health.failure_threshold, cfg2.health.failure_threshold);
    }

    #[test]
    fn reserved_port_check() {
        let cfg = FleetConfig::default();
        assert!(cfg.is_reserved_port(9000));
        assert!(!cfg.is_reserved_port(9222));
    }

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff_for(0).as_secs(), 2);
        assert_eq!(policy.backoff_for(1).as_secs(), 4);
        assert_eq!(policy.backoff_for(2).as_secs(), 8);
        assert_eq!(policy.backoff_for(10).as_secs(), 30);
    }
}
