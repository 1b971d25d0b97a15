// =============================================================================
// Recovery snapshots — per-account TradingContext persistence
// =============================================================================
//
// `recovery/<account>.json` holds the last known TradingContext for one
// account. Written atomically (tmp + rename) on every mutation, same
// pattern as FleetConfig::save. Read on Supervisor restart to restore the
// order ticket (spec.md §3, §4.3).
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::types::TradingContext;

pub fn recovery_path(recovery_dir: impl AsRef<Path>, account: &str) -> PathBuf {
    recovery_dir.as_ref().join(format!("{account}.json"))
}

/// Load a persisted TradingContext for `account`, if a recovery file exists.
/// Missing file is not an error — a fresh Session simply starts empty.
pub fn load(recovery_dir: impl AsRef<Path>, account: &str) -> Result<Option<TradingContext>> {
    let path = recovery_path(recovery_dir, account);
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read recovery snapshot at {}", path.display()))?;
    let ctx: TradingContext = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse recovery snapshot at {}", path.display()))?;

    info!(account, path = %path.display(), "recovery snapshot loaded");
    Ok(Some(ctx))
}

/// Persist `ctx` for `account`, atomically.
pub fn save(recovery_dir: impl AsRef<Path>, account: &str, ctx: &TradingContext) -> Result<()> {
    let recovery_dir = recovery_dir.as_ref();
    std::fs::create_dir_all(recovery_dir)
        .with_context(|| format!("failed to create recovery dir {}", recovery_dir.display()))?;

    let path = recovery_path(recovery_dir, account);
    let tmp_path = path.with_extension("json.tmp");

    let content = serde_json::to_string_pretty(ctx)
        .context("failed to serialize recovery snapshot to JSON")?;

    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp recovery snapshot to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to rename tmp recovery snapshot to {}", path.display()))?;

    Ok(())
}

/// Best-effort save that logs rather than propagates — used from hot paths
/// (order submission) where a recovery-write failure must not block trading.
pub fn save_best_effort(recovery_dir: impl AsRef<Path>, account: &str, ctx: &TradingContext) {
    if let Err(e) = save(recovery_dir, account, ctx) {
        warn!(account, error = %e, "failed to persist recovery snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TradingContext {
            symbol: "NQ".into(),
            quantity: 4.0,
            tp_ticks: 100,
            sl_ticks: 40,
            tick_size: 0.25,
            auth_identity: Some("trader_a".into()),
            in_flight_fingerprints: vec!["fp-1".into(), "fp-2".into()],
        };

        save(dir.path(), "trader_a", &ctx).unwrap();
        let loaded = load(dir.path(), "trader_a").unwrap().unwrap();
        assert_eq!(loaded, ctx);
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path(), "nobody").unwrap().is_none());
    }

    #[test]
    fn save_is_atomic_no_tmp_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TradingContext::default();
        save(dir.path(), "trader_a", &ctx).unwrap();
        assert!(!recovery_path(dir.path(), "trader_a")
            .with_extension("json.tmp")
            .exists());
        assert!(recovery_path(dir.path(), "trader_a").exists());
    }
}
