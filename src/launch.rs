// =============================================================================
// Browser launch contract — port pool, profile dirs, CLI flags (spec.md §6)
// =============================================================================

use std::collections::HashSet;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::config::FleetConfig;
use crate::error::SupervisorError;

/// Flags every Session's browser process is launched with: suppress
/// first-run/update/notification noise, force a fresh profile, enable
/// remote debugging on the assigned port. Exact contract from spec.md §6.
pub fn launch_flags(debug_port: u16, profile_dir: &std::path::Path) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={debug_port}"),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-notifications".to_string(),
        "--disable-popup-blocking".to_string(),
        "--disable-session-crashed-bubble".to_string(),
        "--disable-save-password-bubble".to_string(),
        "--disable-restore-session-state".to_string(),
        "--disable-infobars".to_string(),
        "--disable-background-networking".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ]
}

/// Owns the pool of debug ports available to Sessions. The bootstrap port
/// is never allocated and never released back into the pool (spec.md §3
/// invariants, §6).
pub struct PortPool {
    bootstrap_port: u16,
    inner: Mutex<PortPoolInner>,
}

struct PortPoolInner {
    available: Vec<u16>,
    in_use: HashSet<u16>,
}

impl PortPool {
    pub fn new(config: &FleetConfig) -> Self {
        let mut available: Vec<u16> = (config.port_pool_start
            ..config.port_pool_start.saturating_add(config.port_pool_size))
            .filter(|p| *p != config.bootstrap_port)
            .collect();
        available.reverse(); // pop() takes from the low end first
        Self {
            bootstrap_port: config.bootstrap_port,
            inner: Mutex::new(PortPoolInner {
                available,
                in_use: HashSet::new(),
            }),
        }
    }

    /// Reserve two distinct ports for one Session: primary and backup
    /// channel. Never returns the bootstrap port.
    pub fn acquire_pair(&self) -> Result<(u16, u16), SupervisorError> {
        let mut inner = self.inner.lock();
        let primary = inner.available.pop().ok_or(SupervisorError::PortPoolExhausted)?;
        let backup = match inner.available.pop() {
            Some(p) => p,
            None => {
                inner.available.push(primary);
                return Err(SupervisorError::PortPoolExhausted);
            }
        };
        inner.in_use.insert(primary);
        inner.in_use.insert(backup);
        debug_assert_ne!(primary, self.bootstrap_port);
        debug_assert_ne!(backup, self.bootstrap_port);
        Ok((primary, backup))
    }

    pub fn release(&self, port: u16) {
        let mut inner = self.inner.lock();
        if inner.in_use.remove(&port) {
            inner.available.push(port);
        }
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        port == self.bootstrap_port
    }
}

/// Allocate (and create) an isolated profile directory for `account` under
/// `profile_root`.
pub fn allocate_profile_dir(profile_root: &str, account: &str) -> std::io::Result<PathBuf> {
    let dir = PathBuf::from(profile_root).join(account);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FleetConfig {
        let mut cfg = FleetConfig::default();
        cfg.bootstrap_port = 9000;
        cfg.port_pool_start = 9222;
        cfg.port_pool_size = 4;
        cfg
    }

    #[test]
    fn never_allocates_bootstrap_port() {
        let pool = PortPool::new(&test_config());
        for _ in 0..2 {
            let (a, b) = pool.acquire_pair().unwrap();
            assert_ne!(a, 9000);
            assert_ne!(b, 9000);
        }
    }

    #[test]
    fn ports_are_exclusive_until_released() {
        let pool = PortPool::new(&test_config());
        let (a1, b1) = pool.acquire_pair().unwrap();
        let (a2, b2) = pool.acquire_pair().unwrap();
        let all = [a1, b1, a2, b2];
        let unique: HashSet<u16> = all.iter().copied().collect();
        assert_eq!(unique.len(), 4, "all acquired ports must be distinct");

        assert!(pool.acquire_pair().is_err(), "pool of size 4 should be exhausted");

        pool.release(a1);
        pool.release(b1);
        assert!(pool.acquire_pair().is_ok());
    }

    #[test]
    fn launch_flags_set_remote_debugging_port() {
        let dir = std::path::PathBuf::from("/tmp/profile-x");
        let flags = launch_flags(9222, &dir);
        assert!(flags.iter().any(|f| f == "--remote-debugging-port=9222"));
        assert!(flags.iter().any(|f| f.starts_with("--user-data-dir=")));
    }
}
