// =============================================================================
// Credential store — key-value identity -> secret, duplicates preserved
// =============================================================================
//
// Read once at startup and frozen (spec.md §9 "init-time-immutable"). A
// `Vec<(String, String)>` rather than a map: the spec explicitly requires
// duplicate identities to survive, in source order, which a map would
// silently collapse.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CredentialStore {
    entries: Vec<(String, String)>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl CredentialStore {
    /// Parse a simple `identity=secret` key-value text file, one pair per
    /// line. Blank lines and lines starting with `#` are skipped. Duplicate
    /// identities are kept, in the order they appear.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read credential store from {}", path.display()))?;

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((identity, secret)) => {
                    entries.push((identity.trim().to_string(), secret.trim().to_string()));
                }
                None => {
                    warn!(
                        path = %path.display(),
                        line = lineno + 1,
                        "skipping malformed credential line (expected identity=secret)"
                    );
                }
            }
        }

        info!(path = %path.display(), count = entries.len(), "credential store loaded");
        Ok(Self { entries })
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// First secret bound to `identity`, if any. Later duplicates are kept
    /// in `entries` for audit but the first entry wins at lookup time.
    pub fn secret_for(&self, identity: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, secret)| secret.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_and_preserves_duplicate_identities() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "trader_a=secret1").unwrap();
        writeln!(file, "trader_b=secret2").unwrap();
        writeln!(file, "trader_a=secret3").unwrap();
        writeln!(file, "").unwrap();
        writeln!(file, "malformed line without equals").unwrap();

        let store = CredentialStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 3);
        let ids: Vec<&str> = store.identities().collect();
        assert_eq!(ids, vec!["trader_a", "trader_b", "trader_a"]);
        assert_eq!(store.secret_for("trader_a"), Some("secret1"));
        assert_eq!(store.secret_for("trader_b"), Some("secret2"));
        assert_eq!(store.secret_for("missing"), None);
    }
}
