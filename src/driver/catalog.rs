// =============================================================================
// Instrument catalog — frozen symbol -> tick size table
// =============================================================================
//
// Tick size is needed to convert TP/SL offsets expressed in ticks into
// absolute prices before they're written into the order ticket. Loaded once
// at startup and never mutated afterward (spec.md §9 "init-time-immutable").
// =============================================================================

use std::collections::HashMap;

use once_cell::sync::Lazy;

static DEFAULT_CATALOG: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("ES", 0.25),
        ("NQ", 0.25),
        ("YM", 1.0),
        ("RTY", 0.1),
        ("CL", 0.01),
        ("GC", 0.1),
    ])
});

/// Tick size for `symbol`, falling back to the intent's own `tick_size` when
/// the symbol isn't in the built-in catalog (spec.md §9 Open Question:
/// unknown symbols are not rejected, just unassisted by the catalog).
pub fn tick_size_for(symbol: &str) -> Option<f64> {
    DEFAULT_CATALOG.get(symbol).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbol_resolves() {
        assert_eq!(tick_size_for("ES"), Some(0.25));
    }

    #[test]
    fn unknown_symbol_is_none() {
        assert_eq!(tick_size_for("ZZZZ"), None);
    }
}
