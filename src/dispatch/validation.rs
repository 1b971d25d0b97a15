// =============================================================================
// Structural validation and eligibility-set resolution (spec.md §4.5)
// =============================================================================

use std::sync::Arc;

use crate::error::AppError;
use crate::session::Session;
use crate::types::{AccountTarget, OrderIntent};

/// Step 1: structural validation, independent of fleet state.
pub fn validate_structural(intent: &OrderIntent) -> Result<(), AppError> {
    intent.validate().map_err(AppError::Validation)
}

/// Step 2: resolve which sessions this intent actually targets and are
/// eligible to receive it right now. `AccountTarget::One` naming an unknown
/// or ineligible account yields an empty set rather than an error — the
/// caller reports zero-dispatched rather than failing the whole intent.
pub fn eligible_sessions<'a>(intent: &OrderIntent, sessions: &'a [Arc<Session>]) -> Vec<&'a Arc<Session>> {
    match &intent.account {
        AccountTarget::All => sessions.iter().filter(|s| s.is_eligible(intent.state_probe)).collect(),
        AccountTarget::One(account) => sessions
            .iter()
            .filter(|s| &s.account == account && s.is_eligible(intent.state_probe))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, HealthState, LifecyclePhase, OrderKind};

    fn intent(target: AccountTarget) -> OrderIntent {
        OrderIntent {
            account: target,
            action: Action::Buy,
            symbol: "NQ".into(),
            quantity: 1.0,
            order_kind: OrderKind::Market,
            limit_price: None,
            stop_price: None,
            tick_size: Some(0.25),
            bracket: None,
            scale_in: None,
            state_probe: false,
            scale_in_level_index: None,
        }
    }

    fn ready_session(account: &str) -> Arc<Session> {
        let s = Session::new(
            account.into(),
            "/tmp".into(),
            9222,
            9223,
            crate::config::GovernorConfig::default(),
        );
        s.set_phase(LifecyclePhase::Ready);
        s.set_health(HealthState::Healthy);
        Arc::new(s)
    }

    #[test]
    fn all_target_excludes_ineligible_sessions() {
        let ready = ready_session("a");
        let not_ready = Arc::new(Session::new(
            "b".into(),
            "/tmp".into(),
            9224,
            9225,
            crate::config::GovernorConfig::default(),
        ));
        let sessions = vec![ready.clone(), not_ready];
        let picked = eligible_sessions(&intent(AccountTarget::All), &sessions);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].account, "a");
    }

    #[test]
    fn one_target_unknown_account_yields_empty_set() {
        let sessions = vec![ready_session("a")];
        let picked = eligible_sessions(&intent(AccountTarget::One("ghost".into())), &sessions);
        assert!(picked.is_empty());
    }
}
