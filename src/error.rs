// =============================================================================
// Error types — typed errors for component internals, anyhow at task edges
// =============================================================================

use thiserror::Error;

use crate::types::{DriverErrorKind, FailureClass};

/// Errors surfaced by the in-page Driver bridge (spec.md §4.2, §7).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("pre-submit validation failed: {0}")]
    ValidationFailed(String),

    #[error("element missing: {0}")]
    ElementMissing(String),

    #[error("write-verify mismatch on {field} after {attempts} attempts: wrote {expected:?}, read {actual:?}")]
    WriteVerifyMismatch {
        field: String,
        attempts: u32,
        expected: String,
        actual: String,
    },

    #[error("submit-click observed, no acknowledgement within budget")]
    Orphaned,

    #[error("known rejection: {kind}: {reason}")]
    Rejection {
        kind: DriverErrorKind,
        reason: String,
    },

    #[error("operation exceeded per-operation budget ({elapsed_ms}ms > {budget_ms}ms)")]
    BudgetExceeded { elapsed_ms: u64, budget_ms: u64 },

    #[error("driver entry point missing post-injection: {0}")]
    DriverMissing(String),

    #[error("bridge call failed: {0}")]
    Bridge(String),
}

impl DriverError {
    pub fn kind(&self) -> DriverErrorKind {
        match self {
            Self::ValidationFailed(_) | Self::ElementMissing(_) => DriverErrorKind::DomElementMissing,
            Self::WriteVerifyMismatch { .. } => DriverErrorKind::ValidationTimeout,
            Self::Orphaned => DriverErrorKind::Unknown,
            Self::Rejection { kind, .. } => *kind,
            Self::BudgetExceeded { .. } => DriverErrorKind::ValidationTimeout,
            Self::DriverMissing(_) => DriverErrorKind::DomElementMissing,
            Self::Bridge(_) => DriverErrorKind::ConnectionTimeout,
        }
    }
}

/// Errors raised by the Connection Health Monitor's probe ladder (spec.md §4.4).
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("probe layer {layer} failed: {detail}")]
    ProbeFailed { layer: &'static str, detail: String },

    #[error("channel failure classified as {0}")]
    Classified(FailureClass),

    #[error("recovery ladder exhausted for channel")]
    RecoveryExhausted,
}

/// Errors raised by the Session Fleet Supervisor (spec.md §4.3, §7).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no free debug port available in the configured pool")]
    PortPoolExhausted,

    #[error("browser process failed to launch: {0}")]
    LaunchFailed(String),

    #[error("timed out waiting for phase {phase} (budget {budget_ms}ms)")]
    PhaseTimeout { phase: String, budget_ms: u64 },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("restart budget exhausted after {attempts} attempts")]
    RestartBudgetExhausted { attempts: u32 },
}

/// Top-level application error used at task/HTTP boundaries.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("structural validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
