use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::GuardrailCheck;

/// Unified error type for the FieldGuard safety core.
#[derive(Error, Debug)]
pub enum FieldGuardError {
    // ── Safety errors ──────────────────────────────────────────
    #[error("guardrail violation on request {request_id}: {}", failed_summary(.checks))]
    PolicyViolation {
        request_id: String,
        checks: Vec<GuardrailCheck>,
    },

    #[error("illegal state transition: {entity} {id} is {from}, cannot {attempted}")]
    IllegalStateTransition {
        entity: &'static str,
        id: String,
        from: String,
        attempted: String,
    },

    #[error("approval request {id} expired at {expires_at}")]
    ExpiredRequest {
        id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("audit chain integrity violation at entry {index}: {reason}")]
    ChainIntegrityViolation { index: usize, reason: String },

    #[error("line stopped: unresolved jidoka event {event_id} covers {scope}")]
    LineStopped { event_id: String, scope: String },

    // ── Lookup / input errors ──────────────────────────────────
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Storage errors ─────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl FieldGuardError {
    /// True for every error that means "this transition is not allowed from the
    /// current state". Expired requests count: they are pending requests whose
    /// window already closed.
    pub fn is_illegal_transition(&self) -> bool {
        matches!(
            self,
            Self::IllegalStateTransition { .. } | Self::ExpiredRequest { .. }
        )
    }

    /// Safety errors are surfaced to the caller as-is and never retried.
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation { .. } | Self::ChainIntegrityViolation { .. } | Self::LineStopped { .. }
        )
    }
}

fn failed_summary(checks: &[GuardrailCheck]) -> String {
    let failed: Vec<&str> = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| c.message.as_str())
        .collect();
    if failed.is_empty() {
        "no failed checks".into()
    } else {
        failed.join("; ")
    }
}

pub type Result<T> = std::result::Result<T, FieldGuardError>;
