use thiserror::Error;

use crate::capture::state::SessionPhase;

/// Errors surfaced by the capture engine to its caller.
///
/// Quota exhaustion is its own variant so callers can route it to an upgrade
/// prompt instead of a generic failure message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("user {user_id} already has an active or paused session")]
    SessionAlreadyActive { user_id: String },

    #[error("cannot {action} a session that is {from}")]
    InvalidTransition {
        action: &'static str,
        from: SessionPhase,
    },

    #[error("no identification credits remaining")]
    QuotaExhausted,

    #[error("passive listening shows detections live only; they cannot be saved")]
    PassiveListening,

    #[error("identification failed: {0}")]
    IdentificationFailed(String),

    #[error("persistence failed: {0:#}")]
    PersistenceFailed(anyhow::Error),

    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("invalid capture config: {0}")]
    InvalidConfig(String),

    #[error("live detection {0} not found in session buffer")]
    UnknownDetection(String),
}

impl EngineError {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, EngineError::QuotaExhausted)
    }

    pub(crate) fn transition(action: &'static str, from: SessionPhase) -> Self {
        EngineError::InvalidTransition { action, from }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
