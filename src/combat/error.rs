//! Combat error taxonomy

use thiserror::Error;

use super::dice::DiceError;

/// Why a combat request was rejected
#[derive(Debug, Error)]
pub enum CombatError {
    #[error("invalid dice expression: {0}")]
    InvalidExpression(#[from] DiceError),

    #[error("invalid combat state: {0}")]
    InvalidCombatState(String),

    #[error("invalid target '{target_id}'")]
    InvalidTarget {
        target_id: String,
        valid_targets: Vec<String>,
    },

    #[error("no {0} remaining this turn")]
    ActionEconomyExhausted(&'static str),

    #[error("unexpected action payload: expected '{expected}', got '{received}'")]
    UnexpectedActionPayload { expected: String, received: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("action '{0}' is already being processed")]
    ActionInProgress(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CombatError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        CombatError::InvalidCombatState(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        CombatError::InvalidRequest(msg.into())
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CombatError::InvalidExpression(_) => "invalid_expression",
            CombatError::InvalidCombatState(_) => "invalid_combat_state",
            CombatError::InvalidTarget { .. } => "invalid_target",
            CombatError::ActionEconomyExhausted(_) => "action_economy_exhausted",
            CombatError::UnexpectedActionPayload { .. } => "unexpected_action_payload",
            CombatError::InvalidRequest(_) => "invalid_request",
            CombatError::ActionInProgress(_) => "action_in_progress",
            CombatError::NotFound(_) => "not_found",
            CombatError::Storage(_) => "storage_error",
            CombatError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the request may be retried with the same token
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CombatError::ActionInProgress(_)
                | CombatError::Storage(_)
                | CombatError::Serialization(_)
        )
    }
}

pub type CombatResult<T> = Result<T, CombatError>;
