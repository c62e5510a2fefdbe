//! JSON error responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::combat::CombatError;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_targets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
    pub retryable: bool,
}

/// Handler error; wraps the engine's error taxonomy
#[derive(Debug)]
pub struct ApiError(pub CombatError);

impl From<CombatError> for ApiError {
    fn from(err: CombatError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(CombatError::invalid_request(rejection.body_text()))
    }
}

pub fn status_for(err: &CombatError) -> StatusCode {
    match err {
        CombatError::InvalidExpression(_)
        | CombatError::InvalidCombatState(_)
        | CombatError::InvalidTarget { .. }
        | CombatError::ActionEconomyExhausted(_)
        | CombatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CombatError::NotFound(_) => StatusCode::NOT_FOUND,
        CombatError::ActionInProgress(_) => StatusCode::CONFLICT,
        CombatError::UnexpectedActionPayload { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CombatError::Storage(_) | CombatError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }

        let mut body = ErrorResponse {
            error: err.to_string(),
            code: err.code(),
            valid_targets: None,
            expected: None,
            received: None,
            retryable: err.is_retryable(),
        };
        match err {
            CombatError::InvalidTarget { valid_targets, .. } => {
                body.valid_targets = Some(valid_targets);
            }
            CombatError::UnexpectedActionPayload { expected, received } => {
                body.expected = Some(expected);
                body.received = Some(received);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
