//! Combat API endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;
use crate::combat::{CombatError, EnemySpec, NarratorInstruction, PlayerAction};
use crate::engine::Submission;

/// Set on responses served from the action ledger's cache
pub const REPLAYED_HEADER: HeaderName = HeaderName::from_static("x-action-replayed");

/// Optional caller identity recorded on action records
pub const REQUESTER_HEADER: &str = "x-requester-id";

/// Build combat router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/actions/token", post(issue_token))
        .route("/combat/{character_id}", get(status))
        .route("/combat/{character_id}/start", post(start))
        .route("/combat/{character_id}/action", post(action))
        .route("/combat/{character_id}/end", post(end))
}

/// Start request; exactly one of `enemies` or `instruction`
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub action_token: Option<String>,
    #[serde(default)]
    pub enemies: Option<Vec<EnemySpec>>,
    /// Raw narrator instruction, e.g. `{"type": "combat_start", ...}`
    #[serde(default)]
    pub instruction: Option<Value>,
}

/// Action request: the token plus a tagged [`PlayerAction`]
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action_token: Option<String>,
    #[serde(flatten)]
    pub action: PlayerAction,
}

#[derive(Debug, Deserialize)]
pub struct EndRequest {
    #[serde(default)]
    pub action_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub action_token: String,
}

fn require_token(token: Option<String>) -> Result<String, ApiError> {
    match token {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(CombatError::invalid_request("action_token is required").into()),
    }
}

fn requester(headers: &HeaderMap, character_id: &str) -> String {
    headers
        .get(REQUESTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(character_id)
        .to_string()
}

/// Same body for the first call and every replay; replays are flagged
fn submission_response<T: Serialize>(submission: Submission<T>) -> Result<Response, ApiError> {
    let replayed = submission.is_replayed();
    let body = submission.into_json()?;
    let mut response = (StatusCode::OK, Json(body)).into_response();
    if replayed {
        response
            .headers_mut()
            .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}

/// Issue a fresh action token
async fn issue_token(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(TokenResponse {
            action_token: state.engine.issue_token(),
        }),
    )
}

/// Start combat for a character
async fn start(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
    headers: HeaderMap,
    req: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = req?;
    let token = require_token(req.action_token)?;

    let roster = match (req.enemies, req.instruction) {
        (Some(enemies), None) => enemies,
        (None, Some(instruction)) => NarratorInstruction::from_value(instruction)?.into_roster(),
        _ => {
            return Err(CombatError::invalid_request(
                "provide exactly one of 'enemies' or 'instruction'",
            )
            .into())
        }
    };

    let submission = state
        .engine
        .start_combat(&character_id, &requester(&headers, &character_id), &token, &roster)
        .await?;
    submission_response(submission)
}

/// Submit a player action
async fn action(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
    headers: HeaderMap,
    req: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = req?;
    let token = require_token(req.action_token)?;

    let submission = state
        .engine
        .submit_action(
            &character_id,
            &requester(&headers, &character_id),
            &token,
            &req.action,
        )
        .await?;
    submission_response(submission)
}

/// Current combat state, or `{"in_combat": false}`
async fn status(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
) -> Result<Response, ApiError> {
    let response = match state.engine.get_status(&character_id).await? {
        Some(session) => Json(serde_json::to_value(session).map_err(CombatError::from)?),
        None => Json(json!({ "in_combat": false })),
    };
    Ok(response.into_response())
}

/// Close combat and write the outcome back to the character
async fn end(
    State(state): State<AppState>,
    Path(character_id): Path<String>,
    headers: HeaderMap,
    req: Result<Json<EndRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = req?;
    let token = require_token(req.action_token)?;

    let submission = state
        .engine
        .end_combat(&character_id, &requester(&headers, &character_id), &token)
        .await?;
    submission_response(submission)
}
