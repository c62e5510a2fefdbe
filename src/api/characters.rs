//! Character API endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use super::error::ApiError;
use super::AppState;
use crate::characters::NewCharacter;
use crate::combat::CombatError;

/// Build character router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/characters", post(create))
        .route("/characters/{id}", get(fetch))
}

/// Create a character sheet
async fn create(
    State(state): State<AppState>,
    req: Result<Json<NewCharacter>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new) = req?;
    let sheet = state.engine.characters().create(new).await?;
    Ok((StatusCode::CREATED, Json(sheet)))
}

/// Fetch a character sheet
async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sheet = state
        .engine
        .characters()
        .get(&id)
        .await?
        .ok_or_else(|| CombatError::NotFound(format!("character '{}'", id)))?;
    Ok(Json(sheet))
}
