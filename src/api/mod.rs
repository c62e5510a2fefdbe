//! HTTP API module - REST endpoints

mod characters;
mod combat;
mod error;

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::Database;
use crate::engine::CombatEngine;
pub use combat::{REPLAYED_HEADER, REQUESTER_HEADER};
pub use error::{ApiError, ErrorResponse};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub engine: Arc<CombatEngine>,
}

/// Build the API router
pub fn router(db: Arc<Database>, engine: Arc<CombatEngine>) -> Router {
    let state = AppState { db, engine };

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .merge(combat::router())
        .merge(characters::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Root endpoint
async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "combatd",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

/// Health check endpoint; 503 when the database is unreachable
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = state.db.health_check().await.is_ok();
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if database_ok { "healthy" } else { "unhealthy" },
            database: if database_ok { "ok" } else { "error" },
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    version: &'static str,
}
