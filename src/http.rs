//! HTTP API for room creation and the read-side queries.
//!
//! Runs on its own tokio task next to the WebSocket gateway. Room creation
//! and history need a bearer identity token (same tokens the gateway
//! accepts); the leaderboard and category listings are public.

use crate::auth::{Identity, TokenVerifier};
use crate::db::Storage;
use crate::error::GameError;
use crate::game::manager::SessionManager;
use crate::game::Settings;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uplink_proto::RoomMode;

/// Shared state for all API handlers.
pub struct ApiState {
    pub manager: Arc<SessionManager>,
    pub storage: Arc<dyn Storage>,
    pub verifier: Arc<TokenVerifier>,
}

/// Build the API router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/rooms", post(create_room))
        .route("/api/v1/practice", post(create_practice))
        .route("/api/v1/leaderboard", get(leaderboard))
        .route("/api/v1/history", get(history))
        .route("/api/v1/categories", get(categories))
        .with_state(state)
}

/// Serve the API on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<ApiState>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// API failure modes, mapped onto status codes.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response()
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

impl From<crate::db::DbError> for ApiError {
    fn from(e: crate::db::DbError) -> Self {
        error!(error = %e, "storage failure in API handler");
        ApiError::Internal
    }
}

/// Pull the bearer identity out of the Authorization header.
fn authenticate(verifier: &TokenVerifier, headers: &HeaderMap) -> Result<Identity, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| verifier.verify(token))
        .ok_or(ApiError::Unauthorized)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    rooms: usize,
}

async fn healthz(State(state): State<Arc<ApiState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        rooms: state.manager.room_count(),
    })
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    mode: RoomMode,
    language: String,
    #[serde(rename = "textMode", default = "default_text_mode")]
    text_mode: String,
    category: String,
    max_players: Option<u32>,
}

fn default_text_mode() -> String {
    "standard".into()
}

#[derive(Debug, Serialize)]
struct RoomCreated {
    room_id: String,
}

async fn create_room(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<RoomCreated>, ApiError> {
    let owner = authenticate(&state.verifier, &headers)?;

    let settings = Settings {
        max_players: req.max_players.unwrap_or(2),
        language: req.language,
        text_mode: req.text_mode,
        category: req.category,
    };
    let room_id = state
        .manager
        .create_room(Some(&owner), req.mode, settings)
        .map_err(|e| match e {
            GameError::InvalidSettings(msg) => ApiError::BadRequest(msg),
            other => ApiError::BadRequest(other.to_string()),
        })?;
    Ok(Json(RoomCreated { room_id }))
}

#[derive(Debug, Deserialize)]
struct PracticeRequest {
    language: String,
    #[serde(rename = "textMode", default = "default_text_mode")]
    text_mode: String,
    category: String,
}

/// A practice room is just a solo room created in one call.
async fn create_practice(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<PracticeRequest>,
) -> Result<Json<RoomCreated>, ApiError> {
    let owner = authenticate(&state.verifier, &headers)?;

    let settings = Settings {
        max_players: 1,
        language: req.language,
        text_mode: req.text_mode,
        category: req.category,
    };
    let room_id = state
        .manager
        .create_room(Some(&owner), RoomMode::Solo, settings)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(RoomCreated { room_id }))
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<u32>,
}

async fn leaderboard(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<crate::db::LeaderboardEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(100);
    Ok(Json(state.storage.leaderboard(limit).await?))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    cursor: Option<i64>,
    limit: Option<u32>,
}

async fn history(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<crate::db::HistoryPage>, ApiError> {
    let identity = authenticate(&state.verifier, &headers)?;
    let limit = query.limit.unwrap_or(20).min(100);
    Ok(Json(
        state
            .storage
            .history(&identity.user_id, query.cursor, limit)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct CategoriesQuery {
    language: Option<String>,
}

async fn categories(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<CategoriesQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let language = query.language.as_deref().unwrap_or("en");
    Ok(Json(state.storage.categories(language).await?))
}
