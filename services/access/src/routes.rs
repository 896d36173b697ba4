//! Internal HTTP API of the access service
//!
//! Called by the rest of the blog backend: login/logout/refresh endpoints
//! manage sessions here, moderation endpoints manage bans, and every guarded
//! request is decided through `/v1/access/check`.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use std::net::IpAddr;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    AppState,
    access::{AccessRequest, Verdict},
    error::{AccessError, AccessResult},
    middleware::require_service_token,
    models::{Ban, Session},
    session::{IssuedSession, RotatedSession},
};

/// Request to open a session for an already authenticated user
#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub user_id: Uuid,
    pub device_id: String,
    pub ip: IpAddr,
}

/// Request for refresh secret rotation
#[derive(Debug, Deserialize)]
pub struct RotateRequest {
    pub refresh_secret: String,
}

/// Moderation request
#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub reason: String,
}

/// Create the router for the access service
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/access/check", post(check))
        .route("/v1/sessions", post(open_session))
        .route("/v1/sessions/:id", axum::routing::delete(revoke_session))
        .route("/v1/sessions/:id/rotate", post(rotate_session))
        .route(
            "/v1/users/:id/sessions",
            get(list_sessions).delete(revoke_user_sessions),
        )
        .route(
            "/v1/users/:id/ban",
            put(ban_user).get(get_ban).delete(clear_ban),
        )
        .route("/v1/bans", get(list_bans))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_service_token,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.sessions().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "service": "access-service"
            })),
        ),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "degraded",
                    "service": "access-service"
                })),
            )
        }
    }
}

/// Decide one inbound request; always answers 200 with the verdict
pub async fn check(
    State(state): State<AppState>,
    Json(request): Json<AccessRequest>,
) -> Json<Verdict> {
    Json(state.controller.check(&request).await)
}

/// Login / registration: open a session on a device
pub async fn open_session(
    State(state): State<AppState>,
    Json(payload): Json<OpenSessionRequest>,
) -> AccessResult<(StatusCode, Json<IssuedSession>)> {
    let issued = state
        .controller
        .open_session(payload.user_id, &payload.device_id, payload.ip)
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// Refresh: trade the current secret for a new one
pub async fn rotate_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<RotateRequest>,
) -> AccessResult<Json<RotatedSession>> {
    let rotated = state
        .controller
        .refresh(session_id, &payload.refresh_secret)
        .await?;
    Ok(Json(rotated))
}

/// Logout of one device
pub async fn revoke_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AccessResult<StatusCode> {
    state.controller.sessions().revoke(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AccessResult<Json<Vec<Session>>> {
    let sessions = state.controller.sessions().list_active(user_id).await?;
    Ok(Json(sessions))
}

/// Logout of every device
pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AccessResult<Json<serde_json::Value>> {
    let revoked = state
        .controller
        .sessions()
        .revoke_all_for_user(user_id)
        .await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

pub async fn ban_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<BanRequest>,
) -> AccessResult<Json<Ban>> {
    info!("Moderation: banning user {}", user_id);
    let ban = state.controller.ban_user(user_id, &payload.reason).await?;
    Ok(Json(ban))
}

pub async fn clear_ban(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AccessResult<Json<Ban>> {
    info!("Moderation: clearing ban of user {}", user_id);
    let ban = state.controller.bans().clear_ban(user_id).await?;
    ban.map(Json).ok_or(AccessError::NotFound)
}

/// Ban record, kept after the ban is lifted
pub async fn get_ban(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AccessResult<Json<Ban>> {
    let ban = state.controller.bans().record(user_id).await?;
    ban.map(Json).ok_or(AccessError::NotFound)
}

pub async fn list_bans(State(state): State<AppState>) -> AccessResult<Json<Vec<Ban>>> {
    let bans = state.controller.bans().list_banned().await?;
    Ok(Json(bans))
}
