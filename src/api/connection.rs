//! Connection lookup and management endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::connection_manager::ConnectionRecord;
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectionListResponse {
    pub channels: Vec<String>,
    pub count: usize,
}

impl From<Vec<String>> for ConnectionListResponse {
    fn from(channels: Vec<String>) -> Self {
        Self {
            count: channels.len(),
            channels,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    pub max_idle_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
    pub max_idle_seconds: u64,
}

/// GET /api/v1/connections/{channel_id}
pub async fn get_connection(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<Json<ConnectionRecord>> {
    state
        .pool
        .get_connection_info(&channel_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Connection '{}' not found", channel_id)))
}

/// DELETE /api/v1/connections/{channel_id}
pub async fn remove_connection(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<StatusCode> {
    if state.pool.remove_connection(&channel_id) {
        // Ends the socket's outbound stream as well
        state.transport.close(&channel_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Connection '{}' not found", channel_id)))
    }
}

/// GET /api/v1/users/{user_id}/connections
pub async fn user_connections(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Json<ConnectionListResponse> {
    Json(state.pool.get_user_connections(user_id).into())
}

/// GET /api/v1/rooms/{room_id}/connections
pub async fn room_connections(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<ConnectionListResponse> {
    Json(state.pool.get_room_connections(&room_id).into())
}

/// POST /api/v1/connections/cleanup
pub async fn cleanup_connections(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> Json<CleanupResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let max_idle_seconds = request
        .max_idle_seconds
        .unwrap_or_else(|| state.pool.default_max_idle_seconds());

    let removed = state.pool.cleanup_stale_connections(max_idle_seconds);
    tracing::info!(removed = removed, max_idle_seconds = max_idle_seconds, "Manual cleanup requested");

    Json(CleanupResponse {
        removed,
        max_idle_seconds,
    })
}
