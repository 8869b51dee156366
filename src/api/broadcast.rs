//! HTTP broadcast handlers

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::BroadcastResult;
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::websocket::ServerMessage;

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    #[serde(flatten)]
    pub result: BroadcastResult,
    pub timestamp: DateTime<Utc>,
}

impl From<BroadcastResult> for BroadcastResponse {
    fn from(result: BroadcastResult) -> Self {
        Self {
            result,
            timestamp: Utc::now(),
        }
    }
}

fn validate(request: &BroadcastRequest) -> Result<()> {
    if request.payload.is_null() {
        return Err(AppError::Validation("payload must not be null".to_string()));
    }
    Ok(())
}

/// Broadcast a payload to every connection in a room
#[tracing::instrument(name = "http.broadcast_room", skip(state, request), fields(room_id = %room_id))]
pub async fn broadcast_to_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>> {
    validate(&request)?;

    let message = ServerMessage::to_room(room_id.clone(), request.payload);
    let result = state.pool.broadcast_to_room(&room_id, &message).await;

    Ok(Json(result.into()))
}

/// Broadcast a payload to every connection of a user
#[tracing::instrument(name = "http.broadcast_user", skip(state, request), fields(user_id = %user_id))]
pub async fn broadcast_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>> {
    validate(&request)?;

    let message = ServerMessage::direct(request.payload);
    let result = state.pool.broadcast_to_user(user_id, &message).await;

    Ok(Json(result.into()))
}
