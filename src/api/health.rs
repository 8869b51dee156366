//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::PoolStatistics;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connections: usize,
    pub max_connections: usize,
    pub reaper_running: bool,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.pool.registry();
    let connections = registry.len();
    let max_connections = registry.max_connections();

    // Saturated still answers 200; only admission is refused
    let status = if connections >= max_connections {
        "saturated"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections,
        max_connections,
        reaper_running: state.pool.is_cleanup_running(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<PoolStatistics> {
    Json(state.pool.get_statistics())
}
