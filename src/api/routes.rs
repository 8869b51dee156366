use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::broadcast::{broadcast_to_room, broadcast_to_user};
use super::connection::{
    cleanup_connections, get_connection, remove_connection, room_connections, user_connections,
};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health, stats & metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Connections
                .route("/connections/cleanup", post(cleanup_connections))
                .route(
                    "/connections/{channel_id}",
                    get(get_connection).delete(remove_connection),
                )
                .route("/users/{user_id}/connections", get(user_connections))
                .route("/rooms/{room_id}/connections", get(room_connections))
                // Broadcast
                .route("/users/{user_id}/broadcast", post(broadcast_to_user))
                .route("/rooms/{room_id}/broadcast", post(broadcast_to_room)),
        )
}
