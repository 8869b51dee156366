//! API layer - HTTP endpoint handlers organized by domain.

mod broadcast;
mod connection;
mod health;
mod metrics;
mod routes;

pub use broadcast::{broadcast_to_room, broadcast_to_user, BroadcastRequest, BroadcastResponse};
pub use connection::{
    cleanup_connections, get_connection, remove_connection, room_connections, user_connections,
    CleanupRequest, CleanupResponse, ConnectionListResponse,
};
pub use health::{health, stats, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
