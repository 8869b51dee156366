// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Pool core
pub mod broadcast;
pub mod connection_manager;
pub mod pool;
pub mod ratelimit;
pub mod tasks;
pub mod transport;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

pub use pool::ConnectionPool;
