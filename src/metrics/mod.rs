//! Prometheus metrics for the connection pool.
//!
//! - Connection metrics (active connections, admissions, rejections, removals)
//! - Rate limiting metrics
//! - Broadcast metrics
//! - Reaper metrics
//! - WebSocket adapter metrics

mod helpers;

pub use helpers::{
    encode_metrics, BroadcastMetrics, ConnectionMetrics, RateLimitMetrics, ReaperMetrics,
    WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "rtpool";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of registered connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of registered connections"
    ).unwrap();

    /// Number of distinct connected users
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of distinct connected users"
    ).unwrap();

    /// Number of rooms with at least one connection
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Number of rooms with at least one connection"
    ).unwrap();

    /// Connections admitted
    pub static ref CONNECTIONS_ADMITTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_admitted_total", METRIC_PREFIX),
        "Total connections admitted"
    ).unwrap();

    /// Connections refused by admission control
    pub static ref CONNECTIONS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Total connections refused by admission control",
        &["reason"]
    ).unwrap();

    /// Connections removed from the registry
    pub static ref CONNECTIONS_REMOVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_removed_total", METRIC_PREFIX),
        "Total connections removed from the registry",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Rate Limiting Metrics
    // ============================================================================

    /// Events allowed by rate limiter
    pub static ref RATELIMIT_ALLOWED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_allowed_total", METRIC_PREFIX),
        "Total events allowed by rate limiter",
        &["type"]
    ).unwrap();

    /// Events denied by rate limiter
    pub static ref RATELIMIT_DENIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_denied_total", METRIC_PREFIX),
        "Total events denied by rate limiter",
        &["type"]
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Broadcasts by target type
    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Total broadcasts",
        &["target"]
    ).unwrap();

    /// Per-channel deliveries
    pub static ref BROADCAST_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_delivered_total", METRIC_PREFIX),
        "Total messages accepted by the transport"
    ).unwrap();

    /// Per-channel send failures
    pub static ref BROADCAST_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_failed_total", METRIC_PREFIX),
        "Total transport send failures"
    ).unwrap();

    // ============================================================================
    // Reaper Metrics
    // ============================================================================

    /// Sweep duration in seconds
    pub static ref REAPER_SWEEP_DURATION: Histogram = register_histogram!(
        format!("{}_reaper_sweep_duration_seconds", METRIC_PREFIX),
        "Stale connection sweep duration in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    /// Connections evicted as stale
    pub static ref REAPER_EVICTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reaper_evicted_total", METRIC_PREFIX),
        "Total connections evicted for inactivity"
    ).unwrap();

    // ============================================================================
    // WebSocket Metrics
    // ============================================================================

    /// WebSocket messages received from clients
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Total WebSocket messages received from clients",
        &["type"]
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();
}
