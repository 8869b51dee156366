//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCASTS_TOTAL, BROADCAST_DELIVERED_TOTAL, BROADCAST_FAILED_TOTAL, CONNECTIONS_ACTIVE,
    CONNECTIONS_ADMITTED_TOTAL, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_REMOVED_TOTAL,
    RATELIMIT_ALLOWED_TOTAL, RATELIMIT_DENIED_TOTAL, REAPER_EVICTED_TOTAL, REAPER_SWEEP_DURATION,
    WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording registry metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_admitted(active: usize) {
        CONNECTIONS_ADMITTED_TOTAL.inc();
        CONNECTIONS_ACTIVE.set(active as i64);
    }

    pub fn record_rejected(reason: &str) {
        CONNECTIONS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_removed(reason: &str, active: usize) {
        CONNECTIONS_REMOVED_TOTAL.with_label_values(&[reason]).inc();
        CONNECTIONS_ACTIVE.set(active as i64);
    }
}

/// Helper struct for recording rate limit metrics
pub struct RateLimitMetrics;

impl RateLimitMetrics {
    pub fn record_connection_allowed() {
        RATELIMIT_ALLOWED_TOTAL.with_label_values(&["connection"]).inc();
    }

    pub fn record_connection_denied() {
        RATELIMIT_DENIED_TOTAL.with_label_values(&["connection"]).inc();
    }

    pub fn record_message_allowed() {
        RATELIMIT_ALLOWED_TOTAL.with_label_values(&["message"]).inc();
    }

    pub fn record_message_denied() {
        RATELIMIT_DENIED_TOTAL.with_label_values(&["message"]).inc();
    }
}

/// Helper struct for recording broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    /// Record a broadcast to a room or user
    pub fn record_sent(target: &str) {
        BROADCASTS_TOTAL.with_label_values(&[target]).inc();
    }

    pub fn record_delivered(count: u64) {
        BROADCAST_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        BROADCAST_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for recording reaper metrics
pub struct ReaperMetrics;

impl ReaperMetrics {
    pub fn record_sweep(duration: Duration, evicted: u64) {
        REAPER_SWEEP_DURATION.observe(duration.as_secs_f64());
        REAPER_EVICTED_TOTAL.inc_by(evicted);
    }
}

/// Helper struct for recording inbound WebSocket message metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record(message_type: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[message_type]).inc();
    }
}
