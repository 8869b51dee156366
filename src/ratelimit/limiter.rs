//! Local rate limiter implementation

use dashmap::DashMap;
use serde::Serialize;

use crate::metrics::RateLimitMetrics;

use super::config::RateLimitConfig;
use super::window::RateWindow;

/// Rate limiter that manages one window per key.
///
/// Supports:
/// - IP-based limiting of new connections
/// - Per-channel limiting of inbound messages
pub struct RateLimiter {
    /// IP address -> connection timestamps
    ip_windows: DashMap<String, RateWindow>,
    /// channel_id -> message timestamps
    channel_windows: DashMap<String, RateWindow>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            ip_windows: DashMap::new(),
            channel_windows: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Record a connection attempt from `ip` and decide whether it is admitted.
    ///
    /// The attempt is recorded even when it is denied.
    pub fn allow_new_connection(&self, ip: &str) -> bool {
        self.allow_new_connection_at(ip, RateWindow::now_millis())
    }

    pub(crate) fn allow_new_connection_at(&self, ip: &str, now_millis: i64) -> bool {
        let capacity = self.config.connection_window_capacity;
        let in_window = {
            let mut window = self
                .ip_windows
                .entry(ip.to_string())
                .or_insert_with(|| RateWindow::new(capacity));
            window.record(now_millis);
            window.count_since(now_millis - self.config.window_millis())
        };

        if in_window > self.config.max_connections_per_window {
            RateLimitMetrics::record_connection_denied();
            tracing::warn!(
                ip = %ip,
                in_window = in_window,
                limit = self.config.max_connections_per_window,
                "Connection rate limit exceeded"
            );
            false
        } else {
            RateLimitMetrics::record_connection_allowed();
            true
        }
    }

    /// Record a message on `channel_id` and decide whether it is within the limit.
    pub fn allow_message(&self, channel_id: &str) -> bool {
        self.allow_message_at(channel_id, RateWindow::now_millis())
    }

    pub(crate) fn allow_message_at(&self, channel_id: &str, now_millis: i64) -> bool {
        let capacity = self.config.message_window_capacity;
        let in_window = {
            let mut window = self
                .channel_windows
                .entry(channel_id.to_string())
                .or_insert_with(|| RateWindow::new(capacity));
            window.record(now_millis);
            window.count_since(now_millis - self.config.window_millis())
        };

        if in_window > self.config.max_messages_per_window {
            RateLimitMetrics::record_message_denied();
            tracing::debug!(
                channel_id = %channel_id,
                in_window = in_window,
                limit = self.config.max_messages_per_window,
                "Message rate limit exceeded"
            );
            false
        } else {
            RateLimitMetrics::record_message_allowed();
            true
        }
    }

    /// Drop the message window of a channel that left the pool
    pub fn forget_channel(&self, channel_id: &str) -> bool {
        self.channel_windows.remove(channel_id).is_some()
    }

    /// Get statistics about the rate limiter
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            ip_windows: self.ip_windows.len(),
            channel_windows: self.channel_windows.len(),
            max_connections_per_window: self.config.max_connections_per_window,
            max_messages_per_window: self.config.max_messages_per_window,
            window_seconds: self.config.window_seconds,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Statistics about the rate limiter
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub ip_windows: usize,
    pub channel_windows: usize,
    pub max_connections_per_window: usize,
    pub max_messages_per_window: usize,
    pub window_seconds: u64,
}
