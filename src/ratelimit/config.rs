//! Rate limiting configuration

use serde::Deserialize;

/// Configuration for connection and message rate limiting.
///
/// Windows are bounded by capacity, not by time: the oldest timestamp is only
/// dropped once a window holds more than its capacity.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    /// Timestamps retained per IP address
    #[serde(default = "default_connection_window_capacity")]
    pub connection_window_capacity: usize,
    /// New connections allowed per IP within the trailing window
    #[serde(default = "default_max_connections_per_window")]
    pub max_connections_per_window: usize,
    /// Timestamps retained per channel
    #[serde(default = "default_message_window_capacity")]
    pub message_window_capacity: usize,
    /// Messages allowed per channel within the trailing window
    #[serde(default = "default_max_messages_per_window")]
    pub max_messages_per_window: usize,
    /// Length of the trailing window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_connection_window_capacity() -> usize {
    10
}

fn default_max_connections_per_window() -> usize {
    5 // 5 connections per minute per IP
}

fn default_message_window_capacity() -> usize {
    100
}

fn default_max_messages_per_window() -> usize {
    60 // 60 messages per minute per connection
}

fn default_window_seconds() -> u64 {
    60
}

impl RateLimitConfig {
    pub fn window_millis(&self) -> i64 {
        (self.window_seconds * 1000) as i64
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            connection_window_capacity: default_connection_window_capacity(),
            max_connections_per_window: default_max_connections_per_window(),
            message_window_capacity: default_message_window_capacity(),
            max_messages_per_window: default_max_messages_per_window(),
            window_seconds: default_window_seconds(),
        }
    }
}
