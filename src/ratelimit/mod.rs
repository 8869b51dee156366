//! Sliding-window rate limiting for connection admission and message traffic.
//!
//! Two independent keyspaces are tracked:
//! - new connections per IP address
//! - inbound messages per channel

mod config;
mod limiter;
mod window;

pub use config::RateLimitConfig;
pub use limiter::{RateLimiter, RateLimiterStats};
pub use window::RateWindow;
