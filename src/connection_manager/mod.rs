//! Connection management for real-time connections
//!
//! This module provides:
//! - Connection records keyed by transport channel id
//! - User and room indexing
//! - Admission control (capacity and per-IP rate)
//! - Connection statistics

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::{CounterSnapshot, PoolCounters, PoolStatistics, RegistrySnapshot, StatsAggregator};
pub use types::{ConnectionRecord, NewConnection, RejectReason, RemovalReason};
