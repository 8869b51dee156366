//! Connection statistics and cumulative counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::broadcast::DispatcherStatsSnapshot;
use crate::ratelimit::RateLimiterStats;

use super::registry::ConnectionRegistry;

/// Running totals maintained by the registry and the dispatcher.
/// Never recomputed from history.
#[derive(Debug, Default)]
pub struct PoolCounters {
    connections_made: AtomicU64,
    messages: AtomicU64,
    bytes_transferred: AtomicU64,
    rejected: AtomicU64,
}

impl PoolCounters {
    pub fn record_connection(&self) {
        self.connections_made.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// One activity update carrying `bytes` in either direction
    pub fn record_message(&self, bytes: u64) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Successful outbound deliveries from a broadcast
    pub fn record_deliveries(&self, count: u64) {
        self.messages.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_connections_made: self.connections_made.load(Ordering::Relaxed),
            total_messages: self.messages.load(Ordering::Relaxed),
            total_bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            rejected_connections: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CounterSnapshot {
    pub total_connections_made: u64,
    pub total_messages: u64,
    pub total_bytes_transferred: u64,
    pub rejected_connections: u64,
}

/// Point-in-time view of the registry contents
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegistrySnapshot {
    pub total_connections: usize,
    pub authenticated_connections: usize,
    pub active_last_1m: usize,
    pub active_last_5m: usize,
    pub active_last_15m: usize,
    pub unique_users: usize,
    pub unique_rooms: usize,
}

/// Full statistics report for the pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatistics {
    pub total_connections: usize,
    pub authenticated_connections: usize,
    pub active_last_1m: usize,
    pub active_last_5m: usize,
    pub active_last_15m: usize,
    pub unique_users: usize,
    pub unique_rooms: usize,
    pub max_connections: usize,
    pub total_connections_made: u64,
    pub total_messages: u64,
    pub total_bytes_transferred: u64,
    pub rejected_connections: u64,
    pub average_messages_per_connection: f64,
    pub uptime_seconds: u64,
    pub rate_limiter: RateLimiterStats,
    pub broadcast: DispatcherStatsSnapshot,
}

/// Derives [`PoolStatistics`] from the registry and running counters
pub struct StatsAggregator {
    registry: Arc<ConnectionRegistry>,
    started_at: DateTime<Utc>,
}

impl StatsAggregator {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            started_at: Utc::now(),
        }
    }

    pub fn collect(&self, broadcast: DispatcherStatsSnapshot) -> PoolStatistics {
        let now = Utc::now();
        let snapshot = self.registry.snapshot(now);
        let counters = self.registry.counters().snapshot();

        PoolStatistics {
            total_connections: snapshot.total_connections,
            authenticated_connections: snapshot.authenticated_connections,
            active_last_1m: snapshot.active_last_1m,
            active_last_5m: snapshot.active_last_5m,
            active_last_15m: snapshot.active_last_15m,
            unique_users: snapshot.unique_users,
            unique_rooms: snapshot.unique_rooms,
            max_connections: self.registry.max_connections(),
            total_connections_made: counters.total_connections_made,
            total_messages: counters.total_messages,
            total_bytes_transferred: counters.total_bytes_transferred,
            rejected_connections: counters.rejected_connections,
            average_messages_per_connection: average(
                counters.total_messages,
                counters.total_connections_made,
            ),
            uptime_seconds: now
                .signed_duration_since(self.started_at)
                .num_seconds()
                .max(0) as u64,
            rate_limiter: self.registry.rate_limiter().stats(),
            broadcast,
        }
    }
}

fn average(messages: u64, connections: u64) -> f64 {
    messages as f64 / connections.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::connection_manager::NewConnection;
    use crate::ratelimit::RateLimiter;

    #[test]
    fn test_average_without_connections() {
        assert_eq!(average(0, 0), 0.0);
        assert_eq!(average(10, 0), 10.0);
        assert_eq!(average(10, 4), 2.5);
    }

    #[test]
    fn test_counters_survive_removal() {
        let registry = Arc::new(ConnectionRegistry::new(
            PoolConfig::default(),
            Arc::new(RateLimiter::default()),
        ));
        let aggregator = StatsAggregator::new(registry.clone());

        registry.add(NewConnection::new("c1", "10.0.0.1").user(1).room("r"));
        registry.add(NewConnection::new("c2", "10.0.0.2"));
        registry.update_activity("c1", 100, 50);
        registry.update_activity("c1", 0, 10);
        registry.update_activity("c2", 0, 0);
        registry.remove("c1");

        let stats = aggregator.collect(DispatcherStatsSnapshot::default());
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.authenticated_connections, 0);
        assert_eq!(stats.unique_users, 0);
        assert_eq!(stats.unique_rooms, 0);
        assert_eq!(stats.total_connections_made, 2);
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.total_bytes_transferred, 160);
        assert_eq!(stats.average_messages_per_connection, 1.5);
        assert_eq!(stats.max_connections, 1000);
        assert_eq!(stats.active_last_1m, 1);
    }
}
