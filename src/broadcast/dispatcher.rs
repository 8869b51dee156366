use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::connection_manager::{ConnectionRegistry, RemovalReason};
use crate::metrics::BroadcastMetrics;
use crate::transport::Transport;
use crate::websocket::ServerMessage;

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastResult {
    /// Channels found in the index snapshot
    pub targeted: usize,
    /// Channels the transport accepted the message for
    pub delivered: usize,
    /// Channels whose send failed
    pub failed: usize,
    /// Failed channels that were still registered and got removed
    pub pruned: usize,
}

/// Statistics for the broadcast dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub room_broadcasts: AtomicU64,
    pub user_broadcasts: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_failed: AtomicU64,
    pub total_pruned: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            room_broadcasts: self.room_broadcasts.load(Ordering::Relaxed),
            user_broadcasts: self.user_broadcasts.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_pruned: self.total_pruned.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub room_broadcasts: u64,
    pub user_broadcasts: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_pruned: u64,
}

/// Fans messages out to rooms and users.
///
/// A failed send is taken as proof the peer is gone: the channel is removed
/// from the registry right away, with no retry.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn Transport>,
    stats: DispatcherStats,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Send to every connection currently in a room
    #[tracing::instrument(name = "broadcast.room", skip(self, message))]
    pub async fn broadcast_to_room(&self, room_id: &str, message: &ServerMessage) -> BroadcastResult {
        let channels = self.registry.connections_for_room(room_id);
        let result = self.fan_out(channels, message).await;

        self.stats.room_broadcasts.fetch_add(1, Ordering::Relaxed);
        BroadcastMetrics::record_sent("room");

        tracing::debug!(
            room_id = %room_id,
            targeted = result.targeted,
            delivered = result.delivered,
            failed = result.failed,
            "Broadcast to room completed"
        );

        result
    }

    /// Send to every connection owned by a user
    #[tracing::instrument(name = "broadcast.user", skip(self, message))]
    pub async fn broadcast_to_user(&self, user_id: i64, message: &ServerMessage) -> BroadcastResult {
        let channels = self.registry.connections_for_user(user_id);
        let result = self.fan_out(channels, message).await;

        self.stats.user_broadcasts.fetch_add(1, Ordering::Relaxed);
        BroadcastMetrics::record_sent("user");

        tracing::debug!(
            user_id = user_id,
            targeted = result.targeted,
            delivered = result.delivered,
            failed = result.failed,
            "Broadcast to user completed"
        );

        result
    }

    /// Send to a snapshot of channel ids; the registry lock is not held here
    async fn fan_out(&self, channels: Vec<String>, message: &ServerMessage) -> BroadcastResult {
        let mut result = BroadcastResult {
            targeted: channels.len(),
            ..Default::default()
        };
        if channels.is_empty() {
            return result;
        }

        let transport = &self.transport;
        let mut sends = stream::iter(channels)
            .map(|channel_id| async move {
                let outcome = transport.send(&channel_id, message).await;
                (channel_id, outcome)
            })
            .buffer_unordered(MAX_CONCURRENT_SENDS);

        while let Some((channel_id, outcome)) = sends.next().await {
            match outcome {
                Ok(()) => result.delivered += 1,
                Err(e) => {
                    result.failed += 1;
                    tracing::warn!(
                        channel_id = %channel_id,
                        error = %e,
                        "Send failed, pruning channel"
                    );
                    if self
                        .registry
                        .remove_with_reason(&channel_id, RemovalReason::SendFailure)
                    {
                        result.pruned += 1;
                    }
                }
            }
        }

        self.registry
            .counters()
            .record_deliveries(result.delivered as u64);
        self.stats
            .total_delivered
            .fetch_add(result.delivered as u64, Ordering::Relaxed);
        self.stats
            .total_failed
            .fetch_add(result.failed as u64, Ordering::Relaxed);
        self.stats
            .total_pruned
            .fetch_add(result.pruned as u64, Ordering::Relaxed);
        BroadcastMetrics::record_delivered(result.delivered as u64);
        BroadcastMetrics::record_failed(result.failed as u64);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::connection_manager::NewConnection;
    use crate::ratelimit::{RateLimitConfig, RateLimiter};
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashSet;

    /// Records deliveries and fails for a fixed set of channels
    #[derive(Default)]
    struct RecordingTransport {
        failing: HashSet<String>,
        delivered: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        fn failing(ids: &[&str]) -> Self {
            Self {
                failing: ids.iter().map(|s| s.to_string()).collect(),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, channel_id: &str, _message: &ServerMessage) -> Result<(), TransportError> {
            if self.failing.contains(channel_id) {
                return Err(TransportError::Closed(channel_id.to_string()));
            }
            self.delivered.lock().push(channel_id.to_string());
            Ok(())
        }
    }

    fn registry() -> Arc<ConnectionRegistry> {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_connections_per_window: usize::MAX,
            ..Default::default()
        }));
        Arc::new(ConnectionRegistry::new(PoolConfig::default(), rate_limiter))
    }

    #[tokio::test]
    async fn test_room_broadcast_prunes_failures() {
        let registry = registry();
        for id in ["a", "b", "c", "d"] {
            registry.add(NewConnection::new(id, "10.0.0.1").room("lobby"));
        }
        registry.add(NewConnection::new("elsewhere", "10.0.0.1").room("other"));

        let transport = Arc::new(RecordingTransport::failing(&["b", "d"]));
        let dispatcher = BroadcastDispatcher::new(registry.clone(), transport.clone());

        let result = dispatcher
            .broadcast_to_room("lobby", &ServerMessage::to_room("lobby", json!("hi")))
            .await;

        assert_eq!(
            result,
            BroadcastResult {
                targeted: 4,
                delivered: 2,
                failed: 2,
                pruned: 2
            }
        );
        assert_eq!(registry.connections_for_room("lobby"), vec!["a", "c"]);
        assert!(registry.get("b").is_none());
        assert!(registry.get("d").is_none());
        assert!(registry.contains("elsewhere"));

        let mut delivered = transport.delivered.lock().clone();
        delivered.sort();
        assert_eq!(delivered, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_user_broadcast() {
        let registry = registry();
        registry.add(NewConnection::new("phone", "10.0.0.1").user(7));
        registry.add(NewConnection::new("laptop", "10.0.0.2").user(7));
        registry.add(NewConnection::new("other", "10.0.0.3").user(8));

        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = BroadcastDispatcher::new(registry.clone(), transport.clone());

        let result = dispatcher
            .broadcast_to_user(7, &ServerMessage::direct(json!({"k": "v"})))
            .await;

        assert_eq!(result.delivered, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(transport.delivered.lock().len(), 2);

        let stats = dispatcher.stats();
        assert_eq!(stats.user_broadcasts, 1);
        assert_eq!(stats.total_delivered, 2);
        assert_eq!(registry.counters().snapshot().total_messages, 2);
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_room() {
        let registry = registry();
        let dispatcher = BroadcastDispatcher::new(registry, Arc::new(RecordingTransport::default()));

        let result = dispatcher
            .broadcast_to_room("ghost-town", &ServerMessage::Pong)
            .await;

        assert_eq!(result, BroadcastResult::default());
        assert_eq!(dispatcher.stats().room_broadcasts, 1);
    }
}
