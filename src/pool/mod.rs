//! Connection pool facade.
//!
//! [`ConnectionPool`] wires the rate limiter, registry, reaper and dispatcher
//! together and is the only type the transport layer and admin surface need.
//! It is constructed explicitly by the process and shared through `Arc`.

use std::sync::Arc;

use crate::broadcast::{BroadcastDispatcher, BroadcastResult};
use crate::config::Settings;
use crate::connection_manager::{
    ConnectionRecord, ConnectionRegistry, NewConnection, PoolStatistics, StatsAggregator,
};
use crate::ratelimit::RateLimiter;
use crate::tasks::StaleConnectionReaper;
use crate::transport::Transport;
use crate::websocket::ServerMessage;

pub struct ConnectionPool {
    rate_limiter: Arc<RateLimiter>,
    registry: Arc<ConnectionRegistry>,
    reaper: StaleConnectionReaper,
    dispatcher: BroadcastDispatcher,
    aggregator: StatsAggregator,
}

impl ConnectionPool {
    /// Build a pool. Nothing is spawned until [`start_cleanup_task`](Self::start_cleanup_task).
    pub fn new(settings: &Settings, transport: Arc<dyn Transport>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit));
        let registry = Arc::new(
            ConnectionRegistry::new(settings.pool, rate_limiter.clone())
                .with_transport(transport.clone()),
        );
        let reaper = StaleConnectionReaper::new(registry.clone(), settings.reaper);
        let dispatcher = BroadcastDispatcher::new(registry.clone(), transport);
        let aggregator = StatsAggregator::new(registry.clone());

        Self {
            rate_limiter,
            registry,
            reaper,
            dispatcher,
            aggregator,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Admit a connection; false when at capacity or the IP is rate limited
    pub fn add_connection(&self, conn: NewConnection) -> bool {
        self.registry.add(conn)
    }

    pub fn remove_connection(&self, channel_id: &str) -> bool {
        self.registry.remove(channel_id)
    }

    /// Final teardown for a channel whose socket is gone.
    ///
    /// Removes it if still registered and drops any message window left behind
    /// by frames that arrived after an earlier removal.
    pub fn release_connection(&self, channel_id: &str) -> bool {
        let removed = self.registry.remove(channel_id);
        self.rate_limiter.forget_channel(channel_id);
        removed
    }

    pub fn update_activity(&self, channel_id: &str, bytes_sent: u64, bytes_received: u64) -> bool {
        self.registry
            .update_activity(channel_id, bytes_sent, bytes_received)
    }

    /// Record a message on `channel_id` and report whether it exceeded the limit
    pub fn is_rate_limited(&self, channel_id: &str) -> bool {
        !self.rate_limiter.allow_message(channel_id)
    }

    pub fn get_user_connections(&self, user_id: i64) -> Vec<String> {
        self.registry.connections_for_user(user_id)
    }

    pub fn get_room_connections(&self, room_id: &str) -> Vec<String> {
        self.registry.connections_for_room(room_id)
    }

    pub fn get_connection_info(&self, channel_id: &str) -> Option<ConnectionRecord> {
        self.registry.get(channel_id)
    }

    pub fn get_statistics(&self) -> PoolStatistics {
        self.aggregator.collect(self.dispatcher.stats())
    }

    /// Run one sweep now; returns the number of evicted connections
    pub fn cleanup_stale_connections(&self, max_idle_seconds: u64) -> usize {
        self.reaper.sweep(max_idle_seconds)
    }

    pub async fn broadcast_to_room(&self, room_id: &str, message: &ServerMessage) -> BroadcastResult {
        self.dispatcher.broadcast_to_room(room_id, message).await
    }

    pub async fn broadcast_to_user(&self, user_id: i64, message: &ServerMessage) -> BroadcastResult {
        self.dispatcher.broadcast_to_user(user_id, message).await
    }

    /// Start the periodic reaper; false if it is already running
    pub fn start_cleanup_task(&self) -> bool {
        self.reaper.start()
    }

    /// Stop the periodic reaper and wait for it to exit
    pub async fn stop_cleanup_task(&self) -> bool {
        self.reaper.stop().await
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.reaper.is_running()
    }

    pub fn default_max_idle_seconds(&self) -> u64 {
        self.reaper.config().max_idle_seconds
    }
}
