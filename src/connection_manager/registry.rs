use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::metrics::ConnectionMetrics;
use crate::ratelimit::RateLimiter;
use crate::transport::Transport;

use super::stats::{PoolCounters, RegistrySnapshot};
use super::types::{ConnectionRecord, NewConnection, RejectReason, RemovalReason};

/// Primary map and both secondary indexes, guarded together so readers never
/// observe an index entry without its record.
#[derive(Default)]
struct RegistryState {
    /// channel_id -> record
    connections: HashMap<String, ConnectionRecord>,
    /// user_id -> Set<channel_id> (supports multiple devices)
    user_index: HashMap<i64, HashSet<String>>,
    /// room_id -> Set<channel_id>
    room_index: HashMap<String, HashSet<String>>,
}

impl RegistryState {
    fn attach(&mut self, record: &ConnectionRecord) {
        if let Some(user_id) = record.user_id {
            self.user_index
                .entry(user_id)
                .or_default()
                .insert(record.channel_id.clone());
        }
        if let Some(room_id) = &record.room_id {
            self.room_index
                .entry(room_id.clone())
                .or_default()
                .insert(record.channel_id.clone());
        }
    }

    fn detach(&mut self, record: &ConnectionRecord) {
        if let Some(user_id) = record.user_id {
            prune(&mut self.user_index, &user_id, &record.channel_id);
        }
        if let Some(room_id) = &record.room_id {
            prune(&mut self.room_index, room_id, &record.channel_id);
        }
    }
}

/// Remove `channel_id` from a bucket, dropping the bucket once empty
fn prune<K: Eq + Hash>(index: &mut HashMap<K, HashSet<String>>, key: &K, channel_id: &str) {
    if let Some(bucket) = index.get_mut(key) {
        bucket.remove(channel_id);
        if bucket.is_empty() {
            index.remove(key);
        }
    }
}

/// Registry of all live connections with user and room indexes
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    config: PoolConfig,
    rate_limiter: Arc<RateLimiter>,
    counters: Arc<PoolCounters>,
    /// Notified of every removal so it can release per-channel resources
    transport: Option<Arc<dyn Transport>>,
}

impl ConnectionRegistry {
    pub fn new(config: PoolConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        Self::with_counters(config, rate_limiter, Arc::new(PoolCounters::default()))
    }

    pub fn with_counters(
        config: PoolConfig,
        rate_limiter: Arc<RateLimiter>,
        counters: Arc<PoolCounters>,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            config,
            rate_limiter,
            counters,
            transport: None,
        }
    }

    /// Attach the transport whose `on_removed` hook runs after each removal
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    pub fn counters(&self) -> &Arc<PoolCounters> {
        &self.counters
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Admit a new connection.
    ///
    /// Returns false without mutating anything when the pool is full or the
    /// caller's IP exceeded its connection rate.
    pub fn add(&self, conn: NewConnection) -> bool {
        let mut state = self.state.write();

        let current = state.connections.len();
        if current >= self.config.max_connections {
            drop(state);
            self.reject(RejectReason::Capacity);
            tracing::warn!(
                channel_id = %conn.channel_id,
                current = current,
                max = self.config.max_connections,
                "Connection rejected: pool at capacity"
            );
            return false;
        }

        if !self.rate_limiter.allow_new_connection(&conn.ip_address) {
            drop(state);
            self.reject(RejectReason::IpRateLimited);
            tracing::warn!(
                channel_id = %conn.channel_id,
                ip = %conn.ip_address,
                "Connection rejected: IP rate limited"
            );
            return false;
        }

        let record = ConnectionRecord::new(conn);
        if let Some(previous) = state.connections.remove(&record.channel_id) {
            // Re-registration of a live channel id replaces the old record
            state.detach(&previous);
            tracing::debug!(channel_id = %record.channel_id, "Replacing existing connection record");
        }
        state.attach(&record);

        let (channel_id, user_id, room_id) = (
            record.channel_id.clone(),
            record.user_id,
            record.room_id.clone(),
        );
        state.connections.insert(channel_id.clone(), record);
        let total = state.connections.len();
        drop(state);

        self.counters.record_connection();
        ConnectionMetrics::record_admitted(total);

        tracing::info!(
            channel_id = %channel_id,
            user_id = ?user_id,
            room_id = ?room_id,
            total = total,
            "Connection registered"
        );

        true
    }

    fn reject(&self, reason: RejectReason) {
        self.counters.record_rejection();
        ConnectionMetrics::record_rejected(reason.as_str());
    }

    /// Remove a connection. Unknown channels are a no-op returning false.
    pub fn remove(&self, channel_id: &str) -> bool {
        self.remove_with_reason(channel_id, RemovalReason::Manual)
    }

    /// Removal path shared by manual disconnects, the reaper and broadcast pruning
    pub fn remove_with_reason(&self, channel_id: &str, reason: RemovalReason) -> bool {
        let mut state = self.state.write();
        let Some(record) = state.connections.remove(channel_id) else {
            return false;
        };
        state.detach(&record);
        let total = state.connections.len();
        drop(state);

        self.rate_limiter.forget_channel(channel_id);
        ConnectionMetrics::record_removed(reason.as_str(), total);

        tracing::info!(
            channel_id = %channel_id,
            user_id = ?record.user_id,
            room_id = ?record.room_id,
            reason = %reason,
            "Connection unregistered"
        );

        if let Some(transport) = &self.transport {
            transport.on_removed(channel_id);
        }

        true
    }

    /// Record one message of activity on a connection
    pub fn update_activity(&self, channel_id: &str, bytes_sent: u64, bytes_received: u64) -> bool {
        let mut state = self.state.write();
        let Some(record) = state.connections.get_mut(channel_id) else {
            return false;
        };
        record.touch(bytes_sent, bytes_received);
        drop(state);

        self.counters
            .record_message(bytes_sent.saturating_add(bytes_received));
        true
    }

    /// Get a copy of a connection record
    pub fn get(&self, channel_id: &str) -> Option<ConnectionRecord> {
        self.state.read().connections.get(channel_id).cloned()
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.state.read().connections.contains_key(channel_id)
    }

    /// Get all channel ids for a user
    pub fn connections_for_user(&self, user_id: i64) -> Vec<String> {
        self.state
            .read()
            .user_index
            .get(&user_id)
            .map(sorted)
            .unwrap_or_default()
    }

    /// Get all channel ids in a room
    pub fn connections_for_room(&self, room_id: &str) -> Vec<String> {
        self.state
            .read()
            .room_index
            .get(room_id)
            .map(sorted)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of (channel_id, last_activity_at) for every connection
    pub fn activity_snapshot(&self) -> Vec<(String, DateTime<Utc>)> {
        self.state
            .read()
            .connections
            .values()
            .map(|r| (r.channel_id.clone(), r.last_activity_at))
            .collect()
    }

    /// Point-in-time counts derived under a single read lock
    pub fn snapshot(&self, now: DateTime<Utc>) -> RegistrySnapshot {
        let state = self.state.read();
        let active_within = |minutes: i64| {
            let window = Duration::minutes(minutes);
            state
                .connections
                .values()
                .filter(|r| r.idle_for(now) <= window)
                .count()
        };

        RegistrySnapshot {
            total_connections: state.connections.len(),
            authenticated_connections: state
                .connections
                .values()
                .filter(|r| r.is_authenticated())
                .count(),
            active_last_1m: active_within(1),
            active_last_5m: active_within(5),
            active_last_15m: active_within(15),
            unique_users: state.user_index.len(),
            unique_rooms: state.room_index.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, channel_id: &str, at: DateTime<Utc>) {
        if let Some(record) = self.state.write().connections.get_mut(channel_id) {
            record.last_activity_at = at;
        }
    }

    /// Every indexed channel has a record and every record is indexed
    #[cfg(test)]
    pub(crate) fn indexes_consistent(&self) -> bool {
        let state = self.state.read();
        let users_ok = state.user_index.iter().all(|(user_id, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    state
                        .connections
                        .get(id)
                        .is_some_and(|r| r.user_id == Some(*user_id))
                })
        });
        let rooms_ok = state.room_index.iter().all(|(room_id, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    state
                        .connections
                        .get(id)
                        .is_some_and(|r| r.room_id.as_deref() == Some(room_id.as_str()))
                })
        });
        let records_ok = state.connections.values().all(|r| {
            r.user_id.map_or(true, |u| {
                state
                    .user_index
                    .get(&u)
                    .is_some_and(|s| s.contains(&r.channel_id))
            }) && r.room_id.as_ref().map_or(true, |room| {
                    state
                        .room_index
                        .get(room)
                        .is_some_and(|s| s.contains(&r.channel_id))
                })
        });
        users_ok && rooms_ok && records_ok
    }
}

fn sorted(ids: &HashSet<String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.iter().cloned().collect();
    ids.sort();
    ids
}
