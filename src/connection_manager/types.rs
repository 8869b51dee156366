//! Connection record and related types

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Parameters supplied by the transport layer when a connection opens
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub channel_id: String,
    pub user_id: Option<i64>,
    pub room_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
}

impl NewConnection {
    pub fn new(channel_id: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_id: None,
            room_id: None,
            ip_address: ip_address.into(),
            user_agent: String::new(),
        }
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// State tracked for one live connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    pub channel_id: String,
    pub user_id: Option<i64>,
    pub room_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub ip_address: String,
    pub user_agent: String,
}

impl ConnectionRecord {
    pub fn new(conn: NewConnection) -> Self {
        let now = Utc::now();
        Self {
            channel_id: conn.channel_id,
            user_id: conn.user_id,
            room_id: conn.room_id,
            connected_at: now,
            last_activity_at: now,
            message_count: 0,
            bytes_sent: 0,
            bytes_received: 0,
            ip_address: conn.ip_address,
            user_agent: conn.user_agent,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Time since the last recorded activity, clamped at zero
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_activity_at)
            .max(chrono::Duration::zero())
    }

    pub(crate) fn touch(&mut self, bytes_sent: u64, bytes_received: u64) {
        self.last_activity_at = Utc::now();
        self.message_count = self.message_count.saturating_add(1);
        self.bytes_sent = self.bytes_sent.saturating_add(bytes_sent);
        self.bytes_received = self.bytes_received.saturating_add(bytes_received);
    }
}

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Explicit disconnect from the transport layer or an admin
    Manual,
    /// Evicted by the idle reaper
    Stale,
    /// Pruned after a failed broadcast send
    SendFailure,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Stale => "stale",
            Self::SendFailure => "send_failure",
        }
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an admission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Capacity,
    IpRateLimited,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::IpRateLimited => "ip_rate_limited",
        }
    }
}
