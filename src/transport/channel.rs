//! In-process transport backed by per-connection mpsc mailboxes

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::TransportConfig;
use crate::websocket::ServerMessage;

use super::{Transport, TransportError};

/// Maps channel ids to the sender half of each socket's outbound mailbox.
/// The socket task owns the receiver and writes frames to the wire.
pub struct ChannelTransport {
    senders: DashMap<String, mpsc::Sender<ServerMessage>>,
    config: TransportConfig,
}

impl ChannelTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            senders: DashMap::new(),
            config,
        }
    }

    /// Create a mailbox for `channel_id` and return its receiving end
    pub fn open(&self, channel_id: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        self.senders.insert(channel_id.to_string(), tx);
        rx
    }

    /// Forget a channel's mailbox; the socket task sees the stream end
    pub fn close(&self, channel_id: &str) -> bool {
        self.senders.remove(channel_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, channel_id: &str, message: &ServerMessage) -> Result<(), TransportError> {
        // Clone the sender so no map shard is held across the await
        let sender = self
            .senders
            .get(channel_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::ChannelNotFound(channel_id.to_string()))?;

        let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
        match timeout(send_timeout, sender.send(message.clone())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.senders.remove(channel_id);
                Err(TransportError::Closed(channel_id.to_string()))
            }
            Err(_) => Err(TransportError::Timeout(channel_id.to_string())),
        }
    }

    fn on_removed(&self, channel_id: &str) {
        if self.close(channel_id) {
            tracing::debug!(channel_id = %channel_id, "Closed mailbox of removed channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_send_to_open_channel() {
        let transport = ChannelTransport::default();
        let mut rx = transport.open("c1");

        let message = ServerMessage::direct(json!({"hello": "world"}));
        assert_ok!(transport.send("c1", &message).await);

        assert_eq!(rx.recv().await, Some(message));
    }

    #[tokio::test]
    async fn test_send_to_unknown_channel() {
        let transport = ChannelTransport::default();

        let err = assert_err!(transport.send("nope", &ServerMessage::Pong).await);
        assert!(matches!(err, TransportError::ChannelNotFound(_)));
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver() {
        let transport = ChannelTransport::default();
        let rx = transport.open("c1");
        drop(rx);

        let err = assert_err!(transport.send("c1", &ServerMessage::Pong).await);
        assert!(matches!(err, TransportError::Closed(_)));
        assert!(transport.is_empty());
    }

    #[tokio::test]
    async fn test_full_mailbox_times_out() {
        let transport = ChannelTransport::new(TransportConfig {
            channel_buffer_size: 1,
            send_timeout_ms: 10,
        });
        let _rx = transport.open("c1");

        transport.send("c1", &ServerMessage::Pong).await.unwrap();
        let err = transport.send("c1", &ServerMessage::Pong).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_removal_hook_closes_mailbox() {
        let transport = ChannelTransport::default();
        let mut rx = transport.open("c1");

        transport.on_removed("c1");
        assert!(transport.is_empty());
        assert_eq!(rx.recv().await, None);

        // Unknown channels are ignored
        transport.on_removed("c1");
    }

    #[tokio::test]
    async fn test_close() {
        let transport = ChannelTransport::default();
        let mut rx = transport.open("c1");

        assert!(transport.close("c1"));
        assert!(!transport.close("c1"));
        assert_eq!(rx.recv().await, None);
    }
}
