//! Outbound delivery abstraction.
//!
//! The pool never owns sockets. It hands messages to a [`Transport`], which
//! reports success or failure per channel.

mod channel;

pub use channel::ChannelTransport;

use async_trait::async_trait;
use thiserror::Error;

use crate::websocket::ServerMessage;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("Send to {0} timed out")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Send primitive provided by the transport layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message to one channel
    async fn send(&self, channel_id: &str, message: &ServerMessage) -> Result<(), TransportError>;

    /// Called after a channel leaves the registry, whatever removed it.
    /// Runs outside the registry lock.
    fn on_removed(&self, _channel_id: &str) {}
}
