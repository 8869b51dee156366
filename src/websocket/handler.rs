use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::connection_manager::NewConnection;
use crate::metrics::{WsMessageMetrics, WS_CONNECTION_DURATION};
use crate::pool::ConnectionPool;
use crate::server::AppState;

use super::message::{ClientMessage, ServerMessage};

/// Header carrying an already-authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<i64>,
    pub room_id: Option<String>,
}

/// Identity and metadata of a socket before it is admitted
#[derive(Debug, Clone)]
struct Peer {
    ip_address: String,
    user_id: Option<i64>,
    room_id: Option<String>,
    user_agent: String,
}

impl Peer {
    fn into_connection(self, channel_id: &str) -> NewConnection {
        let mut conn = NewConnection::new(channel_id, self.ip_address).user_agent(self.user_agent);
        if let Some(user_id) = self.user_id {
            conn = conn.user(user_id);
        }
        if let Some(room_id) = self.room_id {
            conn = conn.room(room_id);
        }
        conn
    }
}

/// The header wins over the query string when both carry a user id
fn resolve_user_id(query: &WsQuery, headers: &HeaderMap) -> Option<i64> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(query.user_id)
}

fn resolve_user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(ip = %addr.ip(), room_id = ?query.room_id)
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let peer = Peer {
        ip_address: addr.ip().to_string(),
        user_id: resolve_user_id(&query, &headers),
        room_id: query.room_id.clone(),
        user_agent: resolve_user_agent(&headers),
    };

    tracing::debug!(user_id = ?peer.user_id, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, peer),
    fields(ip = %peer.ip_address, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, peer: Peer) {
    let channel_id = uuid::Uuid::new_v4().to_string();
    let connection_start = std::time::Instant::now();

    // Mailbox first so a broadcast racing the admission finds a sender
    let mut rx = state.transport.open(&channel_id);

    if !state.pool.add_connection(peer.clone().into_connection(&channel_id)) {
        state.transport.close(&channel_id);
        tracing::warn!(channel_id = %channel_id, ip = %peer.ip_address, "Connection rejected");

        let (mut ws_sender, _) = socket.split();
        let error_msg = ServerMessage::error(
            "CONNECTION_REJECTED",
            "Connection limit reached or too many connection attempts",
        );
        if let Ok(json) = error_msg.to_json() {
            let _ = ws_sender.send(Message::Text(json.into())).await;
        }
        let _ = ws_sender.close().await;
        return;
    }

    tracing::info!(
        channel_id = %channel_id,
        user_id = ?peer.user_id,
        room_id = ?peer.room_id,
        "WebSocket connection established"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Deliveries are counted by the dispatcher, so the writer only forwards
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_channel = channel_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &recv_state, &recv_channel).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {
            tracing::debug!(channel_id = %channel_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(channel_id = %channel_id, "Receive task completed");
        }
    }

    // The reaper or a failed broadcast may have removed it already
    state.pool.release_connection(&channel_id);
    state.transport.close(&channel_id);

    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        channel_id = %channel_id,
        user_id = ?peer.user_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Verdict on one inbound text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    Accepted,
    RateLimited,
    /// The pool already dropped this channel
    Gone,
}

fn admit_frame(pool: &ConnectionPool, channel_id: &str, len: u64) -> Inbound {
    // Checked first so a removed channel never opens a new message window
    if !pool.registry().contains(channel_id) {
        return Inbound::Gone;
    }
    if pool.is_rate_limited(channel_id) {
        return Inbound::RateLimited;
    }
    if !pool.update_activity(channel_id, 0, len) {
        return Inbound::Gone;
    }
    Inbound::Accepted
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, channel_id: &str) -> bool {
    match msg {
        Message::Text(text) => {
            match admit_frame(&state.pool, channel_id, text.len() as u64) {
                Inbound::Accepted => {}
                Inbound::RateLimited => {
                    WsMessageMetrics::record("rate_limited");
                    reply(
                        state,
                        channel_id,
                        ServerMessage::error("RATE_LIMITED", "Too many messages, slow down"),
                    )
                    .await;
                    return true;
                }
                Inbound::Gone => {
                    tracing::debug!(channel_id = %channel_id, "Connection no longer registered");
                    return false;
                }
            }

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    WsMessageMetrics::record("invalid");
                    reply(state, channel_id, ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                    return true;
                }
            };

            handle_client_message(client_msg, state, channel_id).await;
            true
        }
        Message::Binary(_) => {
            reply(
                state,
                channel_id,
                ServerMessage::error("UNSUPPORTED_FORMAT", "Binary messages are not supported"),
            )
            .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself; control frames only keep the connection fresh
            state.pool.update_activity(channel_id, 0, 0)
        }
        Message::Close(_) => {
            tracing::debug!(channel_id = %channel_id, "Received close frame");
            false
        }
    }
}

async fn handle_client_message(msg: ClientMessage, state: &AppState, channel_id: &str) {
    match msg {
        ClientMessage::Ping => {
            WsMessageMetrics::record("ping");
            reply(state, channel_id, ServerMessage::Pong).await;
        }
        ClientMessage::Message(payload) => {
            WsMessageMetrics::record("message");
            // Client messages are relayed to the sender's room, if any
            let room_id = state.pool.get_connection_info(channel_id).and_then(|c| c.room_id);
            if let Some(room_id) = room_id {
                let message = ServerMessage::to_room(room_id.clone(), payload);
                let result = state.pool.broadcast_to_room(&room_id, &message).await;
                tracing::debug!(
                    channel_id = %channel_id,
                    room_id = %room_id,
                    delivered = result.delivered,
                    "Relayed client message"
                );
            }
        }
    }
}

async fn reply(state: &AppState, channel_id: &str, message: ServerMessage) {
    use crate::transport::Transport;

    if let Err(e) = state.transport.send(channel_id, &message).await {
        tracing::debug!(channel_id = %channel_id, error = %e, "Failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::HeaderValue;

    use crate::config::Settings;
    use crate::transport::ChannelTransport;

    #[test]
    fn test_user_id_header_wins_over_query() {
        let query = WsQuery {
            user_id: Some(1),
            room_id: None,
        };
        let mut headers = HeaderMap::new();
        assert_eq!(resolve_user_id(&query, &headers), Some(1));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        assert_eq!(resolve_user_id(&query, &headers), Some(42));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-number"));
        assert_eq!(resolve_user_id(&query, &headers), Some(1));
    }

    #[test]
    fn test_peer_into_connection() {
        let peer = Peer {
            ip_address: "10.0.0.1".to_string(),
            user_id: Some(7),
            room_id: Some("lobby".to_string()),
            user_agent: "test-agent".to_string(),
        };
        let conn = peer.into_connection("c1");
        assert_eq!(conn.channel_id, "c1");
        assert_eq!(conn.user_id, Some(7));
        assert_eq!(conn.room_id.as_deref(), Some("lobby"));
        assert_eq!(conn.user_agent, "test-agent");
        assert_eq!(conn.ip_address, "10.0.0.1");
    }

    #[test]
    fn test_missing_user_agent_is_empty() {
        assert_eq!(resolve_user_agent(&HeaderMap::new()), "");
    }

    fn pool_with_transport() -> (ConnectionPool, Arc<ChannelTransport>) {
        let settings = Settings::default();
        let transport = Arc::new(ChannelTransport::new(settings.transport));
        (ConnectionPool::new(&settings, transport.clone()), transport)
    }

    #[test]
    fn test_admit_frame() {
        let (pool, _transport) = pool_with_transport();
        pool.add_connection(NewConnection::new("c1", "10.0.0.1"));

        for _ in 0..60 {
            assert_eq!(admit_frame(&pool, "c1", 8), Inbound::Accepted);
        }
        assert_eq!(admit_frame(&pool, "c1", 8), Inbound::RateLimited);
        assert_eq!(pool.get_connection_info("c1").unwrap().bytes_received, 480);
    }

    #[tokio::test]
    async fn test_frame_after_reap_leaves_nothing_behind() {
        let (pool, transport) = pool_with_transport();
        let mut rx = transport.open("c1");
        pool.add_connection(NewConnection::new("c1", "10.0.0.1"));

        assert_eq!(pool.cleanup_stale_connections(0), 1);

        // The reaper closed the mailbox, which ends the writer task
        assert!(transport.is_empty());
        assert_eq!(rx.recv().await, None);

        // A late frame is refused without opening a message window
        assert_eq!(admit_frame(&pool, "c1", 8), Inbound::Gone);
        assert!(!pool.release_connection("c1"));

        let stats = pool.get_statistics();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.rate_limiter.channel_windows, 0);
    }

    #[test]
    fn test_release_drops_stray_window() {
        let (pool, _transport) = pool_with_transport();
        pool.add_connection(NewConnection::new("c1", "10.0.0.1"));
        pool.cleanup_stale_connections(0);

        // Window opened by a frame racing the removal
        pool.is_rate_limited("c1");
        assert_eq!(pool.get_statistics().rate_limiter.channel_windows, 1);

        pool.release_connection("c1");
        assert_eq!(pool.get_statistics().rate_limiter.channel_windows, 0);
    }
}
