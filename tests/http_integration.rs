//! Admin HTTP surface tests
//!
//! Requests are driven through the router with `tower::ServiceExt::oneshot`,
//! so no listener is bound.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use realtime_connection_pool::config::Settings;
use realtime_connection_pool::connection_manager::NewConnection;
use realtime_connection_pool::server::{create_app, AppState};
use realtime_connection_pool::websocket::ServerMessage;

fn test_state() -> AppState {
    AppState::new(Settings::default())
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn get(state: &AppState, uri: &str) -> (StatusCode, Value) {
    send(create_app(state.clone()), Method::GET, uri, None).await
}

#[tokio::test]
async fn test_health() {
    let state = test_state();
    let (status, body) = get(&state, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["max_connections"], 1000);
    assert_eq!(body["reaper_running"], false);
}

#[tokio::test]
async fn test_stats_reflect_pool() {
    let state = test_state();
    state
        .pool
        .add_connection(NewConnection::new("c1", "10.0.0.1").user(5).room("lobby"));

    let (status, body) = get(&state, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_connections"], 1);
    assert_eq!(body["authenticated_connections"], 1);
    assert_eq!(body["unique_rooms"], 1);
    assert_eq!(body["rate_limiter"]["max_messages_per_window"], 60);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let state = test_state();
    let (status, body) = get(&state, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("rtpool_connections_active"));
}

#[tokio::test]
async fn test_connection_lookup_and_delete() {
    let state = test_state();
    let _rx = state.transport.open("c1");
    state
        .pool
        .add_connection(NewConnection::new("c1", "10.0.0.1").user(5).user_agent("probe"));

    let (status, body) = get(&state, "/api/v1/connections/c1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channel_id"], "c1");
    assert_eq!(body["user_id"], 5);
    assert_eq!(body["user_agent"], "probe");

    let (status, _) = send(
        create_app(state.clone()),
        Method::DELETE,
        "/api/v1/connections/c1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.transport.is_empty());

    let (status, body) = get(&state, "/api/v1/connections/c1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(
        create_app(state.clone()),
        Method::DELETE,
        "/api/v1/connections/c1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_index_lookups() {
    let state = test_state();
    state
        .pool
        .add_connection(NewConnection::new("b", "10.0.0.1").user(9).room("lobby"));
    state
        .pool
        .add_connection(NewConnection::new("a", "10.0.0.2").user(9));

    let (status, body) = get(&state, "/api/v1/users/9/connections").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["channels"], json!(["a", "b"]));

    let (_, body) = get(&state, "/api/v1/rooms/lobby/connections").await;
    assert_eq!(body["channels"], json!(["b"]));

    let (_, body) = get(&state, "/api/v1/rooms/empty/connections").await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_room_broadcast_over_http() {
    let state = test_state();
    let mut rx = state.transport.open("c1");
    state
        .pool
        .add_connection(NewConnection::new("c1", "10.0.0.1").room("lobby"));
    state
        .pool
        .add_connection(NewConnection::new("gone", "10.0.0.2").room("lobby"));

    let (status, body) = send(
        create_app(state.clone()),
        Method::POST,
        "/api/v1/rooms/lobby/broadcast",
        Some(json!({"payload": {"text": "hi"}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["targeted"], 2);
    assert_eq!(body["delivered"], 1);
    assert_eq!(body["pruned"], 1);
    assert!(body["timestamp"].is_string());

    assert_eq!(
        rx.recv().await.unwrap(),
        ServerMessage::to_room("lobby", json!({"text": "hi"}))
    );
    assert!(state.pool.get_connection_info("gone").is_none());
}

#[tokio::test]
async fn test_user_broadcast_rejects_null_payload() {
    let state = test_state();

    let (status, body) = send(
        create_app(state.clone()),
        Method::POST,
        "/api/v1/users/1/broadcast",
        Some(json!({"payload": null})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_cleanup_endpoint() {
    let state = test_state();
    state.pool.add_connection(NewConnection::new("c1", "10.0.0.1"));

    // Default threshold leaves fresh connections alone
    let (status, body) = send(
        create_app(state.clone()),
        Method::POST,
        "/api/v1/connections/cleanup",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);
    assert_eq!(body["max_idle_seconds"], 3600);

    let (_, body) = send(
        create_app(state.clone()),
        Method::POST,
        "/api/v1/connections/cleanup",
        Some(json!({"max_idle_seconds": 0})),
    )
    .await;
    assert_eq!(body["removed"], 1);
    assert_eq!(state.pool.get_statistics().total_connections, 0);
}
