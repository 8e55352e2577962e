//! Realtime hub against a local websocket server.

use campus_client::realtime::PhoenixMessage;
use campus_client::{RealtimeHub, RealtimeSettings, ReconnectConfig, Session, SessionStore};
use campus_core::{AuthUser, ChangeEvent, Post};
use campus_test_utils::fixtures;
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

async fn bind(heartbeat: Duration) -> (TcpListener, RealtimeSettings) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let settings = RealtimeSettings {
        url: format!("ws://{}/socket", addr),
        anon_key: Arc::new(SecretString::new("anon".into())),
        heartbeat,
        reconnect: ReconnectConfig {
            initial_ms: 20,
            max_ms: 100,
            multiplier: 2.0,
            jitter_ms: 0,
        },
    };
    (listener, settings)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client never connected")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Next text frame sent by the client.
async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> PhoenixMessage {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("no frame from client")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn push(ws: &mut WebSocketStream<TcpStream>, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

fn insert_frame(topic: &str, post: &Post) -> Value {
    json!({
        "topic": topic,
        "event": "postgres_changes",
        "payload": {
            "ids": [1],
            "data": {
                "schema": "public",
                "table": "posts",
                "commit_timestamp": "2024-05-01T10:00:00Z",
                "type": "INSERT",
                "columns": [],
                "record": serde_json::to_value(post).unwrap(),
            }
        },
        "ref": null
    })
}

#[tokio::test]
async fn test_subscribe_joins_and_receives_routed_changes() {
    let (listener, settings) = bind(Duration::from_secs(60)).await;
    let hub = RealtimeHub::spawn(settings, SessionStore::new());
    let mut sub = hub.subscribe::<Post>(None).unwrap();
    let mut ws = accept(&listener).await;

    let join = next_frame(&mut ws).await;
    assert_eq!(join.event, "phx_join");
    assert!(join.topic.starts_with("realtime:public:posts:"));
    assert_eq!(join.payload["config"]["postgres_changes"][0]["table"], "posts");
    assert_eq!(join.payload["access_token"], "anon");

    let ada = fixtures::user("ada");
    let elsewhere = fixtures::post(&ada, "other channel");
    let mine = fixtures::post(&ada, "hello");
    push(&mut ws, insert_frame("realtime:public:posts:sub-999", &elsewhere)).await;
    push(&mut ws, insert_frame(&join.topic, &mine)).await;

    let event = timeout(WAIT, sub.next()).await.unwrap();
    assert_eq!(event, Some(ChangeEvent::Inserted(mine)));
    assert_eq!(sub.try_next(), None);
}

#[tokio::test]
async fn test_dropped_subscription_leaves_its_topic() {
    let (listener, settings) = bind(Duration::from_secs(60)).await;
    let hub = RealtimeHub::spawn(settings, SessionStore::new());
    let sub = hub.subscribe::<Post>(None).unwrap();
    let mut ws = accept(&listener).await;
    let join = next_frame(&mut ws).await;

    drop(sub);
    let leave = next_frame(&mut ws).await;
    assert_eq!(leave.event, "phx_leave");
    assert_eq!(leave.topic, join.topic);
}

#[tokio::test]
async fn test_reconnect_rejoins_live_channels() {
    let (listener, settings) = bind(Duration::from_secs(60)).await;
    let hub = RealtimeHub::spawn(settings, SessionStore::new());
    let _sub = hub.subscribe::<Post>(None).unwrap();

    let mut first = accept(&listener).await;
    let join = next_frame(&mut first).await;
    drop(first);

    let mut second = accept(&listener).await;
    let rejoin = next_frame(&mut second).await;
    assert_eq!(rejoin.event, "phx_join");
    assert_eq!(rejoin.topic, join.topic);
}

#[tokio::test]
async fn test_join_uses_session_token_and_heartbeats_flow() {
    let (listener, settings) = bind(Duration::from_millis(50)).await;
    let sessions = SessionStore::new();
    sessions.set(Session {
        access_token: Arc::new(SecretString::new("session-token".into())),
        refresh_token: None,
        expires_at: None,
        user: AuthUser {
            id: campus_core::new_entity_id(),
            email: None,
        },
    });
    let hub = RealtimeHub::spawn(settings, sessions);
    let _sub = hub.subscribe::<Post>(None).unwrap();
    let mut ws = accept(&listener).await;

    let join = next_frame(&mut ws).await;
    assert_eq!(join.payload["access_token"], "session-token");
    let heartbeat = next_frame(&mut ws).await;
    assert_eq!(heartbeat.event, "heartbeat");
    assert_eq!(heartbeat.topic, "phoenix");
}

#[tokio::test]
async fn test_shutdown_leaves_channels_and_closes() {
    let (listener, settings) = bind(Duration::from_secs(60)).await;
    let hub = RealtimeHub::spawn(settings, SessionStore::new());
    let _sub = hub.subscribe::<Post>(None).unwrap();
    let mut ws = accept(&listener).await;
    let join = next_frame(&mut ws).await;

    hub.shutdown();
    let leave = next_frame(&mut ws).await;
    assert_eq!(leave.event, "phx_leave");
    assert_eq!(leave.topic, join.topic);
    let closing = timeout(WAIT, ws.next()).await.unwrap();
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | None));
}
