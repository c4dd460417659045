//! End-to-end WebSocket tests.
//!
//! A real axum server is bound to an ephemeral port and driven with a
//! tokio-tungstenite client, covering the handshake, room commands,
//! keepalive and rejection of bad tokens.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use pos_realtime::adapters::{
    realtime_router, InMemoryBackplaneHub, MockTokenVerifier, WebSocketState,
};
use pos_realtime::application::{
    Broadcaster, ConnectionLifecycle, ConnectionRegistry, HandlerRegistry, LifecycleConfig,
};
use pos_realtime::ports::InstanceId;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Test Infrastructure
// =============================================================================

struct TestServer {
    addr: std::net::SocketAddr,
    lifecycle: Arc<ConnectionLifecycle>,
}

async fn start_server() -> TestServer {
    let hub = InMemoryBackplaneHub::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(
        Arc::new(hub.node(tx)),
        Arc::clone(&registry),
        "ws-test",
        InstanceId::new("ws-test"),
    ));
    broadcaster.spawn_receiver(rx);

    let verifier = MockTokenVerifier::new()
        .with_staff("staff-token", "u1", "t1", "o1")
        .with_admin("admin-token", "u9", "t9", "o9");
    let lifecycle = Arc::new(ConnectionLifecycle::new(
        registry,
        broadcaster,
        Arc::new(verifier),
        HandlerRegistry::with_defaults(),
        LifecycleConfig::default(),
    ));

    let app = realtime_router().with_state(WebSocketState::new(Arc::clone(&lifecycle)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, lifecycle }
}

impl TestServer {
    async fn connect(&self, token: &str) -> Socket {
        let url = format!("ws://{}/ws?token={}", self.addr, token);
        let (socket, _) = connect_async(url).await.unwrap();
        socket
    }

    async fn connect_with_header(&self, token: &str) -> Socket {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", token).parse().unwrap());
        let (socket, _) = connect_async(request).await.unwrap();
        socket
    }
}

/// Next text frame parsed as JSON, skipping control frames.
async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn send(socket: &mut Socket, text: &str) {
    socket.send(Message::Text(text.to_string())).await.unwrap();
}

/// Waits until the server has registered or removed connections.
async fn wait_for_connections(server: &TestServer, expected: usize) {
    for _ in 0..100 {
        if server.lifecycle.registry().len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connection count never reached {}", expected);
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn valid_token_receives_connected_with_default_rooms() {
    let server = start_server().await;
    let mut socket = server.connect("staff-token").await;

    let connected = next_event(&mut socket).await;
    assert_eq!(connected["event"], "connected");
    assert_eq!(
        connected["data"]["rooms"],
        serde_json::json!(["tenant:t1", "outlet:o1", "user:u1"])
    );
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let server = start_server().await;
    let mut socket = server.connect_with_header("staff-token").await;

    assert_eq!(next_event(&mut socket).await["event"], "connected");
}

#[tokio::test]
async fn invalid_token_gets_error_then_close() {
    let server = start_server().await;
    let mut socket = server.connect("forged").await;

    let error = next_event(&mut socket).await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], "UNAUTHORIZED");

    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Policy),
        other => panic!("expected close frame, got {:?}", other),
    }
    assert_eq!(server.lifecycle.registry().len().await, 0);
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test]
async fn join_room_and_ping_round_trip() {
    let server = start_server().await;
    let mut socket = server.connect("staff-token").await;
    next_event(&mut socket).await;

    send(&mut socket, r#"{"event":"join_room","data":{"room":"kitchen:o1"}}"#).await;
    let joined = next_event(&mut socket).await;
    assert_eq!(joined["event"], "room:joined");
    assert_eq!(joined["data"]["room"], "kitchen:o1");

    send(&mut socket, r#"{"event":"join_room","data":{"room":"tenant:t2"}}"#).await;
    let denied = next_event(&mut socket).await;
    assert_eq!(denied["event"], "error");
    assert_eq!(denied["data"]["message"], "Access denied to room");

    send(&mut socket, r#"{"event":"ping"}"#).await;
    let pong = next_event(&mut socket).await;
    assert_eq!(pong["event"], "pong");
    assert!(pong["data"]["timestamp"].is_string());
}

#[tokio::test]
async fn order_event_reaches_other_outlet_member() {
    let server = start_server().await;
    let mut pos = server.connect("staff-token").await;
    let mut admin = server.connect("admin-token").await;
    next_event(&mut pos).await;
    next_event(&mut admin).await;

    send(&mut admin, r#"{"event":"join_room","data":{"room":"outlet:o1"}}"#).await;
    assert_eq!(next_event(&mut admin).await["event"], "room:joined");

    send(
        &mut pos,
        r#"{"event":"order:create","data":{"order":{"id":"ord-1","items":[{"sku":"tea"}]}}}"#,
    )
    .await;

    let seen = next_event(&mut admin).await;
    assert_eq!(seen["event"], "order:new");
    assert_eq!(seen["data"]["order"]["id"], "ord-1");
    assert_eq!(seen["data"]["createdBy"]["userId"], "u1");
}

#[tokio::test]
async fn client_close_removes_connection() {
    let server = start_server().await;
    let mut socket = server.connect("staff-token").await;
    next_event(&mut socket).await;
    wait_for_connections(&server, 1).await;

    socket.close(None).await.unwrap();

    wait_for_connections(&server, 0).await;
    assert!(server.lifecycle.stats().await.tenants.is_empty());
}

#[tokio::test]
async fn logout_closes_with_normal_code() {
    let server = start_server().await;
    let mut socket = server.connect("staff-token").await;
    next_event(&mut socket).await;

    send(&mut socket, r#"{"event":"logout"}"#).await;

    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Close(Some(close)) = frame {
            assert_eq!(close.code, CloseCode::Normal);
            break;
        }
    }
    wait_for_connections(&server, 0).await;
}
