/// WebSocket integration tests
/// Tests presence tracking, fan-out, and end-to-end delivery over real sockets
use actix_web::web;
use chat_server::auth::{OpenDirectory, SessionAuthenticator, TokenVerifier};
use chat_server::registry::ConnectionRegistry;
use chat_server::router::{DeliveryEvent, Router, SendRequest, RECEIVE_EVENT};
use chat_server::server::create_test_http_server;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

const SECRET: &str = "websocket-test-secret";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn token(identity: &str) -> String {
    TokenVerifier::new(SECRET)
        .expect("Failed to build verifier")
        .issue(identity, chrono::Duration::hours(1))
        .expect("Failed to issue token")
}

fn start_server() -> (web::Data<Router>, String) {
    let router = web::Data::new(Router::in_memory([3u8; 32], Arc::new(OpenDirectory)));
    let verifier = TokenVerifier::new(SECRET).expect("Failed to build verifier");
    let authenticator = web::Data::new(SessionAuthenticator::new(Arc::new(verifier)));

    let (server, addr) =
        create_test_http_server(router.clone(), authenticator).expect("Failed to start server");
    actix_web::rt::spawn(server);
    (router, addr)
}

async fn connect(addr: &str, identity: &str) -> Socket {
    let url = format!("ws://{}/ws?token={}", addr, token(identity));
    let (socket, _) = connect_async(url).await.expect("Failed to connect");
    socket
}

/// Next text frame as JSON, skipping control frames
async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Socket closed")
            .expect("Socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("Frame is not JSON");
        }
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_registry_lifecycle() {
    let registry = ConnectionRegistry::new();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let connection = Uuid::new_v4();

    registry.register("alice", connection, tx).await;
    assert!(registry.is_online("alice").await);

    assert!(registry.unregister("alice", connection).await);
    assert!(!registry.is_online("alice").await);
    assert!(registry.online_identities().await.is_empty());
}

#[tokio::test]
async fn test_fanout_reaches_every_connection() {
    let registry = ConnectionRegistry::new();
    let (tx1, mut rx1) = tokio::sync::mpsc::unbounded_channel();
    let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
    let (tx3, mut rx3) = tokio::sync::mpsc::unbounded_channel();

    registry.register("bob", Uuid::new_v4(), tx1).await;
    registry.register("bob", Uuid::new_v4(), tx2).await;
    registry.register("carol", Uuid::new_v4(), tx3).await;

    let event = DeliveryEvent {
        sender: "alice".to_string(),
        receiver: "bob".to_string(),
        message: "hi".to_string(),
        is_group: false,
    };
    assert_eq!(registry.fanout("bob", RECEIVE_EVENT, &event).await, 2);

    for rx in [&mut rx1, &mut rx2] {
        let frame: Value = serde_json::from_str(&rx.recv().await.expect("No frame"))
            .expect("Frame is not JSON");
        assert_eq!(frame["event"], "receive");
        assert_eq!(frame["data"]["message"], "hi");
    }
    assert!(rx3.try_recv().is_err());
}

#[actix_web::test]
async fn test_end_to_end_direct_delivery() {
    let (router, addr) = start_server();

    let mut alice = connect(&addr, "alice").await;
    let mut bob = connect(&addr, "bob").await;
    settle().await;
    assert!(router.registry().is_online("alice").await);
    assert!(router.registry().is_online("bob").await);

    alice
        .send(Message::text(r#"{"receiver": "bob", "message": "hi"}"#))
        .await
        .expect("Failed to send");

    for socket in [&mut alice, &mut bob] {
        let frame = next_json(socket).await;
        assert_eq!(frame["event"], "receive");
        assert_eq!(frame["data"]["sender"], "alice");
        assert_eq!(frame["data"]["receiver"], "bob");
        assert_eq!(frame["data"]["message"], "hi");
        assert_eq!(frame["data"]["isGroup"], false);
    }

    let history = router
        .history()
        .query_direct("alice", "bob", "bob")
        .await
        .expect("Query failed");
    assert_eq!(history.len(), 1);
}

#[actix_web::test]
async fn test_end_to_end_group_delivery() {
    let (router, addr) = start_server();
    let group = router
        .groups()
        .create("Team", "alice", &["bob".to_string()])
        .await
        .expect("Failed to create group");

    let mut alice = connect(&addr, "alice").await;
    let mut bob = connect(&addr, "bob").await;
    let mut mallory = connect(&addr, "mallory").await;
    settle().await;

    let intrusion = serde_json::to_string(&SendRequest {
        receiver: None,
        group_id: Some(group.id.clone()),
        message: "let me in".to_string(),
    })
    .expect("Serialization failed");
    mallory.send(Message::text(intrusion)).await.expect("Failed to send");

    let hello = serde_json::to_string(&SendRequest {
        receiver: None,
        group_id: Some(group.id.clone()),
        message: "hello team".to_string(),
    })
    .expect("Serialization failed");
    bob.send(Message::text(hello)).await.expect("Failed to send");

    for socket in [&mut alice, &mut bob] {
        let frame = next_json(socket).await;
        assert_eq!(frame["data"]["sender"], "bob");
        assert_eq!(frame["data"]["receiver"], group.id.as_str());
        assert_eq!(frame["data"]["message"], "hello team");
        assert_eq!(frame["data"]["isGroup"], true);
    }

    // Nothing reaches the non-member, and nothing was stored for them
    assert!(tokio::time::timeout(Duration::from_millis(300), mallory.next())
        .await
        .is_err());
    assert_eq!(
        router
            .history()
            .count_for_target(&group.id)
            .await
            .expect("Count failed"),
        1
    );
}

#[actix_web::test]
async fn test_invalid_frame_gets_error_reply() {
    let (_router, addr) = start_server();
    let mut alice = connect(&addr, "alice").await;

    alice
        .send(Message::text("not json"))
        .await
        .expect("Failed to send");

    let frame = next_json(&mut alice).await;
    assert_eq!(frame["event"], "error");
    assert_eq!(frame["data"]["error"], "Invalid message format");
}

#[actix_web::test]
async fn test_unauthenticated_upgrade_rejected() {
    let (router, addr) = start_server();

    let result = connect_async(format!("ws://{}/ws", addr)).await;
    assert!(result.is_err());

    let result = connect_async(format!("ws://{}/ws?token=forged", addr)).await;
    assert!(result.is_err());
    assert!(router.registry().online_identities().await.is_empty());
}

#[actix_web::test]
async fn test_disconnect_unregisters() {
    let (router, addr) = start_server();

    let mut phone = connect(&addr, "bob").await;
    let laptop = connect(&addr, "bob").await;
    settle().await;
    assert_eq!(router.registry().connection_count("bob").await, 2);

    phone.close(None).await.expect("Failed to close");
    settle().await;
    assert_eq!(router.registry().connection_count("bob").await, 1);

    drop(laptop);
    settle().await;
    assert!(!router.registry().is_online("bob").await);
}
