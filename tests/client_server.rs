//! End-to-end scenarios over a real Unix-domain socket: a `Server` accepting
//! `Connection`s, token authorization, and multi-endpoint routing.

use std::sync::Arc;
use std::time::Duration;

use jsonlink::server::authority::{NoneAuthority, TokenAuthority};
use jsonlink::server::{ServerConfig, ServerEvent};
use jsonlink::{Connection, ConnectionConfig, Server};
use serde_json::json;

async fn socket_path() -> String {
    let _ = tracing_subscriber::fmt().with_env_filter("jsonlink=debug").try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("jsonlink-test.sock");
    // Leak the tempdir so it lives for the socket's lifetime within the test.
    Box::leak(Box::new(dir));
    path.to_string_lossy().into_owned()
}

#[tokio::test(flavor = "multi_thread")]
async fn client_connects_and_exchanges_messages_over_unix_socket() {
    let path = socket_path().await;

    let (server, mut server_events) = Server::new(ServerConfig { authority: Some(Arc::new(NoneAuthority)) });
    let server = Arc::new(server);
    server.listen_local(&path).await.expect("listen");

    let (conn, _conn_events) = Connection::new(ConnectionConfig::default());
    assert!(conn.connect_local(&path).await);

    let evt = tokio::time::timeout(Duration::from_secs(1), server_events.recv())
        .await
        .expect("no timeout")
        .expect("connection added event");
    let identifier = match evt {
        ServerEvent::ConnectionAdded(id) => id,
        other => panic!("unexpected event: {other:?}"),
    };

    let default_ep = conn.default_endpoint();
    assert!(default_ep.send(&json!({"hello": "world"})).await);

    let evt = tokio::time::timeout(Duration::from_secs(1), server_events.recv())
        .await
        .expect("no timeout")
        .expect("message event");
    match evt {
        ServerEvent::MessageReceived(id, msg) => {
            assert_eq!(id, identifier);
            assert_eq!(msg.get("hello").unwrap(), "world");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(server.send(&identifier, &json!({"reply": true})).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(default_ep.message_available());
    assert_eq!(default_ep.read_message().get("reply").unwrap(), true);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_token_client_is_rejected() {
    let path = socket_path().await;

    let authority = Arc::new(TokenAuthority::new().register("good-token", "alice"));
    let (server, mut server_events) = Server::new(ServerConfig { authority: Some(authority) });
    let server = Arc::new(server);
    server.listen_local(&path).await.expect("listen");

    let (conn, _conn_events) = Connection::new(ConnectionConfig::default());
    assert!(conn.connect_local(&path).await);

    let default_ep = conn.default_endpoint();
    assert!(default_ep.send(&json!({"token": "wrong-token"})).await);

    let evt = tokio::time::timeout(Duration::from_secs(1), server_events.recv())
        .await
        .expect("no timeout")
        .expect("authorization failed event");
    assert!(matches!(evt, ServerEvent::AuthorizationFailed));
}

#[tokio::test(flavor = "multi_thread")]
async fn named_endpoint_round_trips_through_server_reply() {
    let path = socket_path().await;

    let (server, mut server_events) = Server::new(ServerConfig { authority: Some(Arc::new(NoneAuthority)) });
    let server = Arc::new(server);
    server.listen_local(&path).await.expect("listen");

    let (conn, _conn_events) = Connection::new(ConnectionConfig::default());
    assert!(conn.connect_local(&path).await);
    let chat = conn.add_endpoint("chat");

    let evt = tokio::time::timeout(Duration::from_secs(1), server_events.recv())
        .await
        .expect("no timeout")
        .expect("connection added event");
    let identifier = match evt {
        ServerEvent::ConnectionAdded(id) => id,
        other => panic!("unexpected event: {other:?}"),
    };

    assert!(chat.send(&json!({"text": "hi"})).await);
    let evt = tokio::time::timeout(Duration::from_secs(1), server_events.recv())
        .await
        .expect("no timeout")
        .expect("message event");
    match evt {
        ServerEvent::MessageReceived(id, msg) => {
            assert_eq!(id, identifier);
            assert_eq!(msg.get("endpoint").unwrap(), "chat");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(server.send(&identifier, &json!({"endpoint": "chat", "text": "reply"})).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(chat.message_available());
    assert_eq!(chat.read_message().get("text").unwrap(), "reply");
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_reaches_every_authorized_identifier() {
    let path = socket_path().await;

    let (server, mut server_events) = Server::new(ServerConfig { authority: Some(Arc::new(NoneAuthority)) });
    let server = Arc::new(server);
    server.listen_local(&path).await.expect("listen");

    let (conn_a, _events_a) = Connection::new(ConnectionConfig::default());
    assert!(conn_a.connect_local(&path).await);
    let (conn_b, _events_b) = Connection::new(ConnectionConfig::default());
    assert!(conn_b.connect_local(&path).await);

    for _ in 0..2 {
        let evt = tokio::time::timeout(Duration::from_secs(1), server_events.recv())
            .await
            .expect("no timeout")
            .expect("connection added event");
        assert!(matches!(evt, ServerEvent::ConnectionAdded(_)));
    }

    let ep_a = conn_a.default_endpoint();
    let ep_b = conn_b.default_endpoint();
    server.broadcast(&json!({"announcement": "rollout"})).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ep_a.message_available());
    assert!(ep_b.message_available());
    assert_eq!(ep_a.read_message().get("announcement").unwrap(), "rollout");
    assert_eq!(ep_b.read_message().get("announcement").unwrap(), "rollout");
}

#[tokio::test(flavor = "multi_thread")]
async fn auto_reconnect_restores_the_connection_after_the_server_drops_it() {
    let path = socket_path().await;

    let (server, mut server_events) = Server::new(ServerConfig { authority: Some(Arc::new(NoneAuthority)) });
    let server = Arc::new(server);
    server.listen_local(&path).await.expect("listen");

    let config = ConnectionConfig { auto_reconnect_enabled: true, ..ConnectionConfig::default() };
    let (conn, _conn_events) = Connection::new(config);
    assert!(conn.connect_local(&path).await);

    let evt = tokio::time::timeout(Duration::from_secs(1), server_events.recv())
        .await
        .expect("no timeout")
        .expect("connection added event");
    let first_identifier = match evt {
        ServerEvent::ConnectionAdded(id) => id,
        other => panic!("unexpected event: {other:?}"),
    };
    server.remove_connection(&first_identifier).await;

    // spec.md's fixed 5s reconnect timer, plus slack for scheduling.
    let evt = tokio::time::timeout(Duration::from_secs(7), server_events.recv())
        .await
        .expect("reconnect within the fixed delay")
        .expect("connection added event");
    assert!(matches!(evt, ServerEvent::ConnectionAdded(_)));
    assert_eq!(conn.state(), jsonlink::ConnectionState::Connected);
}
