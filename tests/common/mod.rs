//! Shared helpers: an in-memory server that speaks the handshake.

#![allow(dead_code)]

use std::sync::Arc;

use hass_socket::transport::{MemoryListener, MemoryPeer, memory_connector};
use hass_socket::{AuthSession, Connection, ConnectionEvent, Credential, EventKind, SetupRetry};
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const HA_VERSION: &str = "2024.1.0";

/// Connects a client and returns it with the server side of its channel.
pub async fn connect() -> (Connection, MemoryListener, MemoryPeer) {
    connect_with_version(HA_VERSION).await
}

pub async fn connect_with_version(version: &str) -> (Connection, MemoryListener, MemoryPeer) {
    let (connector, mut listener) = memory_connector();
    let auth = Arc::new(AuthSession::new(Credential::long_lived(
        "http://memory:8123",
        "secret",
    )));

    let client = tokio::spawn(
        Connection::builder()
            .auth(auth)
            .connector(Arc::new(connector))
            .setup_retry(SetupRetry::NONE)
            .connect(),
    );

    let peer = accept(&mut listener, version).await;
    let conn = client.await.expect("join").expect("connect");
    (conn, listener, peer)
}

/// Accepts the next attempt and completes the handshake.
pub async fn accept(listener: &mut MemoryListener, version: &str) -> MemoryPeer {
    let mut peer = listener.accept().await.expect("connection attempt");
    peer.send_json(&json!({"type": "auth_required", "ha_version": version}));

    let auth = peer.recv_json().await.expect("auth frame");
    assert_eq!(auth["type"], "auth");

    peer.send_json(&json!({"type": "auth_ok", "ha_version": version}));
    if hass_socket::protocol::at_least_version(version, 2022, 9, None) {
        let features = peer.recv_json().await.expect("supported_features");
        assert_eq!(features["type"], "supported_features");
    }
    peer
}

/// Sends a successful result for `id`.
pub fn reply(peer: &MemoryPeer, id: &Value, result: Value) {
    peer.send_json(&json!({"id": id, "type": "result", "success": true, "result": result}));
}

/// Sends a failed result for `id`.
pub fn reject(peer: &MemoryPeer, id: &Value, code: &str) {
    peer.send_json(&json!({
        "id": id,
        "type": "result",
        "success": false,
        "error": {"code": code, "message": "Rejected"}
    }));
}

/// Sends an event for subscription `id`.
pub fn event(peer: &MemoryPeer, id: &Value, event: Value) {
    peer.send_json(&json!({"id": id, "type": "event", "event": event}));
}

/// Acknowledges the next subscribe frame and returns it.
pub async fn ack_subscription(peer: &mut MemoryPeer) -> Value {
    let frame = peer.recv_json().await.expect("subscribe frame");
    reply(peer, &frame["id"], Value::Null);
    frame
}

/// Streams every connection notification.
pub fn notifications(conn: &Connection) -> mpsc::UnboundedReceiver<ConnectionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in [EventKind::Ready, EventKind::Disconnected, EventKind::ReconnectError] {
        let tx = tx.clone();
        conn.add_event_listener(kind, move |event| {
            let _ = tx.send(*event);
        });
    }
    rx
}

/// Lets spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Installs a test subscriber once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
