//! Connection behavior against an in-memory server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{accept, ack_subscription, connect, event, notifications, reply, settle};
use hass_socket::protocol::command;
use hass_socket::{
    ConnectionEvent, ConnectionState, Error, ErrorCode, SubscribeOptions,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::Instant;

// ============================================================================
// Calls
// ============================================================================

#[tokio::test]
async fn test_call_resolves_with_result() {
    common::init_tracing();
    let (conn, _listener, mut peer) = connect().await;

    let call = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(command::get_states()).await }
    });

    let frame = peer.recv_json().await.expect("frame");
    assert_eq!(frame, json!({"type": "get_states", "id": 2}));
    reply(&peer, &frame["id"], json!([]));

    assert_eq!(call.await.expect("join").expect("call"), json!([]));
}

#[tokio::test]
async fn test_call_ids_increase() {
    let (conn, _listener, mut peer) = connect().await;

    let calls = tokio::spawn({
        let conn = conn.clone();
        async move {
            tokio::join!(
                conn.call(command::get_config()),
                conn.call(command::get_services())
            )
        }
    });

    let first = peer.recv_json().await.expect("first");
    let second = peer.recv_json().await.expect("second");
    assert_eq!(first["id"], 2);
    assert_eq!(second["id"], 3);

    // Answer out of order.
    reply(&peer, &second["id"], json!("services"));
    reply(&peer, &first["id"], json!("config"));

    let (config, services) = calls.await.expect("join");
    assert_eq!(config.expect("config"), json!("config"));
    assert_eq!(services.expect("services"), json!("services"));
}

#[tokio::test]
async fn test_remote_error() {
    let (conn, _listener, mut peer) = connect().await;

    let call = tokio::spawn({
        let conn = conn.clone();
        async move {
            conn.call(command::call_service("light", "blink", None, None, false))
                .await
        }
    });

    let frame = peer.recv_json().await.expect("frame");
    peer.send_json(&json!({
        "id": frame["id"],
        "type": "result",
        "success": false,
        "error": {"code": "not_found", "message": "Service not found"}
    }));

    match call.await.expect("join") {
        Err(Error::Remote { code, message }) => {
            assert_eq!(code, "not_found");
            assert_eq!(message, "Service not found");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let (conn, _listener, mut peer) = connect().await;

    let ping = tokio::spawn({
        let conn = conn.clone();
        async move { conn.ping().await }
    });

    let frame = peer.recv_json().await.expect("ping");
    assert_eq!(frame["type"], "ping");
    peer.send_json(&json!({"id": frame["id"], "type": "pong"}));

    ping.await.expect("join").expect("pong");
}

#[tokio::test]
async fn test_call_as_decodes() {
    let (conn, _listener, mut peer) = connect().await;

    let call = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call_as::<Vec<String>>(command::get_states()).await }
    });

    let frame = peer.recv_json().await.expect("frame");
    reply(&peer, &frame["id"], json!(["a", "b"]));
    assert_eq!(call.await.expect("join").expect("decoded"), vec!["a", "b"]);
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_batch_dispatch_in_order() {
    let (conn, _listener, mut peer) = connect().await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let subscribe = tokio::spawn({
        let conn = conn.clone();
        let seen = Arc::clone(&seen);
        async move {
            conn.subscribe_events(None, move |event| seen.lock().push(event["n"].clone()))
                .await
        }
    });
    let subscribe_frame = ack_subscription(&mut peer).await;
    assert_eq!(subscribe_frame["type"], "subscribe_events");
    assert!(subscribe_frame.get("event_type").is_none());
    let _subscription = subscribe.await.expect("join").expect("subscribed");

    let call = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(command::get_config()).await }
    });
    let call_frame = peer.recv_json().await.expect("call");

    let sub_id = &subscribe_frame["id"];
    peer.send_text(
        json!([
            {"id": sub_id, "type": "event", "event": {"n": 1}},
            {"id": call_frame["id"], "type": "result", "success": true, "result": "done"},
            {"id": sub_id, "type": "event", "event": {"n": 2}}
        ])
        .to_string(),
    );

    assert_eq!(call.await.expect("join").expect("call"), json!("done"));
    settle().await;
    assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_subscription_rejected() {
    let (conn, _listener, mut peer) = connect().await;

    let subscribe = tokio::spawn({
        let conn = conn.clone();
        async move { conn.subscribe_events(Some("forbidden"), |_| {}).await }
    });

    let frame = peer.recv_json().await.expect("subscribe");
    peer.send_json(&json!({
        "id": frame["id"],
        "type": "result",
        "success": false,
        "error": {"code": "unauthorized", "message": "Unauthorized"}
    }));

    assert!(matches!(
        subscribe.await.expect("join"),
        Err(Error::Remote { .. })
    ));
}

#[tokio::test]
async fn test_unsubscribe_stops_events() {
    let (conn, _listener, mut peer) = connect().await;
    let seen = Arc::new(Mutex::new(0usize));

    let subscribe = tokio::spawn({
        let conn = conn.clone();
        let seen = Arc::clone(&seen);
        async move {
            conn.subscribe_events(Some("state_changed"), move |_| *seen.lock() += 1)
                .await
        }
    });
    let frame = ack_subscription(&mut peer).await;
    let subscription = subscribe.await.expect("join").expect("subscribed");

    let unsubscribe = tokio::spawn(subscription.unsubscribe());
    let unsub = peer.recv_json().await.expect("unsubscribe");
    assert_eq!(unsub["type"], "unsubscribe_events");
    assert_eq!(unsub["subscription"], frame["id"]);

    // Late event before the unsubscribe result is dropped.
    event(&peer, &frame["id"], json!({}));
    reply(&peer, &unsub["id"], Value::Null);
    unsubscribe.await.expect("join").expect("unsubscribed");

    settle().await;
    assert_eq!(*seen.lock(), 0);
}

#[tokio::test]
async fn test_unknown_subscription_event_triggers_unsubscribe() {
    let (_conn, _listener, mut peer) = connect().await;

    event(&peer, &json!(99), json!({"event_type": "state_changed"}));

    let frame = peer.recv_json().await.expect("unsubscribe");
    assert_eq!(frame["type"], "unsubscribe_events");
    assert_eq!(frame["subscription"], 99);
    assert_eq!(frame["id"], 2);
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test]
async fn test_calls_while_disconnected_are_replayed_in_order() {
    let (conn, mut listener, mut peer) = connect().await;
    let mut events = notifications(&conn);

    peer.close();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    let calls = tokio::spawn({
        let conn = conn.clone();
        async move {
            tokio::join!(
                conn.call(command::get_states()),
                conn.call(command::get_config()),
                conn.call(command::get_services())
            )
        }
    });
    settle().await;

    let mut peer = accept(&mut listener, common::HA_VERSION).await;
    let mut types = Vec::new();
    for expected_id in 2..=4 {
        let frame = peer.recv_json().await.expect("replayed");
        assert_eq!(frame["id"], expected_id);
        types.push(frame["type"].as_str().unwrap_or_default().to_owned());
        reply(&peer, &frame["id"], json!(expected_id));
    }
    assert_eq!(types, ["get_states", "get_config", "get_services"]);

    let (a, b, c) = calls.await.expect("join");
    assert_eq!(a.expect("a"), json!(2));
    assert_eq!(b.expect("b"), json!(3));
    assert_eq!(c.expect("c"), json!(4));

    assert_eq!(events.recv().await, Some(ConnectionEvent::Ready));
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_in_flight_call_fails_on_loss() {
    let (conn, _listener, mut peer) = connect().await;

    let call = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(command::get_states()).await }
    });
    peer.recv_json().await.expect("frame");
    peer.close();

    assert!(matches!(
        call.await.expect("join"),
        Err(Error::ConnectionLost)
    ));
}

#[tokio::test]
async fn test_unsubscribe_while_disconnected_is_not_replayed() {
    let (conn, mut listener, mut peer) = connect().await;
    let mut events = notifications(&conn);

    let subscribe = tokio::spawn({
        let conn = conn.clone();
        async move { conn.subscribe_events(Some("state_changed"), |_| {}).await }
    });
    ack_subscription(&mut peer).await;
    let subscription = subscribe.await.expect("join").expect("subscribe");

    peer.close();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));
    subscription.unsubscribe().await.expect("local unsubscribe");

    let mut peer = accept(&mut listener, common::HA_VERSION).await;
    assert_eq!(events.recv().await, Some(ConnectionEvent::Ready));
    settle().await;
    assert!(peer.try_recv_json().is_none());
}

#[tokio::test]
async fn test_subscriptions_are_replayed_after_reconnect() {
    let (conn, mut listener, mut peer) = connect().await;
    let mut events = notifications(&conn);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let durable = tokio::spawn({
        let conn = conn.clone();
        let seen = Arc::clone(&seen);
        async move {
            conn.subscribe_events(Some("state_changed"), move |event| {
                seen.lock().push(event);
            })
            .await
        }
    });
    ack_subscription(&mut peer).await;
    let _durable = durable.await.expect("join").expect("durable");

    let once = tokio::spawn({
        let conn = conn.clone();
        async move {
            conn.subscribe_message(
                command::subscribe_events(Some("call_service")),
                |_| {},
                SubscribeOptions::once(),
            )
            .await
        }
    });
    ack_subscription(&mut peer).await;
    let _once = once.await.expect("join").expect("once");

    peer.close();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));

    let mut peer = accept(&mut listener, common::HA_VERSION).await;
    let replayed = ack_subscription(&mut peer).await;
    assert_eq!(replayed["id"], 2);
    assert_eq!(replayed["event_type"], "state_changed");
    assert_eq!(events.recv().await, Some(ConnectionEvent::Ready));

    // The one-shot subscription is gone.
    settle().await;
    assert!(peer.try_recv_json().is_none());

    event(&peer, &replayed["id"], json!({"n": 1}));
    settle().await;
    assert_eq!(*seen.lock(), vec![json!({"n": 1})]);
}

#[tokio::test]
async fn test_auth_invalid_during_reconnect_rejects_queue() {
    let (conn, mut listener, mut peer) = connect().await;
    let mut events = notifications(&conn);

    peer.close();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));

    let queued = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(command::get_states()).await }
    });
    settle().await;

    let mut peer = listener.accept().await.expect("attempt");
    peer.send_json(&json!({"type": "auth_required"}));
    peer.recv_json().await.expect("auth");
    peer.send_json(&json!({"type": "auth_invalid", "message": "Invalid access token"}));

    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::ReconnectError(ErrorCode::InvalidAuth))
    );
    assert!(matches!(
        queued.await.expect("join"),
        Err(Error::ConnectionLost)
    ));

    // No further attempts, and new calls fail right away.
    assert!(matches!(
        conn.call(command::get_states()).await,
        Err(Error::ConnectionLost)
    ));
    settle().await;
    assert!(listener.try_accept().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff() {
    let (conn, mut listener, mut peer) = connect().await;
    let mut events = notifications(&conn);

    peer.close();
    assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));

    let mut accepted = Vec::new();
    for _ in 0..3 {
        let mut attempt = listener.accept().await.expect("attempt");
        accepted.push(Instant::now());
        attempt.close();
    }

    assert_eq!(accepted[1] - accepted[0], Duration::from_secs(1));
    assert_eq!(accepted[2] - accepted[1], Duration::from_secs(2));

    let _peer = accept(&mut listener, common::HA_VERSION).await;
    assert_eq!(events.recv().await, Some(ConnectionEvent::Ready));
}

#[tokio::test]
async fn test_suspend_until_signal() {
    let (conn, mut listener, _peer) = connect().await;
    let mut events = notifications(&conn);

    let (resume_tx, resume_rx) = oneshot::channel::<()>();
    conn.suspend_reconnect_until(async move {
        let _ = resume_rx.await;
    });
    conn.suspend().await.expect("suspend");

    assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));
    settle().await;
    assert!(listener.try_accept().is_none());

    resume_tx.send(()).expect("resume");
    let _peer = accept(&mut listener, common::HA_VERSION).await;
    assert_eq!(events.recv().await, Some(ConnectionEvent::Ready));
}

#[tokio::test]
async fn test_suspend_without_signal_is_rejected() {
    let (conn, _listener, _peer) = connect().await;
    assert!(matches!(conn.suspend().await, Err(Error::Config { .. })));
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_forced_reconnect() {
    let (conn, mut listener, _peer) = connect().await;
    let mut events = notifications(&conn);

    conn.reconnect(true);
    assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));

    let _peer = accept(&mut listener, common::HA_VERSION).await;
    assert_eq!(events.recv().await, Some(ConnectionEvent::Ready));
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_close_fails_pending_and_stays_silent() {
    let (conn, mut listener, mut peer) = connect().await;
    let mut events = notifications(&conn);

    let call = tokio::spawn({
        let conn = conn.clone();
        async move { conn.call(command::get_states()).await }
    });
    peer.recv_json().await.expect("frame");

    conn.close().await;

    assert!(matches!(
        call.await.expect("join"),
        Err(Error::ConnectionLost)
    ));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(
        conn.call(command::get_states()).await,
        Err(Error::ConnectionLost)
    ));

    settle().await;
    assert!(events.try_recv().is_err());
    assert!(listener.try_accept().is_none());
    assert!(peer.recv_json().await.is_none());
}
