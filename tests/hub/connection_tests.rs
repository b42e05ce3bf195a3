//! Connection Lifecycle Tests
//!
//! Reader and writer loop behavior: ping replies, tolerance of malformed
//! input, and teardown when either half of the socket ends.

use pretty_assertions::assert_eq;

use chat_hub::presentation::websocket::{ConnectionState, EnqueueError, Frame};

use crate::common::{connect, eventually, registry};

const PING: &str = r#"{"type":"ping"}"#;
const PONG: &str = r#"{"type":"pong"}"#;

#[tokio::test]
async fn test_ping_is_answered_on_the_same_connection_only() {
    let registry = registry();
    let (_a, mut client_a) = connect(&registry, 1).await;
    let (_b, mut client_b) = connect(&registry, 2).await;

    client_a.send_text(PING);

    assert_eq!(client_a.recv_text().await.as_deref(), Some(PONG));
    client_a.expect_silence().await;
    client_b.expect_silence().await;
}

#[tokio::test]
async fn test_ping_with_payload_is_answered() {
    let registry = registry();
    let (_handle, mut client) = connect(&registry, 1).await;

    client.send_text(r#"{"type":"ping","payload":{"t":1700000000}}"#);

    assert_eq!(client.recv_text().await.as_deref(), Some(PONG));
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let registry = registry();
    let (handle, mut client) = connect(&registry, 1).await;

    client.send_text("not json");
    client.send_text(r#"{"type":5}"#);
    client.send_text(r#"{"payload":{}}"#);
    client.send_text(r#"{"type":"typing","payload":{"room_id":7}}"#);
    client.send_binary(b"\x00\x01");
    client.send_text(PING);

    // Only the ping produces output.
    assert_eq!(client.recv_text().await.as_deref(), Some(PONG));
    client.expect_silence().await;
    assert_eq!(handle.state(), ConnectionState::Active);
    assert!(registry.contains(1));
}

#[tokio::test]
async fn test_non_object_envelopes_get_no_reply() {
    let registry = registry();
    let (handle, mut client) = connect(&registry, 1).await;

    client.send_text(r#"["ping"]"#);
    client.send_text(r#"["ping",{"x":1}]"#);
    client.send_text(r#""ping""#);

    client.expect_silence().await;
    assert_eq!(handle.state(), ConnectionState::Active);

    client.send_text(PING);
    assert_eq!(client.recv_text().await.as_deref(), Some(PONG));
}

#[tokio::test]
async fn test_frames_are_written_in_enqueue_order() {
    let registry = registry();
    let (handle, mut client) = connect(&registry, 1).await;

    for i in 0..5 {
        handle.try_enqueue(Frame::from(format!("frame-{}", i))).unwrap();
    }

    for i in 0..5 {
        assert_eq!(client.recv_text().await, Some(format!("frame-{}", i)));
    }
}

#[tokio::test]
async fn test_read_error_removes_connection() {
    let registry = registry();
    let (handle, mut client) = connect(&registry, 1).await;

    client.fail();

    assert!(eventually(|| registry.lookup(1).is_none()).await);
    assert_eq!(handle.try_enqueue(Frame::from("x")), Err(EnqueueError::Closed));
    assert!(eventually(|| handle.state() == ConnectionState::Closed).await);
    assert!(client.is_released());
    assert_eq!(client.recv_text().await, None);
}

#[tokio::test]
async fn test_client_close_removes_connection() {
    let registry = registry();
    let (handle, client) = connect(&registry, 1).await;

    client.close();

    assert!(eventually(|| handle.state() == ConnectionState::Closed).await);
    assert!(registry.lookup(1).is_none());
}

#[tokio::test]
async fn test_dropped_client_removes_connection() {
    let registry = registry();
    let (handle, client) = connect(&registry, 1).await;

    drop(client);

    assert!(eventually(|| handle.state() == ConnectionState::Closed).await);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_write_error_removes_connection() {
    let registry = registry();
    let (handle, mut client) = connect(&registry, 1).await;

    client.stop_reading();
    handle.try_enqueue(Frame::from("undeliverable")).unwrap();

    assert!(eventually(|| handle.state() == ConnectionState::Closed).await);
    assert!(registry.lookup(1).is_none());
    assert!(client.is_released());
}

#[tokio::test]
async fn test_closed_connection_can_reconnect() {
    let registry = registry();
    let (first, client) = connect(&registry, 1).await;
    client.close();
    assert!(eventually(|| first.state() == ConnectionState::Closed).await);

    let (second, mut client) = connect(&registry, 1).await;
    client.send_text(PING);

    assert_eq!(client.recv_text().await.as_deref(), Some(PONG));
    assert_eq!(registry.lookup(1).unwrap().id(), second.id());
}
