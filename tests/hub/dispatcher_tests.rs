//! Dispatcher Tests
//!
//! User and room fan-out through live connections.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use chat_hub::domain::RoomMembershipProvider;
use chat_hub::presentation::websocket::{ConnectionState, Dispatcher, Envelope};

use crate::common::{connect, connect_with, eventually, registry, StaticMembership, QUEUE_CAPACITY};

fn dispatcher(membership: StaticMembership) -> (Dispatcher, Arc<StaticMembership>) {
    let membership = Arc::new(membership);
    let provider: Arc<dyn RoomMembershipProvider> = membership.clone();
    let dispatcher = Dispatcher::new(registry(), provider);
    (dispatcher, membership)
}

#[tokio::test]
async fn test_room_broadcast_reaches_connected_members_once() {
    let (dispatcher, _) = dispatcher(StaticMembership::default().with_room(7, &[1, 2, 3]));
    let registry = dispatcher.registry();
    let (_h1, mut member_1) = connect(registry, 1).await;
    let (_h3, mut member_3) = connect(registry, 3).await;
    let (_h4, mut outsider) = connect(registry, 4).await;

    dispatcher
        .broadcast_to_room(7, &Envelope::new_message(json!({"id": 42, "content": "hi"})))
        .await;

    let expected = r#"{"type":"new_message","payload":{"id":42,"content":"hi"}}"#;
    assert_eq!(member_1.recv_text().await.as_deref(), Some(expected));
    assert_eq!(member_3.recv_text().await.as_deref(), Some(expected));
    member_1.expect_silence().await;
    member_3.expect_silence().await;
    outsider.expect_silence().await;
}

#[tokio::test]
async fn test_room_broadcast_is_abandoned_when_membership_fails() {
    let (dispatcher, membership) = dispatcher(StaticMembership::default().with_room(7, &[1, 2]));
    let registry = dispatcher.registry();
    let (h1, mut member_1) = connect(registry, 1).await;
    let (_h2, mut member_2) = connect(registry, 2).await;

    membership.set_failing(true);
    dispatcher
        .broadcast_to_room(7, &Envelope::new_message(json!({"id": 1})))
        .await;

    member_1.expect_silence().await;
    member_2.expect_silence().await;
    assert_eq!(h1.state(), ConnectionState::Active);
    assert_eq!(registry.len(), 2);

    membership.set_failing(false);
    dispatcher
        .broadcast_to_room(7, &Envelope::new_message(json!({"id": 2})))
        .await;
    assert!(member_1.recv_text().await.is_some());
    assert!(member_2.recv_text().await.is_some());
}

#[tokio::test]
async fn test_user_broadcast() {
    let (dispatcher, _) = dispatcher(StaticMembership::default());
    let registry = dispatcher.registry();
    let (_h1, mut user_1) = connect(registry, 1).await;
    let (_h2, mut user_2) = connect(registry, 2).await;

    dispatcher.broadcast_to_user(1, &Envelope::messages_read(7, 2, 120));
    // Offline identity: silently dropped.
    dispatcher.broadcast_to_user(9, &Envelope::messages_read(7, 2, 120));

    let frame = user_1.recv_text().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "messages_read",
            "payload": {"room_id": 7, "user_id": 2, "last_read_message_id": 120}
        })
    );
    user_2.expect_silence().await;
}

#[tokio::test]
async fn test_broadcasts_arrive_in_issue_order() {
    let (dispatcher, _) = dispatcher(StaticMembership::default().with_room(7, &[1, 2]));
    let registry = dispatcher.registry();
    let (_h1, mut member_1) = connect(registry, 1).await;
    let (_h2, mut member_2) = connect(registry, 2).await;

    for id in 0..10 {
        dispatcher
            .broadcast_to_room(7, &Envelope::new_message(json!({"id": id})))
            .await;
    }

    for client in [&mut member_1, &mut member_2] {
        for id in 0..10 {
            let frame = client.recv_text().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["payload"]["id"], id);
        }
    }
}

#[tokio::test]
async fn test_slow_consumer_is_evicted_without_affecting_others() {
    let (dispatcher, _) = dispatcher(StaticMembership::default().with_room(7, &[1, 2]));
    let registry = dispatcher.registry();
    // Socket that accepts one frame and is never read again.
    let (slow, _stalled) = connect_with(registry, 1, QUEUE_CAPACITY, 0).await;
    let (healthy, mut healthy_client) = connect(registry, 2).await;

    for id in 0..300 {
        dispatcher.broadcast_to_user(1, &Envelope::new_message(json!({"id": id})));
    }

    assert!(registry.lookup(1).is_none());
    assert!(eventually(|| slow.state() == ConnectionState::Closed).await);

    dispatcher
        .broadcast_to_room(7, &Envelope::new_message(json!({"id": "after"})))
        .await;
    let frame = healthy_client.recv_text().await.unwrap();
    assert!(frame.contains("after"));
    assert_eq!(healthy.state(), ConnectionState::Active);
    assert_eq!(registry.len(), 1);
}
