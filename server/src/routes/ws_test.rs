use super::*;
use crate::state::test_helpers;
use protocol::command::ChunkPos;
use serde_json::json;
use tokio::time::{Duration, timeout};

async fn recv_delivery(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("delivery timed out")
        .expect("delivery channel closed unexpectedly")
}

async fn assert_no_delivery(rx: &mut mpsc::Receiver<Envelope>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no delivery"
    );
}

fn publish_text(topic: &str, qos: Qos, payload: serde_json::Value) -> String {
    Envelope::Publish { topic: topic.into(), qos, payload }.encode()
}

fn add_payload(position: [f32; 3]) -> serde_json::Value {
    json!({"add": {"object": {
        "tool": "brush",
        "transform": {"position": position, "rotation": [0.0, 0.0, 0.0, 1.0], "scale": [1.0, 1.0, 1.0]},
        "props": {"color": "#004488"},
    }}})
}

fn avatar_payload(client_id: &str, mural: u32) -> serde_json::Value {
    json!({"clientID": client_id, "x": 0.5, "y": 1.6, "z": -0.25, "username": "ada", "muralId": mural})
}

// =============================================================================
// COMMAND PATH
// =============================================================================

#[tokio::test]
async fn command_publish_persists_and_fans_out_to_all_including_sender() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (sender_conn, mut sender_rx) = test_helpers::attach_subscriber(&state, &["mural_1/broadcast"]).await;
    let (_, mut peer_rx) = test_helpers::attach_subscriber(&state, &["mural_1/broadcast"]).await;

    let text = publish_text("mural_1/cmd/c1", Qos::AtLeastOnce, add_payload([0.4, 0.4, 0.0]));
    let replies = handle_envelope(&state, sender_conn, &text).await;
    assert!(replies.is_empty(), "unexpected error replies: {replies:?}");

    for rx in [&mut sender_rx, &mut peer_rx] {
        let Envelope::Message { topic, payload } = recv_delivery(rx).await else {
            panic!("expected message delivery");
        };
        assert_eq!(topic, "mural_1/broadcast");
        let command = Command::from_value(payload).unwrap();
        let Command::Add(add) = command else { panic!("expected add") };
        assert!(!add.object.id.is_nil(), "broadcast must carry the assigned id");
    }

    assert_eq!(state.store.get(1, ChunkPos::new(0, 0)).unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_command_is_dropped_with_parse_error() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (conn, mut rx) = test_helpers::attach_subscriber(&state, &["mural_1/broadcast"]).await;

    let text = publish_text("mural_1/cmd/c1", Qos::AtLeastOnce, json!({"warp": {}}));
    let replies = handle_envelope(&state, conn, &text).await;

    assert!(matches!(&replies[..], [Envelope::Error { code, .. }] if code == "E_PARSE"));
    assert_no_delivery(&mut rx).await;
    assert!(state.store.fetch_mural(1).unwrap().is_empty());
}

#[tokio::test]
async fn inconsistent_delete_is_dropped_with_error() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (conn, mut rx) = test_helpers::attach_subscriber(&state, &["mural_1/broadcast"]).await;

    let payload = json!({"delete": {"id": uuid::Uuid::new_v4(), "chunk": {"x": 0, "y": 0}}});
    let replies = handle_envelope(&state, conn, &publish_text("mural_1/cmd/c1", Qos::AtLeastOnce, payload)).await;

    assert!(matches!(&replies[..], [Envelope::Error { code, .. }] if code == "E_CONSISTENCY"));
    assert_no_delivery(&mut rx).await;
}

#[tokio::test]
async fn unknown_mural_publish_is_rejected() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let conn = uuid::Uuid::new_v4();

    let text = publish_text("mural_9/cmd/c1", Qos::AtLeastOnce, add_payload([0.0, 0.0, 0.0]));
    let replies = handle_envelope(&state, conn, &text).await;
    assert!(matches!(&replies[..], [Envelope::Error { code, .. }] if code == "E_UNKNOWN_MURAL"));
}

#[tokio::test]
async fn client_cannot_publish_to_broadcast_topic() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let replies = handle_envelope(
        &state,
        uuid::Uuid::new_v4(),
        &publish_text("mural_1/broadcast", Qos::AtLeastOnce, json!({})),
    )
    .await;
    assert!(matches!(&replies[..], [Envelope::Error { code, .. }] if code == "E_TOPIC"));
}

#[tokio::test]
async fn invalid_json_yields_parse_error() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let replies = handle_envelope(&state, uuid::Uuid::new_v4(), "{not json").await;
    assert!(matches!(&replies[..], [Envelope::Error { code, .. }] if code == "E_PARSE"));
}

// =============================================================================
// AVATAR PATH
// =============================================================================

#[tokio::test]
async fn avatar_update_fans_out_without_persisting() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (sender_conn, _sender_rx) = test_helpers::attach_subscriber(&state, &[]).await;
    let (_, mut watcher_rx) = test_helpers::attach_subscriber(&state, &["mural_1/avatar/+"]).await;

    let text = publish_text("mural_1/avatar/update", Qos::AtMostOnce, avatar_payload("c1", 1));
    let replies = handle_envelope(&state, sender_conn, &text).await;
    assert!(replies.is_empty());

    let Envelope::Message { topic, payload } = recv_delivery(&mut watcher_rx).await else {
        panic!("expected avatar delivery");
    };
    assert_eq!(topic, "mural_1/avatar/update");
    assert_eq!(AvatarData::from_value(payload).unwrap().client_id, "c1");

    assert!(state.store.fetch_mural(1).unwrap().is_empty(), "avatar traffic must not persist");
}

#[tokio::test]
async fn avatar_with_mismatched_mural_is_dropped() {
    let (state, _dir) = test_helpers::test_app_state(&[1, 2]);
    let (_, mut watcher_rx) = test_helpers::attach_subscriber(&state, &["mural_1/avatar/+"]).await;

    // Payload claims mural 2 but rides mural 1's topic.
    let text = publish_text("mural_1/avatar/update", Qos::AtMostOnce, avatar_payload("c1", 2));
    let replies = handle_envelope(&state, uuid::Uuid::new_v4(), &text).await;
    assert!(replies.is_empty());
    assert_no_delivery(&mut watcher_rx).await;
}

#[tokio::test]
async fn avatar_disconnect_reaches_subscribers() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (_, mut watcher_rx) = test_helpers::attach_subscriber(&state, &["mural_1/avatar/disconnect"]).await;

    let text = publish_text("mural_1/avatar/disconnect", Qos::AtMostOnce, avatar_payload("c1", 1));
    handle_envelope(&state, uuid::Uuid::new_v4(), &text).await;

    let Envelope::Message { topic, .. } = recv_delivery(&mut watcher_rx).await else {
        panic!("expected disconnect delivery");
    };
    assert_eq!(topic, "mural_1/avatar/disconnect");
}

// =============================================================================
// OVERFLOW
// =============================================================================

/// Stuff a subscriber's delivery queue to capacity without draining it.
async fn fill_queue(state: &AppState, conn_id: uuid::Uuid) {
    let tx = state.subscribers.read().await.get(&conn_id).unwrap().tx.clone();
    for _ in 0..state.config.subscriber_queue {
        tx.try_send(Envelope::Message {
            topic: "mural_1/broadcast".into(),
            payload: serde_json::json!({}),
        })
        .unwrap();
    }
}

#[tokio::test]
async fn lagging_subscriber_is_dropped_rather_than_missing_a_mutation() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (laggard, mut laggard_rx) = test_helpers::attach_subscriber(&state, &["mural_1/broadcast"]).await;
    let (_, mut healthy_rx) = test_helpers::attach_subscriber(&state, &["mural_1/broadcast"]).await;
    fill_queue(&state, laggard).await;

    let text = publish_text("mural_1/cmd/c1", Qos::AtLeastOnce, add_payload([0.4, 0.4, 0.0]));
    let replies = handle_envelope(&state, uuid::Uuid::new_v4(), &text).await;
    assert!(replies.is_empty(), "unexpected error replies: {replies:?}");

    // The mutation persisted and reached the healthy subscriber.
    assert!(matches!(recv_delivery(&mut healthy_rx).await, Envelope::Message { .. }));
    assert_eq!(state.store.get(1, ChunkPos::new(0, 0)).unwrap().len(), 1);

    // The laggard was disconnected, never left holding a silent gap: its
    // channel closes after the already-queued backlog drains.
    assert!(!state.subscribers.read().await.contains_key(&laggard));
    for _ in 0..state.config.subscriber_queue {
        assert!(laggard_rx.recv().await.is_some());
    }
    assert!(laggard_rx.recv().await.is_none());
}

#[tokio::test]
async fn best_effort_overflow_keeps_the_subscriber() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (conn, _rx) = test_helpers::attach_subscriber(&state, &["mural_1/avatar/+"]).await;
    fill_queue(&state, conn).await;

    let text = publish_text("mural_1/avatar/update", Qos::AtMostOnce, avatar_payload("c1", 1));
    let replies = handle_envelope(&state, uuid::Uuid::new_v4(), &text).await;
    assert!(replies.is_empty());

    // Position loss is superseded by the next update; the connection stays.
    assert!(state.subscribers.read().await.contains_key(&conn));
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

#[tokio::test]
async fn subscribe_then_unsubscribe_controls_delivery() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (conn, mut rx) = test_helpers::attach_subscriber(&state, &[]).await;

    handle_envelope(&state, conn, &Envelope::Subscribe { topic: "mural_1/broadcast".into() }.encode()).await;
    broadcast(&state, "mural_1/broadcast", json!({"n": 1}), Qos::AtLeastOnce).await;
    assert!(matches!(recv_delivery(&mut rx).await, Envelope::Message { .. }));

    handle_envelope(&state, conn, &Envelope::Unsubscribe { topic: "mural_1/broadcast".into() }.encode()).await;
    broadcast(&state, "mural_1/broadcast", json!({"n": 2}), Qos::AtLeastOnce).await;
    assert_no_delivery(&mut rx).await;
}

#[tokio::test]
async fn subscribe_to_unknown_mural_is_rejected() {
    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let (conn, _rx) = test_helpers::attach_subscriber(&state, &[]).await;

    let replies =
        handle_envelope(&state, conn, &Envelope::Subscribe { topic: "mural_7/broadcast".into() }.encode()).await;
    assert!(matches!(&replies[..], [Envelope::Error { code, .. }] if code == "E_UNKNOWN_MURAL"));
}

#[tokio::test]
async fn cross_mural_subscription_receives_nothing() {
    let (state, _dir) = test_helpers::test_app_state(&[1, 2]);
    let (sender, mut rx_one) = test_helpers::attach_subscriber(&state, &["mural_1/broadcast"]).await;
    let (_, mut rx_two) = test_helpers::attach_subscriber(&state, &["mural_2/broadcast"]).await;

    let text = publish_text("mural_1/cmd/c1", Qos::AtLeastOnce, add_payload([0.1, 0.1, 0.0]));
    handle_envelope(&state, sender, &text).await;

    assert!(matches!(recv_delivery(&mut rx_one).await, Envelope::Message { .. }));
    assert_no_delivery(&mut rx_two).await;
}

// =============================================================================
// SOCKET ROUND TRIP
// =============================================================================

#[tokio::test]
async fn ws_round_trip_over_real_socket() {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite;

    let (state, _dir) = test_helpers::test_app_state(&[1]);
    let app = crate::routes::app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("ws connect");

    let subscribe = Envelope::Subscribe { topic: "mural_1/broadcast".into() }.encode();
    ws.send(tungstenite::Message::Text(subscribe.into())).await.unwrap();

    let publish = publish_text("mural_1/cmd/c1", Qos::AtLeastOnce, add_payload([0.3, 0.7, 0.0]));
    ws.send(tungstenite::Message::Text(publish.into())).await.unwrap();

    let delivered = timeout(Duration::from_secs(2), async {
        loop {
            let msg = ws.next().await.expect("socket closed").expect("socket error");
            if let tungstenite::Message::Text(text) = msg {
                if let Ok(Envelope::Message { topic, payload }) = Envelope::decode(text.as_str()) {
                    return (topic, payload);
                }
            }
        }
    })
    .await
    .expect("no broadcast within deadline");

    assert_eq!(delivered.0, "mural_1/broadcast");
    let Command::Add(add) = Command::from_value(delivered.1).unwrap() else {
        panic!("expected add");
    };
    assert!(!add.object.id.is_nil());
}
