//! WebSocket broker endpoint — topic pub-sub over one bidirectional socket.
//!
//! DESIGN
//! ======
//! On upgrade, the connection registers in the subscriber table and enters a
//! `select!` loop:
//! - Inbound envelopes → `handle_envelope`, which owns subscription changes,
//!   command ingest, and fan-out
//! - Deliveries queued by peers' publishes → forwarded to the socket
//!
//! Handler logic is transport-free: `handle_envelope` takes text in and
//! returns the envelopes owed to the sender, so tests drive it without
//! sockets.
//!
//! QUALITY OF SERVICE
//! ==================
//! Commands (at-least-once) are ingested before fan-out and produce an error
//! envelope on failure. Avatar traffic (at-most-once) is fanned out with
//! `try_send` — a full subscriber queue drops the update, which the next
//! periodic update supersedes. A subscriber whose queue overflows on
//! at-least-once traffic is disconnected instead: a client must never
//! silently miss a mutation, and on reconnect it resyncs from the snapshot
//! endpoint.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use protocol::avatar::AvatarData;
use protocol::command::Command;
use protocol::envelope::{Envelope, Qos};
use protocol::topic::{self, Topic};

use crate::services::ingest;
use crate::state::{AppState, Subscriber};

// =============================================================================
// UPGRADE / CONNECTION
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Envelope>(state.config.subscriber_queue);

    state
        .subscribers
        .write()
        .await
        .insert(conn_id, Subscriber { patterns: std::collections::HashSet::new(), tx });
    info!(%conn_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for envelope in handle_envelope(&state, conn_id, text.as_str()).await {
                            let _ = send_envelope(&mut socket, &envelope).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            envelope = rx.recv() => {
                // A closed channel means the broadcast path dropped this
                // connection as lagging; close the socket so the client
                // reconnects and resyncs.
                let Some(envelope) = envelope else { break };
                if send_envelope(&mut socket, &envelope).await.is_err() {
                    break;
                }
            }
        }
    }

    state.subscribers.write().await.remove(&conn_id);
    info!(%conn_id, "ws: client disconnected");
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), ()> {
    socket
        .send(Message::Text(envelope.encode().into()))
        .await
        .map_err(|_| ())
}

// =============================================================================
// ENVELOPE DISPATCH
// =============================================================================

/// Process one inbound text frame; returns envelopes owed to the sender.
/// Fan-out to peers happens inside.
pub(crate) async fn handle_envelope(state: &AppState, conn_id: Uuid, text: &str) -> Vec<Envelope> {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(%conn_id, error = %e, "ws: invalid inbound envelope");
            return vec![Envelope::error_from(&e)];
        }
    };

    match envelope {
        Envelope::Subscribe { topic } => handle_subscribe(state, conn_id, topic).await,
        Envelope::Unsubscribe { topic } => {
            if let Some(subscriber) = state.subscribers.write().await.get_mut(&conn_id) {
                subscriber.patterns.remove(&topic);
            }
            vec![]
        }
        Envelope::Publish { topic, qos, payload } => handle_publish(state, conn_id, &topic, qos, payload).await,
        Envelope::Message { .. } | Envelope::Error { .. } => {
            warn!(%conn_id, "ws: ignoring broker-only envelope from client");
            vec![]
        }
    }
}

async fn handle_subscribe(state: &AppState, conn_id: Uuid, pattern: String) -> Vec<Envelope> {
    // The mural segment of a pattern is never a wildcard; reject
    // subscriptions to murals this process does not serve.
    match pattern_mural(&pattern) {
        Some(mural) if state.registry.contains(mural) => {
            if let Some(subscriber) = state.subscribers.write().await.get_mut(&conn_id) {
                info!(%conn_id, pattern, "ws: subscribed");
                subscriber.patterns.insert(pattern);
            }
            vec![]
        }
        Some(mural) => {
            let err = crate::registry::RegistryError::UnknownMural(mural);
            warn!(%conn_id, pattern, "ws: subscribe to unknown mural");
            vec![Envelope::error_from(&err)]
        }
        None => {
            let err = protocol::topic::Topic::parse(&pattern).err();
            warn!(%conn_id, pattern, "ws: unparseable subscription pattern");
            err.map_or_else(Vec::new, |e| vec![Envelope::error_from(&e)])
        }
    }
}

/// Extract the mural id from a topic or pattern head segment.
fn pattern_mural(pattern: &str) -> Option<u32> {
    pattern
        .split('/')
        .next()
        .and_then(|head| head.strip_prefix("mural_"))
        .and_then(|id| id.parse().ok())
}

// =============================================================================
// PUBLISH
// =============================================================================

async fn handle_publish(
    state: &AppState,
    conn_id: Uuid,
    raw_topic: &str,
    qos: Qos,
    payload: serde_json::Value,
) -> Vec<Envelope> {
    let topic = match Topic::parse(raw_topic) {
        Ok(topic) => topic,
        Err(e) => {
            warn!(%conn_id, topic = raw_topic, "ws: publish to unrecognized topic");
            return vec![Envelope::error_from(&e)];
        }
    };

    if let Err(e) = state.registry.resolve(topic.mural()) {
        warn!(%conn_id, topic = raw_topic, mural = topic.mural(), "ws: publish to unknown mural");
        return vec![Envelope::error_from(&e)];
    }

    match topic {
        Topic::Cmd { mural, .. } => handle_command(state, conn_id, mural, payload).await,
        Topic::AvatarUpdate { mural } | Topic::AvatarDisconnect { mural } => {
            // Ephemeral path: validate shape, never persist, loss tolerated.
            match AvatarData::from_value(payload.clone()) {
                Ok(avatar) if avatar.mural_id != mural => {
                    warn!(%conn_id, topic = raw_topic, payload_mural = avatar.mural_id, "ws: avatar mural mismatch; dropped");
                }
                Ok(_) => broadcast(state, raw_topic, payload, Qos::AtMostOnce).await,
                Err(e) => warn!(%conn_id, error = %e, "ws: malformed avatar payload; dropped"),
            }
            vec![]
        }
        Topic::Broadcast { .. } => {
            warn!(%conn_id, topic = raw_topic, "ws: client publish to broadcast topic rejected");
            vec![Envelope::Error {
                code: "E_TOPIC".into(),
                message: "broadcast topics are server-originated".into(),
            }]
        }
    }
}

async fn handle_command(
    state: &AppState,
    conn_id: Uuid,
    mural: u32,
    payload: serde_json::Value,
) -> Vec<Envelope> {
    let command = match Command::from_value(payload) {
        Ok(command) => command,
        Err(e) => {
            warn!(%conn_id, %mural, error = %e, "ws: malformed command; dropped");
            return vec![Envelope::error_from(&e)];
        }
    };

    match ingest::apply(state, mural, command).await {
        Ok(applied) => {
            match applied.to_value() {
                Ok(payload) => {
                    // Rebroadcast to every subscriber of the mural's
                    // broadcast topic, the originator included — dedup by
                    // client id happens client-side.
                    broadcast(state, &topic::broadcast(mural), payload, Qos::AtLeastOnce).await;
                }
                Err(e) => warn!(%mural, error = %e, "ws: applied command failed to re-encode"),
            }
            vec![]
        }
        Err(e @ ingest::IngestError::Consistency { .. }) => {
            warn!(%conn_id, %mural, error = %e, "ws: inconsistent command; dropped");
            vec![Envelope::error_from(&e)]
        }
        Err(e) => {
            tracing::error!(%conn_id, %mural, error = %e, "ws: command ingest failed");
            vec![Envelope::error_from(&e)]
        }
    }
}

// =============================================================================
// FAN-OUT
// =============================================================================

/// Deliver a payload to every connection whose patterns match `topic`.
/// At-most-once overflow drops the delivery; at-least-once overflow drops
/// the connection, since a subscriber that silently misses a mutation holds
/// corrupt state until it resyncs.
pub(crate) async fn broadcast(state: &AppState, topic: &str, payload: serde_json::Value, qos: Qos) {
    let mut lagging = Vec::new();
    {
        let subscribers = state.subscribers.read().await;
        for (conn_id, subscriber) in subscribers.iter() {
            if !subscriber.patterns.iter().any(|p| topic::matches(p, topic)) {
                continue;
            }
            let envelope = Envelope::Message { topic: topic.to_string(), payload: payload.clone() };
            if subscriber.tx.try_send(envelope).is_err() && qos == Qos::AtLeastOnce {
                lagging.push(*conn_id);
            }
        }
    }

    if !lagging.is_empty() {
        // Dropping the Subscriber closes its channel; the connection loop
        // sees the closure, hangs up, and the client resyncs via the
        // snapshot endpoint on reconnect.
        let mut subscribers = state.subscribers.write().await;
        for conn_id in lagging {
            warn!(%conn_id, topic, "ws: queue full on reliable delivery; dropping connection");
            subscribers.remove(&conn_id);
        }
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
