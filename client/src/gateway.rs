//! Broker gateway — the client end of the pub-sub WebSocket.
//!
//! DESIGN
//! ======
//! `Gateway::connect` establishes the socket, then hands it to a background
//! task that owns the connection for the gateway's lifetime:
//! - Outbound envelopes flow through a bounded channel into the socket
//! - Inbound `message` envelopes are dispatched to every registered handler
//!   whose pattern matches the topic
//! - On connection loss the task reconnects with jittered exponential
//!   backoff, re-sends all subscriptions, and flushes writes queued while
//!   offline
//!
//! QUALITY OF SERVICE
//! ==================
//! A publish while disconnected is queued (bounded) when the caller asked
//! for at-least-once, and refused outright for at-most-once — the next
//! periodic avatar update supersedes the lost one anyway.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};

use protocol::avatar::AvatarData;
use protocol::command::Command;
use protocol::envelope::{Envelope, ErrorCode, Qos};
use protocol::topic;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// =============================================================================
// PUBLIC SURFACE
// =============================================================================

/// Callback for broker deliveries. One handler per subscription pattern;
/// a delivery matching several patterns reaches each of their handlers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, topic: &str, payload: serde_json::Value);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// Terminal: closed by the caller or reconnect attempts exhausted.
    Closed,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bound on both the outbound channel and the offline queue.
    pub queue_capacity: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(10),
            max_reconnect_attempts: 12,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("broker connect failed: {0}")]
    Connect(String),
    #[error("not connected; best-effort publish dropped")]
    NotConnected,
    #[error("outbound queue full")]
    QueueFull,
    #[error("gateway closed")]
    Closed,
    #[error(transparent)]
    Encode(#[from] protocol::ParseError),
}

impl ErrorCode for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "E_CONNECT",
            Self::NotConnected => "E_NOT_CONNECTED",
            Self::QueueFull => "E_QUEUE_FULL",
            Self::Closed => "E_CLOSED",
            Self::Encode(_) => "E_PARSE",
        }
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

struct Inner {
    endpoint: String,
    config: GatewayConfig,
    subscriptions: RwLock<Vec<(String, Arc<dyn MessageHandler>)>>,
    /// At-least-once publishes accepted while disconnected.
    pending: Mutex<VecDeque<Envelope>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Inner {
    async fn enqueue_pending(&self, envelope: Envelope) -> Result<(), GatewayError> {
        let mut pending = self.pending.lock().await;
        if pending.len() >= self.config.queue_capacity {
            return Err(GatewayError::QueueFull);
        }
        pending.push_back(envelope);
        Ok(())
    }
}

pub struct Gateway {
    inner: Arc<Inner>,
    outbound_tx: mpsc::Sender<Envelope>,
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
}

impl Gateway {
    /// Connect to a broker endpoint (`ws://host:port/ws`) and spawn the
    /// connection task. The first connect is not retried; reconnection
    /// after a later loss is.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Connect`] if the initial handshake fails.
    pub async fn connect(
        endpoint: impl Into<String>,
        config: GatewayConfig,
    ) -> Result<Self, GatewayError> {
        let endpoint = endpoint.into();
        let (ws, _) = connect_async(&endpoint)
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        info!(endpoint, "gateway: connected");

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity);

        let inner = Arc::new(Inner {
            endpoint,
            config,
            subscriptions: RwLock::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            status_tx,
        });
        tokio::spawn(run(inner.clone(), ws, outbound_rx, shutdown_rx));

        Ok(Self { inner, outbound_tx, status_rx, shutdown_tx })
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch handle for status transitions, for UIs that surface
    /// connectivity.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Register a handler for a topic pattern (`+` wildcard allowed in any
    /// segment but the mural head). Subscriptions survive reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::QueueFull`] if the subscribe frame cannot be
    /// queued right now; the registration itself always takes effect.
    pub async fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), GatewayError> {
        let pattern = pattern.into();
        self.inner
            .subscriptions
            .write()
            .await
            .push((pattern.clone(), handler));
        if self.status() == ConnectionStatus::Connected {
            self.outbound_tx
                .try_send(Envelope::Subscribe { topic: pattern })
                .map_err(|_| GatewayError::QueueFull)?;
        }
        Ok(())
    }

    /// Publish a payload to a concrete topic.
    ///
    /// # Errors
    ///
    /// [`GatewayError::QueueFull`] when the outbound (or offline) queue is at
    /// capacity, [`GatewayError::NotConnected`] for an at-most-once publish
    /// while disconnected, [`GatewayError::Closed`] once the gateway is
    /// terminal.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        qos: Qos,
        payload: serde_json::Value,
    ) -> Result<(), GatewayError> {
        if self.status() == ConnectionStatus::Closed {
            return Err(GatewayError::Closed);
        }
        let envelope = Envelope::Publish { topic: topic.into(), qos, payload };
        if self.status() == ConnectionStatus::Connected {
            return self.outbound_tx.try_send(envelope).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => GatewayError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => GatewayError::Closed,
            });
        }
        match qos {
            Qos::AtMostOnce => Err(GatewayError::NotConnected),
            Qos::AtLeastOnce => self.inner.enqueue_pending(envelope).await,
        }
    }

    /// Submit a drawing mutation on this client's command topic
    /// (at-least-once).
    ///
    /// # Errors
    ///
    /// See [`Gateway::publish`].
    pub async fn submit_command(
        &self,
        mural: u32,
        client_id: &str,
        command: &Command,
    ) -> Result<(), GatewayError> {
        let payload = command.to_value()?;
        self.publish(topic::cmd(mural, client_id), Qos::AtLeastOnce, payload)
            .await
    }

    /// Submit a position heartbeat (at-most-once).
    ///
    /// # Errors
    ///
    /// See [`Gateway::publish`].
    pub async fn submit_avatar_update(&self, avatar: &AvatarData) -> Result<(), GatewayError> {
        let payload = avatar.to_value()?;
        self.publish(topic::avatar_update(avatar.mural_id), Qos::AtMostOnce, payload)
            .await
    }

    /// Announce departure from a mural so peers drop the avatar immediately
    /// instead of waiting out the heartbeat timeout.
    ///
    /// # Errors
    ///
    /// See [`Gateway::publish`].
    pub async fn submit_avatar_disconnect(&self, avatar: &AvatarData) -> Result<(), GatewayError> {
        let payload = avatar.to_value()?;
        self.publish(topic::avatar_disconnect(avatar.mural_id), Qos::AtMostOnce, payload)
            .await
    }

    /// Close the socket and stop the connection task. Idempotent.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

async fn run(
    inner: Arc<Inner>,
    first: WsStream,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut socket = Some(first);
    loop {
        let ws = match socket.take() {
            Some(ws) => ws,
            None => match reconnect(&inner, &mut shutdown_rx).await {
                Some(ws) => ws,
                None => {
                    let _ = inner.status_tx.send(ConnectionStatus::Closed);
                    return;
                }
            },
        };
        let _ = inner.status_tx.send(ConnectionStatus::Connected);

        run_connection(&inner, ws, &mut outbound_rx, &mut shutdown_rx).await;

        if *shutdown_rx.borrow() {
            let _ = inner.status_tx.send(ConnectionStatus::Closed);
            return;
        }
        let _ = inner.status_tx.send(ConnectionStatus::Disconnected);
        warn!(endpoint = %inner.endpoint, "gateway: connection lost");
    }
}

async fn reconnect(inner: &Inner, shutdown_rx: &mut watch::Receiver<bool>) -> Option<WsStream> {
    let _ = inner.status_tx.send(ConnectionStatus::Connecting);
    for attempt in 0..inner.config.max_reconnect_attempts {
        let delay = jittered(backoff_delay(
            attempt,
            inner.config.backoff_base,
            inner.config.backoff_cap,
        ));
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => return None,
        }
        if *shutdown_rx.borrow() {
            return None;
        }
        match connect_async(&inner.endpoint).await {
            Ok((ws, _)) => {
                info!(endpoint = %inner.endpoint, attempt, "gateway: reconnected");
                return Some(ws);
            }
            Err(e) => warn!(error = %e, attempt, "gateway: reconnect attempt failed"),
        }
    }
    warn!(endpoint = %inner.endpoint, "gateway: reconnect attempts exhausted");
    None
}

/// Drive one established connection until it drops or shutdown is signaled.
async fn run_connection(
    inner: &Inner,
    ws: WsStream,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut stream) = ws.split();

    // Re-register every subscription, then flush publishes queued offline.
    let patterns: Vec<String> = {
        let subscriptions = inner.subscriptions.read().await;
        subscriptions.iter().map(|(p, _)| p.clone()).collect()
    };
    for pattern in patterns {
        if send(&mut sink, &Envelope::Subscribe { topic: pattern }).await.is_err() {
            return;
        }
    }
    loop {
        let queued = inner.pending.lock().await.pop_front();
        let Some(envelope) = queued else { break };
        if send(&mut sink, &envelope).await.is_err() {
            // Keep it for the next connection.
            inner.pending.lock().await.push_front(envelope);
            return;
        }
    }

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatch(inner, text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "gateway: socket error");
                        return;
                    }
                }
            }
            envelope = outbound_rx.recv() => {
                let Some(envelope) = envelope else { return };
                if send(&mut sink, &envelope).await.is_err() {
                    return;
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

async fn send(sink: &mut WsSink, envelope: &Envelope) -> Result<(), ()> {
    sink.send(Message::Text(envelope.encode().into()))
        .await
        .map_err(|e| {
            warn!(error = %e, "gateway: send failed");
        })
}

/// Route one inbound frame to the handlers whose patterns match its topic.
async fn dispatch(inner: &Inner, text: &str) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "gateway: undecodable frame dropped");
            return;
        }
    };
    match envelope {
        Envelope::Message { topic: message_topic, payload } => {
            // Snapshot matching handlers before awaiting them, so a handler
            // may itself subscribe without deadlocking.
            let handlers: Vec<Arc<dyn MessageHandler>> = {
                let subscriptions = inner.subscriptions.read().await;
                subscriptions
                    .iter()
                    .filter(|(pattern, _)| topic::matches(pattern, &message_topic))
                    .map(|(_, handler)| handler.clone())
                    .collect()
            };
            for handler in handlers {
                handler.on_message(&message_topic, payload.clone()).await;
            }
        }
        Envelope::Error { code, message } => warn!(code, message, "gateway: broker error"),
        Envelope::Subscribe { .. } | Envelope::Unsubscribe { .. } | Envelope::Publish { .. } => {}
    }
}

// =============================================================================
// BACKOFF
// =============================================================================

fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(cap)
}

/// Up to +25% so simultaneous clients do not reconnect in lockstep.
fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(1.0 + rand::rng().random_range(0.0..0.25))
}

#[cfg(test)]
#[path = "gateway_test.rs"]
mod tests;
