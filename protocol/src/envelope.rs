//! Envelope — the universal message on the broker WebSocket wire.
//!
//! DESIGN
//! ======
//! Every frame exchanged with the broker is one JSON `Envelope`, tagged by
//! `op`. Clients send `subscribe`/`unsubscribe`/`publish`; the broker sends
//! `message` deliveries and `error` reports. Payloads are opaque
//! `serde_json::Value` at this layer — the broker routes on topic and never
//! needs to understand command internals to fan them out.

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Delivery guarantee requested for a publish.
///
/// Avatar/position traffic is `AtMostOnce` (loss is superseded by the next
/// periodic update). Drawing commands are `AtLeastOnce`; duplicates are
/// handled by idempotent application on ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

/// One message on the broker wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Envelope {
    /// Register interest in a topic. May use the `+` wildcard.
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    /// Client-originated traffic for one concrete topic.
    Publish {
        topic: String,
        #[serde(default)]
        qos: Qos,
        payload: serde_json::Value,
    },
    /// Broker → subscriber delivery.
    Message { topic: String, payload: serde_json::Value },
    /// Broker → client failure report for one inbound envelope.
    Error { code: String, message: String },
}

impl Envelope {
    /// Decode an envelope from wire text.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for malformed JSON or an unknown `op`.
    pub fn decode(text: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode for the wire. Infallible for the types this enum carries;
    /// falls back to an empty object on the (unreachable) serializer error.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Build an error envelope from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code().to_string(), message: err.to_string() }
    }
}

/// Grepable error code for structured error envelopes.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}
