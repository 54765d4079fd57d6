//! Topic naming and pattern matching for the pub-sub transport.
//!
//! DESIGN
//! ======
//! Topics are slash-separated and namespaced by mural:
//!
//! - `mural_{id}/cmd/{clientId}` — drawing commands, client → server
//! - `mural_{id}/broadcast`      — state fan-out, server → clients
//! - `mural_{id}/avatar/update`  — ~10 Hz position traffic
//! - `mural_{id}/avatar/disconnect` — explicit leave notice
//!
//! Matching is segment-wise with `+` as a single-segment wildcard, so
//! `mural_1/cmd/+` matches commands from any client of mural 1 and can never
//! match `mural_11/...` — mural namespaces are disjoint by construction.

/// Single-segment wildcard usable in subscription patterns.
pub const WILDCARD: &str = "+";

/// Inbound command topic for one client of one mural.
#[must_use]
pub fn cmd(mural: u32, client_id: &str) -> String {
    format!("mural_{mural}/cmd/{client_id}")
}

/// Broadcast topic carrying authoritative state for one mural.
#[must_use]
pub fn broadcast(mural: u32) -> String {
    format!("mural_{mural}/broadcast")
}

/// Avatar position topic for one mural.
#[must_use]
pub fn avatar_update(mural: u32) -> String {
    format!("mural_{mural}/avatar/update")
}

/// Explicit-leave topic for one mural.
#[must_use]
pub fn avatar_disconnect(mural: u32) -> String {
    format!("mural_{mural}/avatar/disconnect")
}

// =============================================================================
// PARSING
// =============================================================================

/// A concrete (wildcard-free) topic, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Cmd { mural: u32, client_id: String },
    Broadcast { mural: u32 },
    AvatarUpdate { mural: u32 },
    AvatarDisconnect { mural: u32 },
}

impl Topic {
    /// Classify a raw topic string.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError`] for anything outside the four recognized forms.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        let err = || TopicError(raw.to_string());
        let mut segments = raw.split('/');

        let head = segments.next().ok_or_else(err)?;
        let mural: u32 = head.strip_prefix("mural_").ok_or_else(err)?.parse().map_err(|_| err())?;

        let topic = match (segments.next(), segments.next(), segments.next()) {
            (Some("cmd"), Some(client_id), None) if !client_id.is_empty() => {
                Self::Cmd { mural, client_id: client_id.to_string() }
            }
            (Some("broadcast"), None, None) => Self::Broadcast { mural },
            (Some("avatar"), Some("update"), None) => Self::AvatarUpdate { mural },
            (Some("avatar"), Some("disconnect"), None) => Self::AvatarDisconnect { mural },
            _ => return Err(err()),
        };
        Ok(topic)
    }

    /// Mural this topic belongs to.
    #[must_use]
    pub fn mural(&self) -> u32 {
        match self {
            Self::Cmd { mural, .. }
            | Self::Broadcast { mural }
            | Self::AvatarUpdate { mural }
            | Self::AvatarDisconnect { mural } => *mural,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized topic: {0:?}")]
pub struct TopicError(String);

impl crate::envelope::ErrorCode for TopicError {
    fn error_code(&self) -> &'static str {
        "E_TOPIC"
    }
}

// =============================================================================
// MATCHING
// =============================================================================

/// Segment-wise topic matching; `+` in the pattern matches exactly one
/// segment. No multi-level wildcard exists.
#[must_use]
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_segments = pattern.split('/');
    let mut topic_segments = topic.split('/');

    loop {
        match (pattern_segments.next(), topic_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(t)) if p == WILDCARD || p == t => {}
            _ => return false,
        }
    }
}
