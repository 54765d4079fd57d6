//! Shared wire model for the mural sync transport.
//!
//! This crate owns everything both `server` and `client` must agree on:
//! the broker envelope format, the drawing command tagged union, avatar
//! presence records, topic naming, and chunk coordinate math. Payloads stay
//! `serde_json` (field-named, human-readable) end to end — the chunk store
//! persists the same representation the wire carries.

pub mod avatar;
pub mod command;
pub mod envelope;
pub mod topic;

pub use avatar::AvatarData;
pub use command::{ChunkPos, Command, ObjectRecord, ToolKind, Transform};
pub use envelope::{Envelope, ErrorCode, Qos};
pub use topic::Topic;

/// A message that could not be decoded from its wire form.
///
/// Raised for malformed JSON, unknown command tags, and envelopes whose
/// payload does not match the expected shape. Per-message: the peer that sent
/// it gets an error, everyone else is unaffected.
#[derive(Debug, thiserror::Error)]
#[error("malformed message: {0}")]
pub struct ParseError(#[from] serde_json::Error);

impl ErrorCode for ParseError {
    fn error_code(&self) -> &'static str {
        "E_PARSE"
    }
}
