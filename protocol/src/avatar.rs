//! Avatar presence records — ephemeral, never persisted.

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// One client's position and identity, published at roughly 10 Hz on the
/// avatar topic. Doubles as the heartbeat: receipt refreshes liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarData {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub username: String,
    #[serde(rename = "muralId")]
    pub mural_id: u32,
}

impl AvatarData {
    #[must_use]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Decode from an envelope payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if required fields are missing or mistyped.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ParseError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode into an envelope payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] on serializer failure (not expected for this type).
    pub fn to_value(&self) -> Result<serde_json::Value, ParseError> {
        Ok(serde_json::to_value(self)?)
    }
}
