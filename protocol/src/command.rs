//! Command — the drawing mutation model shared by every producer and consumer.
//!
//! DESIGN
//! ======
//! A `Command` is an externally tagged union over `{add, delete, modify}`,
//! each variant holding exactly one payload struct. External tagging means
//! the wire form is a single-key map (`{"add": {...}}`), so a message with
//! zero payloads, two payloads, or an unrecognized tag fails deserialization
//! outright — there is no way to construct a half-valid command.
//!
//! Object ids are the join key between in-memory client objects and the
//! persisted chunk records. They are assigned by the server on first Add
//! (a nil id means "not yet assigned") and are stable for the object's
//! lifetime.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ParseError;

/// Fixed spatial cell size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: f32 = 1.0;

// =============================================================================
// CHUNK COORDINATES
// =============================================================================

/// Integer address of one spatial cell within a mural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
}

impl ChunkPos {
    #[must_use]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chunk containing a world-space position, by floor division of its
    /// x and y components. The third component never affects placement.
    #[must_use]
    pub fn containing(position: [f32; 3], chunk_size: f32) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self {
            x: (position[0] / chunk_size).floor() as i32,
            y: (position[1] / chunk_size).floor() as i32,
        }
    }
}

impl std::fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl std::str::FromStr for ChunkPos {
    type Err = ChunkPosParse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((x, y)) = s.split_once(',') else {
            return Err(ChunkPosParse(s.to_string()));
        };
        let x = x.parse().map_err(|_| ChunkPosParse(s.to_string()))?;
        let y = y.parse().map_err(|_| ChunkPosParse(s.to_string()))?;
        Ok(Self { x, y })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid chunk coordinates: {0:?}")]
pub struct ChunkPosParse(String);

// =============================================================================
// OBJECT RECORDS
// =============================================================================

/// Position, orientation, and scale of one drawn object in shared space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: [f32; 3],
    /// Quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl Transform {
    /// Identity rotation and unit scale at a position.
    #[must_use]
    pub fn at(position: [f32; 3]) -> Self {
        Self { position, rotation: [0.0, 0.0, 0.0, 1.0], scale: [1.0, 1.0, 1.0] }
    }
}

/// Which drawing tool produced an object. Determines how `props` is
/// interpreted by the scene-reconstruction side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Brush,
    Line,
    Text,
    Image,
    Object,
}

/// One persisted drawing object: the unit stored in chunk values and carried
/// by Add commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Nil until the server assigns durable identity on ingest.
    #[serde(default)]
    pub id: Uuid,
    pub tool: ToolKind,
    pub transform: Transform,
    /// Tool-specific geometry/style payload, opaque to the sync layer.
    #[serde(default)]
    pub props: serde_json::Value,
}

// =============================================================================
// COMMANDS
// =============================================================================

/// A single drawing mutation exchanged between clients and server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Add(AddCommand),
    Delete(DeleteCommand),
    Modify(ModifyCommand),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddCommand {
    pub object: ObjectRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteCommand {
    pub id: Uuid,
    /// Chunk currently holding the object.
    pub chunk: ChunkPos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyCommand {
    pub id: Uuid,
    pub transform: Transform,
    /// Chunk the object lives in before the move.
    pub from: ChunkPos,
    /// Chunk the object lands in. Equal to `from` when no crossing occurs.
    pub to: ChunkPos,
}

impl Command {
    /// Decode a command from an envelope payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for unknown tags, missing fields, or a map
    /// carrying anything other than exactly one variant.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ParseError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode into an envelope payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the props value cannot be represented.
    pub fn to_value(&self) -> Result<serde_json::Value, ParseError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
#[path = "command_test.rs"]
mod tests;
