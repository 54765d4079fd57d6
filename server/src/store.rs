//! Chunk store — rocksdb-backed persistence for drawing objects.
//!
//! DESIGN
//! ======
//! One database holds every mural, isolated purely by key prefixing: keys are
//! `"{mural}:{x},{y}"`, values are the serialized list of objects currently
//! live in that chunk. The engine allows exactly one open handle per path
//! (a LOCK file guards it), so the process opens once at startup and shares
//! the handle. Reads return owned buffers; no caller ever holds an
//! engine-owned allocation.
//!
//! ERROR HANDLING
//! ==============
//! An absent key is an empty chunk, not an error. Engine I/O failures and
//! undecodable values surface as `StoreError` for the caller to decide on —
//! the store never retries silently.

use std::path::Path;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options};

use protocol::command::{ChunkPos, ObjectRecord};
use protocol::envelope::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage engine error: {0}")]
    Engine(String),
    #[error("corrupt chunk value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Engine(err.to_string())
    }
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Engine(_) => "E_STORAGE",
            Self::Corrupt { .. } => "E_CORRUPT",
        }
    }
}

/// Persistent key-value engine storing per-chunk object lists.
pub struct ChunkStore {
    db: DBWithThreadMode<MultiThreaded>,
}

// =============================================================================
// KEY ENCODING
// =============================================================================

/// Chunk key: `"{mural}:{x},{y}"`. Injective (the `:` separator cannot occur
/// inside either component) and prefix-scannable per mural.
#[must_use]
pub fn chunk_key(mural: u32, pos: ChunkPos) -> String {
    format!("{mural}:{pos}")
}

/// Prefix owned by one mural; every key of that mural and no other starts
/// with it.
#[must_use]
pub fn key_prefix(mural: u32) -> String {
    format!("{mural}:")
}

// =============================================================================
// STORE
// =============================================================================

impl ChunkStore {
    /// Open (creating if missing) the store at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the path is inaccessible or already held by another handle.
    /// Fatal at startup by policy.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&options, path)?;
        Ok(Self { db })
    }

    /// Read one chunk. Absent keys read as an empty list.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on I/O failure, `Corrupt` if the stored value does
    /// not decode.
    pub fn get(&self, mural: u32, pos: ChunkPos) -> Result<Vec<ObjectRecord>, StoreError> {
        let key = chunk_key(mural, pos);
        let Some(bytes) = self.db.get(key.as_bytes())? else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt { key, reason: e.to_string() })
    }

    /// Write one chunk's full object list.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on I/O failure.
    pub fn put(&self, mural: u32, pos: ChunkPos, records: &[ObjectRecord]) -> Result<(), StoreError> {
        let key = chunk_key(mural, pos);
        let bytes = serde_json::to_vec(records)
            .map_err(|e| StoreError::Corrupt { key: key.clone(), reason: e.to_string() })?;
        self.db.put(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Remove a chunk key entirely. Emptied chunks are deleted rather than
    /// kept as empty lists; `get` reports both states identically.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on I/O failure.
    pub fn delete(&self, mural: u32, pos: ChunkPos) -> Result<(), StoreError> {
        self.db.delete(chunk_key(mural, pos).as_bytes())?;
        Ok(())
    }

    /// All chunks of one mural, by forward prefix iteration. Used to build
    /// the full-scene snapshot on mural entry.
    ///
    /// # Errors
    ///
    /// Returns `Engine` on iterator failure, `Corrupt` on undecodable keys
    /// or values.
    pub fn fetch_mural(&self, mural: u32) -> Result<Vec<(ChunkPos, Vec<ObjectRecord>)>, StoreError> {
        let prefix = key_prefix(mural);
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        let mut chunks = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key_str = String::from_utf8_lossy(&key).into_owned();
            let pos: ChunkPos = key_str[prefix.len()..]
                .parse()
                .map_err(|e: protocol::command::ChunkPosParse| StoreError::Corrupt {
                    key: key_str.clone(),
                    reason: e.to_string(),
                })?;
            let records: Vec<ObjectRecord> = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Corrupt { key: key_str.clone(), reason: e.to_string() })?;
            chunks.push((pos, records));
        }
        Ok(chunks)
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
