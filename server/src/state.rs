//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the single chunk-store handle, the mural registry, the live
//! subscriber table, and the per-chunk lock map that serializes
//! get-modify-put sequences without stalling unrelated chunks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use protocol::command::ChunkPos;
use protocol::envelope::Envelope;

use crate::config::ServerConfig;
use crate::registry::MuralRegistry;
use crate::store::ChunkStore;

// =============================================================================
// SUBSCRIBERS
// =============================================================================

/// One live WebSocket connection: its subscription patterns and the sender
/// feeding its outbound loop.
pub struct Subscriber {
    pub patterns: HashSet<String>,
    pub tx: mpsc::Sender<Envelope>,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum — all inner fields
/// are Arc-wrapped or cheap.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ChunkStore>,
    pub registry: Arc<MuralRegistry>,
    pub config: ServerConfig,
    /// Live connections keyed by connection id.
    pub subscribers: Arc<RwLock<HashMap<Uuid, Subscriber>>>,
    /// Per-chunk mutexes, created lazily. Commands for the same chunk
    /// serialize here; different chunks proceed concurrently. Idle entries
    /// are pruned on acquisition, so the map is bounded by the number of
    /// chunks with in-flight commands, not by every chunk ever touched.
    chunk_locks: Arc<Mutex<HashMap<(u32, ChunkPos), Arc<Mutex<()>>>>>,
}

impl AppState {
    #[must_use]
    pub fn new(store: ChunkStore, registry: MuralRegistry, config: ServerConfig) -> Self {
        Self {
            store: Arc::new(store),
            registry: Arc::new(registry),
            config,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            chunk_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle to the mutex guarding one chunk's get-modify-put window.
    pub async fn chunk_lock(&self, mural: u32, pos: ChunkPos) -> Arc<Mutex<()>> {
        let mut locks = self.chunk_locks.lock().await;
        // A strong count of 1 means only the map holds the entry: no
        // command is using that chunk's lock anymore.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((mural, pos))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_helpers::test_app_state;

    #[tokio::test]
    async fn released_chunk_locks_are_pruned() {
        let (state, _dir) = test_app_state(&[1]);

        for x in 0..32 {
            let lock = state.chunk_lock(1, ChunkPos::new(x, 0)).await;
            let _guard = lock.lock().await;
        }

        // Every earlier handle was released, so at most the final
        // acquisition can still be resident.
        assert!(state.chunk_locks.lock().await.len() <= 1);
    }

    #[tokio::test]
    async fn held_chunk_locks_survive_pruning() {
        let (state, _dir) = test_app_state(&[1]);
        let held_key = (1, ChunkPos::new(7, 7));

        let held = state.chunk_lock(1, ChunkPos::new(7, 7)).await;
        let _guard = held.lock().await;

        let _other = state.chunk_lock(1, ChunkPos::new(8, 7)).await;
        assert!(state.chunk_locks.lock().await.contains_key(&held_key));
    }
}
