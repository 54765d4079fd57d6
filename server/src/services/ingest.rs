//! Command ingest — applies Add/Delete/Modify against the chunk store.
//!
//! DESIGN
//! ======
//! Each command runs its get-modify-put sequence under the per-chunk lock,
//! so commands touching the same chunk apply in arrival order while
//! unrelated chunks proceed concurrently. A Modify that crosses chunks
//! locks both keys in ascending order before touching either.
//!
//! Application is idempotent: re-applying an Add with an already-present id
//! replaces the record in place, so at-least-once redelivery converges
//! instead of duplicating objects.
//!
//! ERROR HANDLING
//! ==============
//! A Delete or Modify naming an object that is not in its stated chunk is a
//! `Consistency` error — the command is dropped whole (no partial update)
//! and the caller logs it. Storage failures surface unchanged.

use uuid::Uuid;

use protocol::command::{AddCommand, ChunkPos, Command, DeleteCommand, ModifyCommand};
use protocol::envelope::ErrorCode;

use crate::state::AppState;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("object {id} not present in chunk {chunk}")]
    Consistency { id: Uuid, chunk: ChunkPos },
}

impl ErrorCode for IngestError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.error_code(),
            Self::Consistency { .. } => "E_CONSISTENCY",
        }
    }
}

/// Apply one command to a mural's stored state. Returns the command to
/// rebroadcast — identical to the input except that an Add gains its
/// assigned object id.
///
/// # Errors
///
/// Returns `Consistency` for mutations naming unknown objects (drop + log at
/// the call site) and `Store` for engine failures.
pub async fn apply(state: &AppState, mural: u32, command: Command) -> Result<Command, IngestError> {
    match command {
        Command::Add(add) => apply_add(state, mural, add).await,
        Command::Delete(delete) => apply_delete(state, mural, delete).await,
        Command::Modify(modify) => apply_modify(state, mural, modify).await,
    }
}

// =============================================================================
// ADD
// =============================================================================

async fn apply_add(state: &AppState, mural: u32, mut add: AddCommand) -> Result<Command, IngestError> {
    if add.object.id.is_nil() {
        add.object.id = Uuid::new_v4();
    }
    let pos = ChunkPos::containing(add.object.transform.position, state.config.chunk_size);

    let lock = state.chunk_lock(mural, pos).await;
    let _guard = lock.lock().await;

    let mut records = state.store.get(mural, pos)?;
    match records.iter_mut().find(|r| r.id == add.object.id) {
        Some(existing) => *existing = add.object.clone(),
        None => records.push(add.object.clone()),
    }
    state.store.put(mural, pos, &records)?;

    tracing::info!(%mural, id = %add.object.id, chunk = %pos, "object added");
    Ok(Command::Add(add))
}

// =============================================================================
// DELETE
// =============================================================================

async fn apply_delete(state: &AppState, mural: u32, delete: DeleteCommand) -> Result<Command, IngestError> {
    let lock = state.chunk_lock(mural, delete.chunk).await;
    let _guard = lock.lock().await;

    let mut records = state.store.get(mural, delete.chunk)?;
    let before = records.len();
    records.retain(|r| r.id != delete.id);
    if records.len() == before {
        return Err(IngestError::Consistency { id: delete.id, chunk: delete.chunk });
    }

    if records.is_empty() {
        state.store.delete(mural, delete.chunk)?;
    } else {
        state.store.put(mural, delete.chunk, &records)?;
    }

    tracing::info!(%mural, id = %delete.id, chunk = %delete.chunk, "object deleted");
    Ok(Command::Delete(delete))
}

// =============================================================================
// MODIFY
// =============================================================================

async fn apply_modify(state: &AppState, mural: u32, modify: ModifyCommand) -> Result<Command, IngestError> {
    if modify.from == modify.to {
        return modify_in_place(state, mural, modify).await;
    }

    // Cross-chunk move: hold both chunk locks, acquired in ascending key
    // order so two concurrent moves between the same pair cannot deadlock.
    let (first, second) = if modify.from < modify.to {
        (modify.from, modify.to)
    } else {
        (modify.to, modify.from)
    };
    let first_lock = state.chunk_lock(mural, first).await;
    let second_lock = state.chunk_lock(mural, second).await;
    let _first_guard = first_lock.lock().await;
    let _second_guard = second_lock.lock().await;

    let mut source = state.store.get(mural, modify.from)?;
    let Some(index) = source.iter().position(|r| r.id == modify.id) else {
        return Err(IngestError::Consistency { id: modify.id, chunk: modify.from });
    };
    let mut moved = source.remove(index);
    moved.transform = modify.transform;

    let mut destination = state.store.get(mural, modify.to)?;
    match destination.iter_mut().find(|r| r.id == modify.id) {
        Some(existing) => *existing = moved,
        None => destination.push(moved),
    }

    // Destination is written before the source: a failure in between leaves
    // a duplicate, never a lost record.
    state.store.put(mural, modify.to, &destination)?;
    if source.is_empty() {
        state.store.delete(mural, modify.from)?;
    } else {
        state.store.put(mural, modify.from, &source)?;
    }

    tracing::info!(%mural, id = %modify.id, from = %modify.from, to = %modify.to, "object moved");
    Ok(Command::Modify(modify))
}

async fn modify_in_place(state: &AppState, mural: u32, modify: ModifyCommand) -> Result<Command, IngestError> {
    let lock = state.chunk_lock(mural, modify.from).await;
    let _guard = lock.lock().await;

    let mut records = state.store.get(mural, modify.from)?;
    let Some(record) = records.iter_mut().find(|r| r.id == modify.id) else {
        return Err(IngestError::Consistency { id: modify.id, chunk: modify.from });
    };
    record.transform = modify.transform;
    state.store.put(mural, modify.from, &records)?;

    tracing::info!(%mural, id = %modify.id, chunk = %modify.from, "object transform updated");
    Ok(Command::Modify(modify))
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod tests;
