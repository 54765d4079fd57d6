//! Mural snapshot endpoint — the full stored scene for one mural.
//!
//! Clients call this once on mural entry, then stay current through the
//! broadcast topic.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;
use tracing::error;

use protocol::command::{ChunkPos, ObjectRecord};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ChunkSnapshot {
    pub chunk: ChunkPos,
    pub objects: Vec<ObjectRecord>,
}

#[derive(Debug, Serialize)]
pub struct MuralSnapshot {
    pub mural_id: u32,
    pub chunks: Vec<ChunkSnapshot>,
}

/// `GET /api/murals/{id}/chunks`
pub async fn fetch_mural(
    State(state): State<AppState>,
    Path(mural): Path<u32>,
) -> Result<Json<MuralSnapshot>, (StatusCode, Json<serde_json::Value>)> {
    if !state.registry.contains(mural) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"code": "E_UNKNOWN_MURAL", "message": format!("unknown mural: {mural}")})),
        ));
    }

    match state.store.fetch_mural(mural) {
        Ok(chunks) => Ok(Json(MuralSnapshot {
            mural_id: mural,
            chunks: chunks
                .into_iter()
                .map(|(chunk, objects)| ChunkSnapshot { chunk, objects })
                .collect(),
        })),
        Err(e) => {
            error!(error = %e, %mural, "mural snapshot read failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"code": "E_STORAGE", "message": e.to_string()})),
            ))
        }
    }
}
