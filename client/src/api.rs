//! REST access to the server's snapshot endpoint.
//!
//! Clients fetch the full stored scene once on mural entry, then stay
//! current through the broadcast topic.

use serde::Deserialize;

use protocol::command::{ChunkPos, ObjectRecord};
use protocol::envelope::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown mural: {0}")]
    NotFound(u32),
    #[error("snapshot request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_UNKNOWN_MURAL",
            Self::Http(_) => "E_HTTP",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkSnapshot {
    pub chunk: ChunkPos,
    pub objects: Vec<ObjectRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MuralSnapshot {
    pub mural_id: u32,
    pub chunks: Vec<ChunkSnapshot>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// `base_url` is the server's HTTP root, e.g. `http://host:3000`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http: reqwest::Client::new(), base_url }
    }

    /// Fetch the full stored scene for one mural.
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] for a mural the server does not serve,
    /// [`ApiError::Http`] for transport or server failures.
    pub async fn fetch_mural(&self, mural: u32) -> Result<MuralSnapshot, ApiError> {
        let response = self.http.get(self.snapshot_url(mural)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(mural));
        }
        Ok(response.error_for_status()?.json().await?)
    }

    fn snapshot_url(&self, mural: u32) -> String {
        format!("{}/api/murals/{mural}/chunks", self.base_url)
    }
}
