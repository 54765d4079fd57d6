//! Server configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STORE_PATH: &str = "./mural-data";
pub const DEFAULT_MURALS: &str = "1";
pub const DEFAULT_CHUNK_SIZE: f32 = protocol::command::DEFAULT_CHUNK_SIZE;
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port for the WebSocket/HTTP listener.
    pub port: u16,
    /// Filesystem path for the chunk store. One process per path.
    pub store_path: PathBuf,
    /// Active murals served by this process.
    pub murals: Vec<u32>,
    /// Spatial cell edge length used to map positions to chunks.
    pub chunk_size: f32,
    /// Per-connection outbound envelope buffer.
    pub subscriber_queue: usize,
}

impl ServerConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: listener port, default 3000
    /// - `STORE_PATH`: chunk store directory, default `./mural-data`
    /// - `MURALS`: comma-separated mural ids, default `1`
    /// - `CHUNK_SIZE`: cell edge length in meters, default 1.0
    /// - `SUBSCRIBER_QUEUE`: outbound buffer per connection, default 256
    #[must_use]
    pub fn from_env() -> Self {
        let murals_raw = std::env::var("MURALS").unwrap_or_else(|_| DEFAULT_MURALS.to_string());
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            store_path: std::env::var("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH)),
            murals: parse_murals(&murals_raw),
            chunk_size: env_parse("CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            subscriber_queue: env_parse("SUBSCRIBER_QUEUE", DEFAULT_SUBSCRIBER_QUEUE),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated mural id list, skipping malformed entries with a
/// warning rather than refusing to start.
fn parse_murals(raw: &str) -> Vec<u32> {
    let mut murals = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.parse::<u32>() {
            Ok(id) => murals.push(id),
            Err(_) => tracing::warn!(entry = part, "ignoring malformed MURALS entry"),
        }
    }
    murals
}
