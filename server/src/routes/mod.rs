//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The broker surface is one WebSocket endpoint at `/ws`; the only HTTP API
//! is the mural snapshot used on mural entry, plus a health probe.

pub mod murals;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/api/murals/{id}/chunks", get(murals::fetch_mural))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
