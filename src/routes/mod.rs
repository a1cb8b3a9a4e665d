//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the request/response API (`/api/rooms…`) and the push channel
//! (`/api/ws`) under one Axum router. Both reach the same replication hub,
//! so a mutation made over REST is broadcast to WebSocket members exactly
//! like one made over the socket.

pub mod rooms;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/api/rooms/{room_id}", get(rooms::get_room))
        .route("/api/rooms/{room_id}/notes", axum::routing::post(rooms::create_note))
        .route(
            "/api/rooms/{room_id}/notes/{note_id}",
            put(rooms::update_note).delete(rooms::delete_note),
        )
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
