//! Room and note REST routes.
//!
//! Mutations made here go through the replication hub with no origin
//! connection, so every WebSocket member of the room receives the event.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::model::{NewNote, Note, NotePatch, Room, RoomSnapshot, ValidationError, body_to_data};
use crate::state::AppState;
use crate::store::StoreError;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Store(StoreError::RoomNotFound(_) | StoreError::NoteNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.error_code(),
            Self::Validation(e) => e.error_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "code": self.code(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// BODIES
// =============================================================================

#[derive(Deserialize)]
pub struct CreateRoomBody {
    pub name: Option<String>,
}

// =============================================================================
// ROOMS
// =============================================================================

/// `GET /api/rooms` — every room, oldest first.
pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<Vec<Room>>, ApiError> {
    Ok(Json(state.hub.list_rooms().await?))
}

/// `POST /api/rooms` — create a room.
pub async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomBody>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let room = state
        .hub
        .create_room(body.name.as_deref().unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// `GET /api/rooms/:room_id` — room metadata plus its notes.
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomSnapshot>, ApiError> {
    let (room, notes) = state.hub.snapshot(room_id).await?;
    Ok(Json(RoomSnapshot { room_id: room.id, name: room.name, notes }))
}

// =============================================================================
// NOTES
// =============================================================================

/// `POST /api/rooms/:room_id/notes` — create a note.
pub async fn create_note(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Note>), ApiError> {
    let fields = NewNote::from_data(&body_to_data(body)?)?;
    let note = state.hub.create_note(room_id, fields, None).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// `PUT /api/rooms/:room_id/notes/:note_id` — merge fields into a note.
pub async fn update_note(
    State(state): State<AppState>,
    Path((room_id, note_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<Note>, ApiError> {
    let patch = NotePatch::from_data(&body_to_data(body)?)?;
    let note = state.hub.update_note(room_id, note_id, &patch, None).await?;
    Ok(Json(note))
}

/// `DELETE /api/rooms/:room_id/notes/:note_id` — idempotent delete. An
/// unknown room has nothing to delete and also answers 204.
pub async fn delete_note(
    State(state): State<AppState>,
    Path((room_id, note_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    match state.hub.delete_note(room_id, note_id, None).await {
        Ok(()) | Err(StoreError::RoomNotFound(_)) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
