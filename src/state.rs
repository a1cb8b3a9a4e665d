//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the replication hub, which owns the entity store and the room
//! registry, plus the per-connection tuning the WebSocket handler needs.

use std::sync::Arc;

use crate::config::DEFAULT_WS_OUTBOUND_CAPACITY;
use crate::hub::ReplicationHub;
use crate::store::repo::NoteRepo;

/// Shared application state. Clone is required by Axum; inner fields are
/// Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ReplicationHub>,
    pub ws_outbound_capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(repo: Arc<dyn NoteRepo>) -> Self {
        Self { hub: Arc::new(ReplicationHub::new(repo)), ws_outbound_capacity: DEFAULT_WS_OUTBOUND_CAPACITY }
    }

    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.ws_outbound_capacity = capacity.max(1);
        self
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use uuid::Uuid;

    use super::*;
    use crate::model::{NewNote, Note};
    use crate::store::repo::MemoryRepo;

    /// App state backed by the in-process repo.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(Arc::new(MemoryRepo::new()))
    }

    /// Create an empty room and return its ID.
    pub async fn seed_room(state: &AppState) -> Uuid {
        state
            .hub
            .create_room("Test Room")
            .await
            .expect("seed room")
            .id
    }

    /// Create a note at a position without notifying anyone.
    pub async fn seed_note(state: &AppState, room_id: Uuid, x: f64, y: f64) -> Note {
        state
            .hub
            .store()
            .create(room_id, NewNote::at(x, y))
            .await
            .expect("seed note")
    }
}
