//! Entity store — authoritative note state, one writer per room.
//!
//! DESIGN
//! ======
//! Each room's notes live in memory behind their own async mutex and are
//! hydrated from the repo on first access. A `RoomHandle` owns that mutex
//! guard, so whoever holds one is the room's only writer until it is
//! dropped. That gives every room a total commit order; separate rooms never
//! contend.
//!
//! Writes go to the repo first and touch the in-memory map only after the
//! repo accepted them. A failed write leaves the cached room exactly as it
//! was. Because the repo is always current, a cached room can be evicted at
//! any time and rehydrated later. Eviction retires the room under its writer
//! lock; a handle acquired on a retired room is thrown away and the room is
//! loaded again.
//!
//! Each cached room also keeps an index of its note ids behind a separate
//! lock, so drag validation never waits on the writer.

pub mod repo;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::frame::now_ms;
use crate::model::{DEFAULT_ROOM_NAME, NewNote, Note, NotePatch, Room};
use repo::NoteRepo;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room not found: {0}")]
    RoomNotFound(Uuid),
    #[error("note not found: {0}")]
    NoteNotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "E_ROOM_NOT_FOUND",
            Self::NoteNotFound(_) => "E_NOTE_NOT_FOUND",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Live state of one room.
struct RoomNotes {
    room: Room,
    notes: HashMap<Uuid, Note>,
    retired: bool,
}

/// One cached room.
struct LiveRoom {
    notes: Arc<Mutex<RoomNotes>>,
    ids: RwLock<HashSet<Uuid>>,
}

impl LiveRoom {
    fn new(room: Room, notes: HashMap<Uuid, Note>) -> Self {
        let ids = notes.keys().copied().collect();
        Self { notes: Arc::new(Mutex::new(RoomNotes { room, notes, retired: false })), ids: RwLock::new(ids) }
    }
}

// =============================================================================
// ROOM HANDLE
// =============================================================================

/// Exclusive write access to one room. Mutations are serialized by holding it.
pub struct RoomHandle {
    guard: OwnedMutexGuard<RoomNotes>,
    live: Arc<LiveRoom>,
    repo: Arc<dyn NoteRepo>,
}

impl RoomHandle {
    #[must_use]
    pub fn room(&self) -> &Room {
        &self.guard.room
    }

    #[must_use]
    pub fn get(&self, note_id: Uuid) -> Option<&Note> {
        self.guard.notes.get(&note_id)
    }

    /// Current snapshot. Order carries no meaning.
    #[must_use]
    pub fn list(&self) -> Vec<Note> {
        self.guard.notes.values().cloned().collect()
    }

    /// Allocate an id, apply fields over defaults, persist.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the repo rejects the write.
    pub async fn create(&mut self, fields: NewNote) -> Result<Note, StoreError> {
        let note = Note::from_new(Uuid::new_v4(), self.guard.room.id, fields);
        self.repo.upsert_note(&note).await?;
        self.guard.notes.insert(note.id, note.clone());
        self.live.ids.write().await.insert(note.id);
        Ok(note)
    }

    /// Shallow-merge the supplied fields into an existing note, persist.
    ///
    /// # Errors
    ///
    /// Returns `NoteNotFound` if the note is not in this room, or `Database`
    /// if the repo rejects the write.
    pub async fn update(&mut self, note_id: Uuid, patch: &NotePatch) -> Result<Note, StoreError> {
        let mut note = self
            .guard
            .notes
            .get(&note_id)
            .cloned()
            .ok_or(StoreError::NoteNotFound(note_id))?;
        note.apply(patch);
        self.repo.upsert_note(&note).await?;
        self.guard.notes.insert(note_id, note.clone());
        Ok(note)
    }

    /// Remove a note. Absent ids succeed. Returns whether a note was removed.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the repo rejects the delete.
    pub async fn delete(&mut self, note_id: Uuid) -> Result<bool, StoreError> {
        self.repo.delete_note(self.guard.room.id, note_id).await?;
        self.live.ids.write().await.remove(&note_id);
        Ok(self.guard.notes.remove(&note_id).is_some())
    }
}

// =============================================================================
// STORE
// =============================================================================

pub struct EntityStore {
    repo: Arc<dyn NoteRepo>,
    rooms: RwLock<HashMap<Uuid, Arc<LiveRoom>>>,
}

impl EntityStore {
    #[must_use]
    pub fn new(repo: Arc<dyn NoteRepo>) -> Self {
        Self { repo, rooms: RwLock::new(HashMap::new()) }
    }

    /// Create a room. A blank name falls back to the default. The room is
    /// not cached until something needs its notes.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the insert fails.
    pub async fn create_room(&self, name: &str) -> Result<Room, StoreError> {
        let trimmed = name.trim();
        let room = Room {
            id: Uuid::new_v4(),
            name: if trimmed.is_empty() { DEFAULT_ROOM_NAME.to_owned() } else { trimmed.to_owned() },
            created_at: now_ms(),
        };
        self.repo.insert_room(&room).await?;
        Ok(room)
    }

    /// All rooms, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    pub async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.repo.list_rooms().await?)
    }

    /// Acquire the room's writer handle, hydrating it on first access.
    /// Waits while another writer holds the room.
    ///
    /// # Errors
    ///
    /// Returns `RoomNotFound` if the room does not exist, or `Database` if
    /// hydration fails.
    pub async fn room(&self, room_id: Uuid) -> Result<RoomHandle, StoreError> {
        loop {
            let live = self.live_room(room_id).await?;
            let guard = Arc::clone(&live.notes).lock_owned().await;
            if guard.retired {
                continue;
            }
            return Ok(RoomHandle { guard, live, repo: Arc::clone(&self.repo) });
        }
    }

    /// Whether a note is currently known in an already-loaded room. Never
    /// hydrates, never touches the repo, and never waits on the writer.
    pub async fn knows(&self, room_id: Uuid, note_id: Uuid) -> bool {
        let Some(live) = self.cached(room_id).await else {
            return false;
        };
        live.ids.read().await.contains(&note_id)
    }

    /// Evict a cached room if `idle` still holds once the room's writer lock
    /// is taken. Returns whether the room was evicted.
    pub async fn evict_if<F, Fut>(&self, room_id: Uuid, idle: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let Some(live) = self.cached(room_id).await else {
            return false;
        };
        let mut guard = live.notes.lock().await;
        if guard.retired || !idle().await {
            return false;
        }
        guard.retired = true;

        let mut rooms = self.rooms.write().await;
        if rooms.get(&room_id).is_some_and(|current| Arc::ptr_eq(current, &live)) {
            rooms.remove(&room_id);
        }
        info!(%room_id, remaining = rooms.len(), "evicted room from memory");
        true
    }

    /// Number of rooms currently held in memory.
    pub async fn cached_rooms(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn cached(&self, room_id: Uuid) -> Option<Arc<LiveRoom>> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    /// # Errors
    ///
    /// See [`RoomHandle::create`] and [`EntityStore::room`].
    pub async fn create(&self, room_id: Uuid, fields: NewNote) -> Result<Note, StoreError> {
        self.room(room_id).await?.create(fields).await
    }

    /// # Errors
    ///
    /// See [`RoomHandle::update`] and [`EntityStore::room`].
    pub async fn update(&self, room_id: Uuid, note_id: Uuid, patch: &NotePatch) -> Result<Note, StoreError> {
        self.room(room_id).await?.update(note_id, patch).await
    }

    /// # Errors
    ///
    /// See [`RoomHandle::delete`] and [`EntityStore::room`].
    pub async fn delete(&self, room_id: Uuid, note_id: Uuid) -> Result<(), StoreError> {
        self.room(room_id).await?.delete(note_id).await.map(|_| ())
    }

    /// # Errors
    ///
    /// See [`EntityStore::room`].
    pub async fn list(&self, room_id: Uuid) -> Result<Vec<Note>, StoreError> {
        Ok(self.room(room_id).await?.list())
    }

    async fn live_room(&self, room_id: Uuid) -> Result<Arc<LiveRoom>, StoreError> {
        if let Some(live) = self.cached(room_id).await {
            return Ok(live);
        }

        // Hydrate outside the map lock; keep whichever copy lands first.
        let room = self
            .repo
            .get_room(room_id)
            .await?
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let notes = self
            .repo
            .load_notes(room_id)
            .await?
            .into_iter()
            .map(|note| (note.id, note))
            .collect::<HashMap<_, _>>();

        let mut rooms = self.rooms.write().await;
        let live = rooms.entry(room_id).or_insert_with(|| {
            info!(%room_id, count = notes.len(), "hydrated room from repo");
            Arc::new(LiveRoom::new(room, notes))
        });
        Ok(Arc::clone(live))
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
