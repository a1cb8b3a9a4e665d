//! Replication hub — applies mutations and fans them out to room members.
//!
//! DESIGN
//! ======
//! Durable mutations run through the entity store and are broadcast while the
//! room's writer handle is still held, so every member sees events in commit
//! order. Joins register and snapshot under that same handle; no committed
//! event can land between a joiner's snapshot and its first broadcast.
//!
//! Fan-out never waits on a member while the handle is held. A member that
//! cannot keep up is evicted from the room and must rejoin with a resync.
//!
//! Drags never touch the store. They are forwarded best-effort to the rest of
//! the room and carry no ordering promise relative to durable events.
//!
//! A room stays in memory only while it has members. Once the last member
//! leaves, or a request touches a room nobody is in, the cached copy is
//! evicted.
//!
//! The originating connection is excluded from the broadcast of its own
//! mutation because it already gets the result as a direct reply. Receivers
//! reconcile idempotently, so a duplicate would be harmless anyway.

pub mod registry;

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::event::ReplicationEvent;
use crate::frame::Frame;
use crate::model::{NewNote, Note, NotePatch, Room};
use crate::store::repo::NoteRepo;
use crate::store::{EntityStore, StoreError};
use registry::{ConnId, RoomRegistry};

pub struct ReplicationHub {
    store: EntityStore,
    registry: RoomRegistry,
}

impl ReplicationHub {
    #[must_use]
    pub fn new(repo: Arc<dyn NoteRepo>) -> Self {
        Self { store: EntityStore::new(repo), registry: RoomRegistry::new() }
    }

    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Register a connection in a room and return the room's snapshot.
    ///
    /// # Errors
    ///
    /// Returns `RoomNotFound` if the room does not exist, or `Database` if it
    /// could not be loaded.
    pub async fn join(&self, conn: ConnId, room_id: Uuid, tx: mpsc::Sender<Frame>) -> Result<Vec<Note>, StoreError> {
        let handle = self.store.room(room_id).await?;
        let previous = self.registry.join(conn, room_id, tx).await;
        let notes = handle.list();
        drop(handle);

        info!(%conn, %room_id, ?previous, count = notes.len(), "connection joined room");
        if let Some(previous) = previous {
            self.release_if_idle(previous).await;
        }
        Ok(notes)
    }

    /// Returns false if the connection was not a member of the room.
    pub async fn leave(&self, conn: ConnId, room_id: Uuid) -> bool {
        let left = self.registry.leave(conn, room_id).await;
        if left {
            info!(%conn, %room_id, "connection left room");
            self.release_if_idle(room_id).await;
        }
        left
    }

    pub async fn disconnect(&self, conn: ConnId) {
        if let Some(room_id) = self.registry.disconnect(conn).await {
            info!(%conn, %room_id, "connection dropped from room");
            self.release_if_idle(room_id).await;
        }
    }

    /// Fires when `conn` is evicted for falling behind.
    pub async fn eviction_signal(&self, conn: ConnId) -> Arc<Notify> {
        self.registry.eviction_signal(conn).await
    }

    /// Evict the room's cached state if no connection is in it.
    async fn release_if_idle(&self, room_id: Uuid) {
        let registry = &self.registry;
        self.store
            .evict_if(room_id, || async move { registry.member_count(room_id).await == 0 })
            .await;
    }

    // =========================================================================
    // ROOMS
    // =========================================================================

    /// # Errors
    ///
    /// Returns `Database` if the insert fails.
    pub async fn create_room(&self, name: &str) -> Result<Room, StoreError> {
        let room = self.store.create_room(name).await?;
        info!(room_id = %room.id, name = %room.name, "room created");
        Ok(room)
    }

    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    pub async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.store.list_rooms().await
    }

    /// Room metadata plus its current notes.
    ///
    /// # Errors
    ///
    /// Returns `RoomNotFound` if the room does not exist.
    pub async fn snapshot(&self, room_id: Uuid) -> Result<(Room, Vec<Note>), StoreError> {
        let result = async {
            let handle = self.store.room(room_id).await?;
            Ok::<_, StoreError>((handle.room().clone(), handle.list()))
        }
        .await;
        self.release_if_idle(room_id).await;
        result
    }

    // =========================================================================
    // DURABLE MUTATIONS
    // =========================================================================

    /// Create a note and broadcast `note_created`.
    ///
    /// # Errors
    ///
    /// Propagates store errors; nothing is broadcast on failure.
    pub async fn create_note(&self, room_id: Uuid, fields: NewNote, origin: Option<ConnId>) -> Result<Note, StoreError> {
        let result = async {
            let mut handle = self.store.room(room_id).await?;
            let note = handle.create(fields).await?;
            let event = ReplicationEvent::Created { room_id, note: note.clone() };
            self.registry.broadcast(room_id, &event.to_frame(), origin).await;
            Ok::<_, StoreError>(note)
        }
        .await;
        self.release_if_idle(room_id).await;

        let note = result?;
        debug!(%room_id, note_id = %note.id, ?origin, "note created");
        Ok(note)
    }

    /// Merge fields into a note and broadcast its full new state as
    /// `note_updated`.
    ///
    /// # Errors
    ///
    /// Propagates store errors; nothing is broadcast on failure.
    pub async fn update_note(
        &self,
        room_id: Uuid,
        note_id: Uuid,
        patch: &NotePatch,
        origin: Option<ConnId>,
    ) -> Result<Note, StoreError> {
        let result = async {
            let mut handle = self.store.room(room_id).await?;
            let note = handle.update(note_id, patch).await?;
            let event = ReplicationEvent::updated(&note);
            self.registry.broadcast(room_id, &event.to_frame(), origin).await;
            Ok::<_, StoreError>(note)
        }
        .await;
        self.release_if_idle(room_id).await;

        let note = result?;
        debug!(%room_id, %note_id, ?origin, "note updated");
        Ok(note)
    }

    /// Delete a note and broadcast `note_deleted`, even when the note was
    /// already gone.
    ///
    /// # Errors
    ///
    /// Propagates store errors; nothing is broadcast on failure.
    pub async fn delete_note(&self, room_id: Uuid, note_id: Uuid, origin: Option<ConnId>) -> Result<(), StoreError> {
        let result = async {
            let mut handle = self.store.room(room_id).await?;
            let existed = handle.delete(note_id).await?;
            let event = ReplicationEvent::Deleted { room_id, note_id };
            self.registry.broadcast(room_id, &event.to_frame(), origin).await;
            Ok::<_, StoreError>(existed)
        }
        .await;
        self.release_if_idle(room_id).await;

        let existed = result?;
        debug!(%room_id, %note_id, existed, ?origin, "note deleted");
        Ok(())
    }

    // =========================================================================
    // EPHEMERAL
    // =========================================================================

    /// Forward a live drag position to the rest of the room. Dropped unless
    /// `conn` is in `room_id` and the note is known there. Returns whether it
    /// was forwarded.
    pub async fn drag(&self, conn: ConnId, room_id: Uuid, note_id: Uuid, x: f64, y: f64) -> bool {
        if !self.registry.is_member(conn, room_id).await {
            return false;
        }
        if !self.store.knows(room_id, note_id).await {
            return false;
        }

        let frame = ReplicationEvent::Dragging { room_id, note_id, x, y }
            .to_frame()
            .with_from(conn.to_string());
        self.registry.broadcast_lossy(room_id, &frame, Some(conn)).await;
        true
    }
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
