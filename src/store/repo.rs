//! Durable backing for the entity store.
//!
//! ARCHITECTURE
//! ============
//! `NoteRepo` is the seam between the in-memory room maps and whatever
//! actually keeps the data. `PgRepo` is the production implementation;
//! `MemoryRepo` backs tests and database-less development runs.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{Media, MediaKind, Note, Room};

#[async_trait]
pub trait NoteRepo: Send + Sync {
    async fn insert_room(&self, room: &Room) -> Result<(), sqlx::Error>;

    /// All rooms, oldest first.
    async fn list_rooms(&self) -> Result<Vec<Room>, sqlx::Error>;

    async fn get_room(&self, room_id: Uuid) -> Result<Option<Room>, sqlx::Error>;

    async fn load_notes(&self, room_id: Uuid) -> Result<Vec<Note>, sqlx::Error>;

    /// Insert or fully overwrite one note.
    async fn upsert_note(&self, note: &Note) -> Result<(), sqlx::Error>;

    /// Remove one note. Absent ids are not an error.
    async fn delete_note(&self, room_id: Uuid, note_id: Uuid) -> Result<(), sqlx::Error>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgRepo {
    pool: PgPool,
}

impl PgRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type NoteRow = (Uuid, Uuid, f64, f64, f64, f64, String, String, Option<String>, Option<String>);

fn row_to_note(row: NoteRow) -> Note {
    let (id, room_id, x, y, width, height, color, content, media_kind, media_url) = row;
    let media = match (media_kind.as_deref().and_then(MediaKind::parse), media_url) {
        (Some(kind), Some(url)) => Some(Media { kind, url }),
        _ => None,
    };
    Note { id, room_id, x, y, width, height, color, content, media }
}

#[async_trait]
impl NoteRepo for PgRepo {
    async fn insert_room(&self, room: &Room) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO rooms (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(room.id)
            .bind(&room.name)
            .bind(room.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (Uuid, String, i64)>(
            "SELECT id, name, created_at FROM rooms ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, created_at)| Room { id, name, created_at })
            .collect())
    }

    async fn get_room(&self, room_id: Uuid) -> Result<Option<Room>, sqlx::Error> {
        let row = sqlx::query_as::<_, (Uuid, String, i64)>("SELECT id, name, created_at FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name, created_at)| Room { id, name, created_at }))
    }

    async fn load_notes(&self, room_id: Uuid) -> Result<Vec<Note>, sqlx::Error> {
        let rows = sqlx::query_as::<_, NoteRow>(
            "SELECT id, room_id, x, y, width, height, color, content, media_kind, media_url \
             FROM notes WHERE room_id = $1",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_note).collect())
    }

    async fn upsert_note(&self, note: &Note) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO notes (id, room_id, x, y, width, height, color, content, media_kind, media_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
                 x = EXCLUDED.x, y = EXCLUDED.y, width = EXCLUDED.width, height = EXCLUDED.height, \
                 color = EXCLUDED.color, content = EXCLUDED.content, \
                 media_kind = EXCLUDED.media_kind, media_url = EXCLUDED.media_url",
        )
        .bind(note.id)
        .bind(note.room_id)
        .bind(note.x)
        .bind(note.y)
        .bind(note.width)
        .bind(note.height)
        .bind(&note.color)
        .bind(&note.content)
        .bind(note.media.as_ref().map(|m| m.kind.as_str()))
        .bind(note.media.as_ref().map(|m| m.url.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_note(&self, room_id: Uuid, note_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM notes WHERE room_id = $1 AND id = $2")
            .bind(room_id)
            .bind(note_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Default)]
struct Tables {
    rooms: HashMap<Uuid, Room>,
    notes: HashMap<Uuid, HashMap<Uuid, Note>>,
}

/// Process-local repository. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryRepo {
    tables: RwLock<Tables>,
}

impl MemoryRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The persisted copy of a note, bypassing any cache above this repo.
    pub async fn stored_note(&self, room_id: Uuid, note_id: Uuid) -> Option<Note> {
        let tables = self.tables.read().await;
        tables
            .notes
            .get(&room_id)
            .and_then(|notes| notes.get(&note_id))
            .cloned()
    }
}

#[async_trait]
impl NoteRepo for MemoryRepo {
    async fn insert_room(&self, room: &Room) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.write().await;
        tables.rooms.insert(room.id, room.clone());
        tables.notes.entry(room.id).or_default();
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, sqlx::Error> {
        let tables = self.tables.read().await;
        let mut rooms = tables.rooms.values().cloned().collect::<Vec<_>>();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }

    async fn get_room(&self, room_id: Uuid) -> Result<Option<Room>, sqlx::Error> {
        Ok(self.tables.read().await.rooms.get(&room_id).cloned())
    }

    async fn load_notes(&self, room_id: Uuid) -> Result<Vec<Note>, sqlx::Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .notes
            .get(&room_id)
            .map(|notes| notes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_note(&self, note: &Note) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.write().await;
        tables
            .notes
            .entry(note.room_id)
            .or_default()
            .insert(note.id, note.clone());
        Ok(())
    }

    async fn delete_note(&self, room_id: Uuid, note_id: Uuid) -> Result<(), sqlx::Error> {
        let mut tables = self.tables.write().await;
        if let Some(notes) = tables.notes.get_mut(&room_id) {
            notes.remove(&note_id);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "repo_test.rs"]
mod tests;
