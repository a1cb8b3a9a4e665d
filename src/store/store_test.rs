use std::sync::atomic::{AtomicBool, Ordering};

use super::*;
use crate::frame::ErrorCode;
use crate::model::{DEFAULT_COLOR, DEFAULT_HEIGHT, DEFAULT_WIDTH, Media, MediaKind};
use repo::MemoryRepo;

async fn store_with_room() -> (EntityStore, Uuid) {
    let store = EntityStore::new(Arc::new(MemoryRepo::new()));
    let room = store.create_room("Board").await.expect("create room");
    (store, room.id)
}

/// Delegates to a memory repo but fails note writes while `failing` is set.
#[derive(Default)]
struct FlakyRepo {
    inner: MemoryRepo,
    failing: AtomicBool,
}

impl FlakyRepo {
    fn check(&self) -> Result<(), sqlx::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NoteRepo for FlakyRepo {
    async fn insert_room(&self, room: &Room) -> Result<(), sqlx::Error> {
        self.inner.insert_room(room).await
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, sqlx::Error> {
        self.inner.list_rooms().await
    }

    async fn get_room(&self, room_id: Uuid) -> Result<Option<Room>, sqlx::Error> {
        self.inner.get_room(room_id).await
    }

    async fn load_notes(&self, room_id: Uuid) -> Result<Vec<Note>, sqlx::Error> {
        self.inner.load_notes(room_id).await
    }

    async fn upsert_note(&self, note: &Note) -> Result<(), sqlx::Error> {
        self.check()?;
        self.inner.upsert_note(note).await
    }

    async fn delete_note(&self, room_id: Uuid, note_id: Uuid) -> Result<(), sqlx::Error> {
        self.check()?;
        self.inner.delete_note(room_id, note_id).await
    }
}

// =============================================================================
// create
// =============================================================================

#[tokio::test]
async fn create_fills_defaults() {
    let (store, room_id) = store_with_room().await;
    let note = store
        .create(room_id, NewNote::at(10.0, 20.0))
        .await
        .expect("create");

    assert_eq!(note.room_id, room_id);
    assert_eq!(note.x, 10.0);
    assert_eq!(note.y, 20.0);
    assert_eq!(note.width, DEFAULT_WIDTH);
    assert_eq!(note.height, DEFAULT_HEIGHT);
    assert_eq!(note.color, DEFAULT_COLOR);
    assert_eq!(note.content, "");
    assert!(note.media.is_none());
}

#[tokio::test]
async fn create_assigns_distinct_ids() {
    let (store, room_id) = store_with_room().await;
    let a = store.create(room_id, NewNote::default()).await.expect("a");
    let b = store.create(room_id, NewNote::default()).await.expect("b");
    assert_ne!(a.id, b.id);
    assert_eq!(store.list(room_id).await.expect("list").len(), 2);
}

#[tokio::test]
async fn create_in_missing_room_is_room_not_found() {
    let store = EntityStore::new(Arc::new(MemoryRepo::new()));
    let missing = Uuid::new_v4();
    let err = store.create(missing, NewNote::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::RoomNotFound(id) if id == missing));
    assert_eq!(err.error_code(), "E_ROOM_NOT_FOUND");
}

// =============================================================================
// update
// =============================================================================

#[tokio::test]
async fn update_merges_only_supplied_fields() {
    let (store, room_id) = store_with_room().await;
    let note = store
        .create(room_id, NewNote { content: Some("hi".into()), color: Some("#fff".into()), ..NewNote::at(1.0, 2.0) })
        .await
        .expect("create");

    let patch = NotePatch { content: Some("Hello".into()), ..NotePatch::default() };
    let updated = store.update(room_id, note.id, &patch).await.expect("update");

    assert_eq!(updated.content, "Hello");
    assert_eq!(updated.color, "#fff");
    assert_eq!(updated.x, 1.0);
    assert_eq!(updated.y, 2.0);
}

#[tokio::test]
async fn update_can_clear_media() {
    let (store, room_id) = store_with_room().await;
    let media = Media { kind: MediaKind::Link, url: "https://example.com".into() };
    let note = store
        .create(room_id, NewNote { media: Some(media), ..NewNote::default() })
        .await
        .expect("create");
    assert!(note.media.is_some());

    let patch = NotePatch { media: Some(None), ..NotePatch::default() };
    let updated = store.update(room_id, note.id, &patch).await.expect("update");
    assert!(updated.media.is_none());
}

#[tokio::test]
async fn update_missing_note_is_not_found() {
    let (store, room_id) = store_with_room().await;
    let missing = Uuid::new_v4();
    let err = store
        .update(room_id, missing, &NotePatch::position(1.0, 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NoteNotFound(id) if id == missing));
    assert_eq!(err.error_code(), "E_NOTE_NOT_FOUND");
    assert!(!err.retryable());
}

#[tokio::test]
async fn update_note_from_another_room_is_not_found() {
    let (store, room_a) = store_with_room().await;
    let room_b = store.create_room("Other").await.expect("room b").id;
    let note = store.create(room_a, NewNote::default()).await.expect("create");

    let err = store
        .update(room_b, note.id, &NotePatch::position(5.0, 5.0))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NoteNotFound(_)));
}

// =============================================================================
// delete
// =============================================================================

#[tokio::test]
async fn delete_removes_note() {
    let (store, room_id) = store_with_room().await;
    let note = store.create(room_id, NewNote::default()).await.expect("create");

    store.delete(room_id, note.id).await.expect("delete");
    assert!(store.list(room_id).await.expect("list").is_empty());
}

#[tokio::test]
async fn delete_absent_note_is_noop() {
    let (store, room_id) = store_with_room().await;
    let kept = store.create(room_id, NewNote::default()).await.expect("create");

    store.delete(room_id, Uuid::new_v4()).await.expect("idempotent delete");
    let mut handle = store.room(room_id).await.expect("room");
    assert!(!handle.delete(Uuid::new_v4()).await.expect("delete"));
    assert_eq!(handle.list(), vec![kept]);
}

// =============================================================================
// ordering and durability
// =============================================================================

#[tokio::test]
async fn sequential_operations_define_final_state() {
    let (store, room_id) = store_with_room().await;
    let a = store.create(room_id, NewNote::at(0.0, 0.0)).await.expect("a");
    let b = store.create(room_id, NewNote::at(0.0, 0.0)).await.expect("b");

    store
        .update(room_id, a.id, &NotePatch::position(10.0, 10.0))
        .await
        .expect("move a");
    store
        .update(room_id, a.id, &NotePatch { content: Some("A".into()), ..NotePatch::default() })
        .await
        .expect("edit a");
    store.delete(room_id, b.id).await.expect("delete b");

    let notes = store.list(room_id).await.expect("list");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, a.id);
    assert_eq!((notes[0].x, notes[0].y), (10.0, 10.0));
    assert_eq!(notes[0].content, "A");
}

#[tokio::test]
async fn concurrent_writers_on_one_room_serialize() {
    let (store, room_id) = store_with_room().await;
    let store = Arc::new(store);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store.create(room_id, NewNote::at(f64::from(i), 0.0)).await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("create");
    }

    assert_eq!(store.list(room_id).await.expect("list").len(), 16);
}

#[tokio::test]
async fn writes_reach_the_repo() {
    let repo = Arc::new(MemoryRepo::new());
    let store = EntityStore::new(repo.clone());
    let room_id = store.create_room("r").await.expect("room").id;

    let note = store.create(room_id, NewNote::at(3.0, 4.0)).await.expect("create");
    assert_eq!(repo.stored_note(room_id, note.id).await, Some(note.clone()));

    store.delete(room_id, note.id).await.expect("delete");
    assert!(repo.stored_note(room_id, note.id).await.is_none());
}

#[tokio::test]
async fn failed_write_leaves_state_untouched() {
    let repo = Arc::new(FlakyRepo::default());
    let store = EntityStore::new(repo.clone());
    let room_id = store.create_room("r").await.expect("room").id;
    let note = store.create(room_id, NewNote::at(1.0, 1.0)).await.expect("create");

    repo.failing.store(true, Ordering::SeqCst);

    let err = store
        .update(room_id, note.id, &NotePatch::position(99.0, 99.0))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
    assert_eq!(err.error_code(), "E_DATABASE");
    assert!(err.retryable());

    assert!(store.create(room_id, NewNote::default()).await.is_err());
    assert!(store.delete(room_id, note.id).await.is_err());

    assert_eq!(store.list(room_id).await.expect("list"), vec![note]);
}

#[tokio::test]
async fn room_hydrates_from_repo_on_first_access() {
    let repo = Arc::new(MemoryRepo::new());
    let room = Room { id: Uuid::new_v4(), name: "persisted".into(), created_at: 1 };
    repo.insert_room(&room).await.expect("room");
    let note = Note::placeholder(Uuid::new_v4(), room.id);
    repo.upsert_note(&note).await.expect("note");

    let store = EntityStore::new(repo);
    assert!(!store.knows(room.id, note.id).await);

    let handle = store.room(room.id).await.expect("hydrate");
    assert_eq!(handle.room(), &room);
    assert_eq!(handle.get(note.id), Some(&note));
    drop(handle);

    assert!(store.knows(room.id, note.id).await);
}

// =============================================================================
// rooms
// =============================================================================

#[tokio::test]
async fn blank_room_name_uses_default() {
    let store = EntityStore::new(Arc::new(MemoryRepo::new()));
    let room = store.create_room("   ").await.expect("room");
    assert_eq!(room.name, DEFAULT_ROOM_NAME);
}

#[tokio::test]
async fn list_rooms_is_oldest_first() {
    let repo = Arc::new(MemoryRepo::new());
    let newer = Room { id: Uuid::new_v4(), name: "newer".into(), created_at: 200 };
    let older = Room { id: Uuid::new_v4(), name: "older".into(), created_at: 100 };
    repo.insert_room(&newer).await.expect("newer");
    repo.insert_room(&older).await.expect("older");

    let store = EntityStore::new(repo);
    let names = store
        .list_rooms()
        .await
        .expect("list")
        .into_iter()
        .map(|r| r.name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["older", "newer"]);
}

// =============================================================================
// knows / eviction
// =============================================================================

#[tokio::test]
async fn knows_does_not_wait_for_the_writer() {
    let (store, room_id) = store_with_room().await;
    let note = store.create(room_id, NewNote::default()).await.expect("create");

    let mut handle = store.room(room_id).await.expect("room");
    let known = tokio::time::timeout(std::time::Duration::from_millis(100), store.knows(room_id, note.id))
        .await
        .expect("knows blocked behind the writer");
    assert!(known);

    let deleted = handle.delete(note.id).await.expect("delete");
    assert!(deleted);
    assert!(!store.knows(room_id, note.id).await);
}

#[tokio::test]
async fn creating_a_room_does_not_cache_it() {
    let (store, room_id) = store_with_room().await;
    assert_eq!(store.cached_rooms().await, 0);

    store.list(room_id).await.expect("list");
    assert_eq!(store.cached_rooms().await, 1);
}

#[tokio::test]
async fn evict_if_honours_the_predicate() {
    let (store, room_id) = store_with_room().await;
    let note = store.create(room_id, NewNote::default()).await.expect("create");
    assert_eq!(store.cached_rooms().await, 1);

    assert!(!store.evict_if(room_id, || async { false }).await);
    assert_eq!(store.cached_rooms().await, 1);

    assert!(store.evict_if(room_id, || async { true }).await);
    assert_eq!(store.cached_rooms().await, 0);
    assert!(!store.knows(room_id, note.id).await);
    assert!(!store.evict_if(room_id, || async { true }).await);

    assert_eq!(store.list(room_id).await.expect("list"), vec![note]);
}

#[tokio::test]
async fn eviction_waits_for_the_writer_and_keeps_its_commit() {
    let (store, room_id) = store_with_room().await;
    let store = Arc::new(store);
    let mut handle = store.room(room_id).await.expect("room");

    let evicting = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.evict_if(room_id, || async { true }).await })
    };
    tokio::task::yield_now().await;
    assert!(!evicting.is_finished());

    let note = handle.create(NewNote::default()).await.expect("create");
    drop(handle);

    assert!(evicting.await.expect("evict task"));
    assert_eq!(store.cached_rooms().await, 0);
    assert_eq!(store.list(room_id).await.expect("list"), vec![note]);
}
