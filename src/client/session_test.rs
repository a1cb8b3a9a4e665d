use std::sync::Arc;

use super::*;
use crate::hub::ReplicationHub;
use crate::store::repo::MemoryRepo;

#[tokio::test]
async fn events_committed_before_the_join_reply_are_replayed() {
    let hub = ReplicationHub::new(Arc::new(MemoryRepo::new()));
    let room_id = hub.create_room("Board").await.expect("room").id;
    let existing = hub
        .create_note(room_id, NewNote::at(1.0, 1.0), None)
        .await
        .expect("create existing");

    let conn = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(8);
    let snapshot = hub.join(conn, room_id, tx).await.expect("join");

    // Committed once the connection is registered but before its reply is read.
    let late = hub
        .create_note(room_id, NewNote::at(2.0, 2.0), None)
        .await
        .expect("create late");
    hub.delete_note(room_id, existing.id, None).await.expect("delete");

    let mut early = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        early.push(ReplicationEvent::try_from(&frame).expect("replication event"));
    }
    assert_eq!(early.len(), 2);

    let mut replica = Replica::new();
    settle_join(&mut replica, room_id, snapshot, &early);

    assert_eq!(replica.room_id(), Some(room_id));
    assert_eq!(replica.note(late.id), Some(&late));
    assert!(replica.note(existing.id).is_none());
    assert_eq!(replica.len(), 1);
}

#[test]
fn settle_join_without_early_events_is_the_snapshot() {
    let room_id = Uuid::new_v4();
    let note = Note::placeholder(Uuid::new_v4(), room_id);

    let mut replica = Replica::new();
    settle_join(&mut replica, room_id, vec![note.clone()], &[]);

    assert_eq!(replica.notes().collect::<Vec<_>>(), vec![&note]);
}
