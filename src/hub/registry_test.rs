use super::*;
use crate::frame::Data;

fn channel() -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
    mpsc::channel(8)
}

fn ping() -> Frame {
    Frame::request("ping", Data::new())
}

#[tokio::test]
async fn join_is_idempotent() {
    let registry = RoomRegistry::new();
    let (conn, room) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx, _rx) = channel();

    assert_eq!(registry.join(conn, room, tx.clone()).await, None);
    assert_eq!(registry.join(conn, room, tx).await, None);
    assert_eq!(registry.member_count(room).await, 1);
    assert!(registry.is_member(conn, room).await);
}

#[tokio::test]
async fn joining_another_room_leaves_the_first() {
    let registry = RoomRegistry::new();
    let (conn, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (tx, _rx) = channel();

    registry.join(conn, a, tx.clone()).await;
    assert_eq!(registry.join(conn, b, tx).await, Some(a));
    assert_eq!(registry.member_count(a).await, 0);
    assert_eq!(registry.room_of(conn).await, Some(b));
}

#[tokio::test]
async fn leave_when_not_member_is_noop() {
    let registry = RoomRegistry::new();
    let (conn, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (tx, _rx) = channel();

    assert!(!registry.leave(conn, a).await);
    registry.join(conn, a, tx).await;
    assert!(!registry.leave(conn, b).await);
    assert!(registry.is_member(conn, a).await);
    assert!(registry.leave(conn, a).await);
    assert!(!registry.is_member(conn, a).await);
}

#[tokio::test]
async fn disconnect_returns_previous_room() {
    let registry = RoomRegistry::new();
    let (conn, room) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx, _rx) = channel();

    registry.join(conn, room, tx).await;
    assert_eq!(registry.disconnect(conn).await, Some(room));
    assert_eq!(registry.disconnect(conn).await, None);
}

#[tokio::test]
async fn broadcast_skips_excluded_member() {
    let registry = RoomRegistry::new();
    let room = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx_a, mut rx_a) = channel();
    let (tx_b, mut rx_b) = channel();
    registry.join(a, room, tx_a).await;
    registry.join(b, room, tx_b).await;

    registry.broadcast(room, &ping(), Some(a)).await;

    assert!(rx_a.try_recv().is_err());
    assert_eq!(rx_b.try_recv().expect("b receives").syscall, "ping");
}

#[tokio::test]
async fn broadcast_does_not_cross_rooms() {
    let registry = RoomRegistry::new();
    let (room_a, room_b) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx, mut rx) = channel();
    registry.join(Uuid::new_v4(), room_b, tx).await;

    registry.broadcast(room_a, &ping(), None).await;
    registry.broadcast_lossy(room_a, &ping(), None).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_to_empty_room_is_noop() {
    let registry = RoomRegistry::new();
    registry.broadcast(Uuid::new_v4(), &ping(), None).await;
}

#[tokio::test]
async fn broadcast_ignores_closed_members() {
    let registry = RoomRegistry::new();
    let room = Uuid::new_v4();
    let (dead, live) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx_dead, rx_dead) = channel();
    let (tx_live, mut rx_live) = channel();
    registry.join(dead, room, tx_dead).await;
    registry.join(live, room, tx_live).await;
    drop(rx_dead);

    assert_eq!(registry.broadcast(room, &ping(), None).await, vec![dead]);
    assert!(rx_live.try_recv().is_ok());
    assert!(!registry.is_member(dead, room).await);
    assert!(registry.is_member(live, room).await);
}

#[tokio::test]
async fn full_member_is_evicted_and_signalled() {
    let registry = RoomRegistry::new();
    let room = Uuid::new_v4();
    let (slow, fast) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx_slow, _rx_slow) = mpsc::channel(1);
    let (tx_fast, mut rx_fast) = channel();
    registry.join(slow, room, tx_slow).await;
    registry.join(fast, room, tx_fast).await;
    let signal = registry.eviction_signal(slow).await;

    assert!(registry.broadcast(room, &ping(), None).await.is_empty());
    assert_eq!(registry.broadcast(room, &ping(), None).await, vec![slow]);

    assert!(!registry.is_member(slow, room).await);
    assert_eq!(registry.member_count(room).await, 1);
    tokio::time::timeout(std::time::Duration::from_millis(200), signal.notified())
        .await
        .expect("eviction signal fires");

    assert!(rx_fast.try_recv().is_ok());
    assert!(rx_fast.try_recv().is_ok());
}

#[tokio::test]
async fn disconnect_forgets_eviction_signal() {
    let registry = RoomRegistry::new();
    let (conn, room) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx, _rx) = channel();
    registry.join(conn, room, tx).await;
    let first = registry.eviction_signal(conn).await;
    assert!(Arc::ptr_eq(&first, &registry.eviction_signal(conn).await));

    registry.disconnect(conn).await;
    assert!(!Arc::ptr_eq(&first, &registry.eviction_signal(conn).await));
}

#[tokio::test]
async fn lossy_broadcast_drops_for_full_channels() {
    let registry = RoomRegistry::new();
    let room = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(1);
    registry.join(Uuid::new_v4(), room, tx).await;

    registry.broadcast_lossy(room, &ping(), None).await;
    registry.broadcast_lossy(room, &ping(), None).await;

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}
