//! Room registry — which connections are in which room.
//!
//! A connection is a member of at most one room. Each membership carries the
//! connection's outbound frame sender; the registry never sees the socket.
//!
//! Fan-out never waits on a member. A member whose channel is full when a
//! durable frame goes out has missed part of the room's history, so it is
//! evicted and its connection's eviction signal fires. The connection then
//! closes and the client rejoins with a full resync.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::frame::Frame;

/// Server-assigned identity of one push-channel connection.
pub type ConnId = Uuid;

#[derive(Default)]
struct Membership {
    rooms: HashMap<Uuid, HashMap<ConnId, mpsc::Sender<Frame>>>,
    conns: HashMap<ConnId, Uuid>,
    evictions: HashMap<ConnId, Arc<Notify>>,
}

impl Membership {
    fn remove(&mut self, conn: ConnId, room_id: Uuid) {
        let emptied = match self.rooms.get_mut(&room_id) {
            Some(members) => {
                members.remove(&conn);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            self.rooms.remove(&room_id);
        }
        self.conns.remove(&conn);
    }
}

#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<Membership>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` in `room_id`. Re-joining the same room only refreshes
    /// the sender. Joining a different room leaves the previous one first and
    /// returns its id.
    pub async fn join(&self, conn: ConnId, room_id: Uuid, tx: mpsc::Sender<Frame>) -> Option<Uuid> {
        let mut inner = self.inner.write().await;
        let previous = inner.conns.get(&conn).copied().filter(|prev| *prev != room_id);
        if let Some(prev) = previous {
            inner.remove(conn, prev);
        }
        inner.rooms.entry(room_id).or_default().insert(conn, tx);
        inner.conns.insert(conn, room_id);
        previous
    }

    /// Remove `conn` from `room_id`. Returns false if it was not a member.
    pub async fn leave(&self, conn: ConnId, room_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        if inner.conns.get(&conn) != Some(&room_id) {
            return false;
        }
        inner.remove(conn, room_id);
        true
    }

    /// Drop every registration held by `conn`. Returns the room it was in.
    pub async fn disconnect(&self, conn: ConnId) -> Option<Uuid> {
        let mut inner = self.inner.write().await;
        inner.evictions.remove(&conn);
        let room_id = inner.conns.get(&conn).copied()?;
        inner.remove(conn, room_id);
        Some(room_id)
    }

    /// Signal fired when `conn` is evicted for falling behind. A permit is
    /// stored, so waiting after the eviction still completes.
    pub async fn eviction_signal(&self, conn: ConnId) -> Arc<Notify> {
        let mut inner = self.inner.write().await;
        Arc::clone(inner.evictions.entry(conn).or_default())
    }

    pub async fn room_of(&self, conn: ConnId) -> Option<Uuid> {
        self.inner.read().await.conns.get(&conn).copied()
    }

    pub async fn is_member(&self, conn: ConnId, room_id: Uuid) -> bool {
        self.room_of(conn).await == Some(room_id)
    }

    pub async fn member_count(&self, room_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(&room_id)
            .map_or(0, HashMap::len)
    }

    /// Deliver a durable frame to every member except `exclude` without
    /// waiting. Members that cannot take it are evicted and returned.
    pub async fn broadcast(&self, room_id: Uuid, frame: &Frame, exclude: Option<ConnId>) -> Vec<ConnId> {
        let stalled = {
            let inner = self.inner.read().await;
            let Some(members) = inner.rooms.get(&room_id) else {
                return Vec::new();
            };
            members
                .iter()
                .filter(|(conn, _)| exclude != Some(**conn))
                .filter_map(|(conn, tx)| match tx.try_send(frame.clone()) {
                    Ok(()) => None,
                    Err(TrySendError::Full(_)) => {
                        warn!(%room_id, %conn, syscall = %frame.syscall, "member fell behind; evicting");
                        Some(*conn)
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(%room_id, %conn, syscall = %frame.syscall, "broadcast target closed");
                        Some(*conn)
                    }
                })
                .collect::<Vec<_>>()
        };

        if !stalled.is_empty() {
            let mut inner = self.inner.write().await;
            for conn in &stalled {
                if inner.conns.get(conn) == Some(&room_id) {
                    inner.remove(*conn, room_id);
                }
                if let Some(signal) = inner.evictions.get(conn) {
                    signal.notify_one();
                }
            }
        }
        stalled
    }

    /// Best-effort delivery. Saturated or closed members miss this frame.
    pub async fn broadcast_lossy(&self, room_id: Uuid, frame: &Frame, exclude: Option<ConnId>) {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(&room_id) else {
            return;
        };
        for (conn, tx) in members {
            if exclude == Some(*conn) {
                continue;
            }
            if tx.try_send(frame.clone()).is_err() {
                debug!(%room_id, %conn, syscall = %frame.syscall, "lossy broadcast dropped");
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
