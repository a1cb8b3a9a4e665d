//! Room session — one push-channel connection bound to one room.
//!
//! DESIGN
//! ======
//! Opening a session connects, waits for `session:connected`, sends
//! `join_room`, and resyncs the replica from the reply. Events that arrive
//! before the reply were committed after the snapshot was taken, so they are
//! held back and applied once the snapshot is in place.
//!
//! A writer task owns the socket sink and drains an outbound queue. Drags go
//! out through that queue with `try_send` and are simply lost when it is full
//! or the session is disconnected. Durable edits go through the REST API; the
//! local replica is updated first and is not rolled back on failure.
//!
//! Once a read fails the session is `Disconnected` and stays that way until
//! `reconnect()` rebuilds the connection and the replica from scratch.
//! Dropping a session without calling `leave()` still queues a best-effort
//! `leave_room`.

use std::time::{Duration, Instant};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ApiClient, ClientError, ConnectionStatus};
use crate::event::ReplicationEvent;
use crate::frame::{Data, Frame, Status};
use crate::model::{NewNote, Note, NotePatch};
use crate::replica::Replica;
use crate::routes::ws::{JOIN_ROOM, LEAVE_ROOM, SESSION_CONNECTED};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const OUTBOUND_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live halves of one connection.
struct Link {
    outbound: mpsc::Sender<Message>,
    inbound: SplitStream<WsStream>,
    writer: JoinHandle<()>,
}

pub struct RoomSession {
    api: ApiClient,
    room_id: Uuid,
    client_id: Option<Uuid>,
    replica: Replica,
    link: Option<Link>,
    left: bool,
}

impl RoomSession {
    /// Connect to `base_url` and join `room_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the room does not exist, `Timeout` if the server
    /// does not answer in time, or `TransportUnavailable` if it cannot be
    /// reached.
    pub async fn open(base_url: &str, room_id: Uuid) -> Result<Self, ClientError> {
        let mut session = Self {
            api: ApiClient::new(base_url),
            room_id,
            client_id: None,
            replica: Replica::new(),
            link: None,
            left: false,
        };
        session.connect().await?;
        Ok(session)
    }

    #[must_use]
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Server-assigned id of the current connection.
    #[must_use]
    pub fn client_id(&self) -> Option<Uuid> {
        self.client_id
    }

    #[must_use]
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        if self.link.is_some() { ConnectionStatus::Connected } else { ConnectionStatus::Disconnected }
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Tear down whatever is left of the connection and rejoin with a full
    /// resync.
    ///
    /// # Errors
    ///
    /// See [`RoomSession::open`].
    pub async fn reconnect(&mut self) -> Result<(), ClientError> {
        self.drop_link();
        self.connect().await
    }

    /// Leave the room and close the connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportUnavailable` if the leave could not be queued.
    pub async fn leave(mut self) -> Result<(), ClientError> {
        self.left = true;
        self.replica.clear();
        let Some(link) = self.link.take() else {
            return Ok(());
        };

        let frame = Frame::request(LEAVE_ROOM, Data::new()).with_room_id(self.room_id);
        let queued = link.outbound.send(encode(&frame)?).await;

        let Link { outbound, inbound, writer } = link;
        drop(outbound);
        if timeout(CLOSE_TIMEOUT, writer).await.is_err() {
            debug!(room_id = %self.room_id, "session writer did not close in time");
        }
        drop(inbound);

        info!(room_id = %self.room_id, "left room");
        queued.map_err(|_| ClientError::TransportUnavailable("connection closed".into()))
    }

    async fn connect(&mut self) -> Result<(), ClientError> {
        let url = super::ws_url(self.api.base_url())?;
        let (stream, _) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| ClientError::Timeout("connect"))??;
        let (mut sink, mut inbound) = stream.split();

        let (outbound, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "session writer stopped");
                    return;
                }
            }
            if let Err(e) = sink.close().await {
                debug!(error = %e, "session close failed");
            }
        });

        match self.handshake(&mut inbound, &outbound).await {
            Ok(()) => {
                self.link = Some(Link { outbound, inbound, writer });
                self.left = false;
                info!(room_id = %self.room_id, client_id = ?self.client_id, notes = self.replica.len(), "joined room");
                Ok(())
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }

    async fn handshake(
        &mut self,
        inbound: &mut SplitStream<WsStream>,
        outbound: &mpsc::Sender<Message>,
    ) -> Result<(), ClientError> {
        let client_id = timeout(CONNECT_TIMEOUT, async {
            loop {
                let frame = recv_frame(inbound).await?;
                if frame.syscall == SESSION_CONNECTED {
                    return Ok::<_, ClientError>(frame.data_uuid("client_id"));
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout(SESSION_CONNECTED))??;

        let join = Frame::request(JOIN_ROOM, Data::new()).with_room_id(self.room_id);
        outbound
            .send(encode(&join)?)
            .await
            .map_err(|_| ClientError::TransportUnavailable("connection closed".into()))?;

        let mut early = Vec::new();
        let reply = timeout(JOIN_TIMEOUT, async {
            loop {
                let frame = recv_frame(inbound).await?;
                if frame.parent_id == Some(join.id) && frame.status.is_terminal() {
                    return Ok::<_, ClientError>(frame);
                }
                if let Ok(event) = ReplicationEvent::try_from(&frame) {
                    early.push(event);
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout("join_room reply"))??;

        if reply.status == Status::Error {
            let message = reply.error_message().unwrap_or("join failed").to_owned();
            return Err(match reply.error_code() {
                Some("E_ROOM_NOT_FOUND") => ClientError::NotFound(message),
                _ => ClientError::Protocol(message),
            });
        }

        let notes = reply
            .data
            .get("notes")
            .cloned()
            .map(serde_json::from_value::<Vec<Note>>)
            .transpose()
            .map_err(|e| ClientError::Protocol(e.to_string()))?
            .unwrap_or_default();

        self.client_id = client_id;
        settle_join(&mut self.replica, self.room_id, notes, &early);
        Ok(())
    }

    fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.writer.abort();
        }
    }

    fn require_connected(&self) -> Result<(), ClientError> {
        if self.link.is_none() {
            return Err(ClientError::TransportUnavailable("session disconnected".into()));
        }
        Ok(())
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Wait for the next replication event, apply it to the replica, and
    /// return it. Expired peer marks are cleared on the way.
    ///
    /// # Errors
    ///
    /// Returns `TransportUnavailable` once the connection is gone; the
    /// session is `Disconnected` from then on.
    pub async fn next_event(&mut self) -> Result<ReplicationEvent, ClientError> {
        loop {
            self.replica.expire_marks(Instant::now());
            let Some(link) = self.link.as_mut() else {
                return Err(ClientError::TransportUnavailable("session disconnected".into()));
            };

            let received = recv_frame(&mut link.inbound).await;
            let frame = match received {
                Ok(frame) => frame,
                Err(ClientError::Protocol(e)) => {
                    debug!(error = %e, "skipping unreadable frame");
                    continue;
                }
                Err(e) => {
                    info!(room_id = %self.room_id, error = %e, "session disconnected");
                    self.drop_link();
                    return Err(e);
                }
            };

            if let Ok(event) = ReplicationEvent::try_from(&frame) {
                self.replica.apply(&event);
                return Ok(event);
            }
        }
    }

    // =========================================================================
    // DURABLE EDITS
    // =========================================================================

    /// Create a note. The replica learns it from the server's answer.
    ///
    /// # Errors
    ///
    /// Returns `TransportUnavailable` while disconnected, or the API error.
    pub async fn create_note(&mut self, fields: NewNote) -> Result<Note, ClientError> {
        self.require_connected()?;
        let note = self.api.create_note(self.room_id, &fields).await?;
        self.replica.upsert_canonical(note.clone());
        Ok(note)
    }

    /// Apply the patch locally, then persist it.
    ///
    /// # Errors
    ///
    /// Returns `TransportUnavailable` while disconnected, or the API error.
    /// The local change stays in place on failure.
    pub async fn update_note(&mut self, note_id: Uuid, patch: NotePatch) -> Result<Note, ClientError> {
        self.require_connected()?;
        self.replica.update_local(note_id, &patch);
        let note = self.api.update_note(self.room_id, note_id, &patch).await?;
        self.replica.upsert_canonical(note.clone());
        Ok(note)
    }

    /// Remove the note locally, then delete it on the server.
    ///
    /// # Errors
    ///
    /// Returns `TransportUnavailable` while disconnected, or the API error.
    pub async fn delete_note(&mut self, note_id: Uuid) -> Result<(), ClientError> {
        self.require_connected()?;
        self.replica.remove_local(note_id);
        self.api.delete_note(self.room_id, note_id).await
    }

    // =========================================================================
    // DRAG
    // =========================================================================

    pub fn begin_drag(&mut self, note_id: Uuid) -> bool {
        self.replica.begin_drag(note_id)
    }

    /// Move a dragged note locally and stream the position to peers.
    /// Returns false if no drag is active for the note.
    pub fn drag_to(&mut self, note_id: Uuid, x: f64, y: f64) -> bool {
        let Some(step) = self.replica.drag_to(note_id, x, y) else {
            return false;
        };
        if let Some(link) = &self.link {
            match encode(&step.to_frame()) {
                Ok(msg) => {
                    if link.outbound.try_send(msg).is_err() {
                        debug!(%note_id, "drag frame dropped");
                    }
                }
                Err(e) => debug!(%note_id, error = %e, "drag frame not encodable"),
            }
        }
        true
    }

    /// Finish a drag and persist the final position. `Ok(None)` if no drag
    /// was active.
    ///
    /// # Errors
    ///
    /// Returns `TransportUnavailable` while disconnected, or the API error.
    pub async fn end_drag(&mut self, note_id: Uuid) -> Result<Option<Note>, ClientError> {
        let Some(patch) = self.replica.commit_drag(note_id) else {
            return Ok(None);
        };
        self.require_connected()?;
        let note = self.api.update_note(self.room_id, note_id, &patch).await?;
        self.replica.upsert_canonical(note.clone());
        Ok(Some(note))
    }

    pub fn cancel_drag(&mut self, note_id: Uuid) -> bool {
        self.replica.cancel_drag(note_id)
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if self.left {
            return;
        }
        let Some(link) = self.link.take() else {
            return;
        };
        // The writer drains this before closing, once `link` drops here.
        let frame = Frame::request(LEAVE_ROOM, Data::new()).with_room_id(self.room_id);
        if let Ok(msg) = encode(&frame) {
            if link.outbound.try_send(msg).is_err() {
                debug!(room_id = %self.room_id, "leave on drop not queued");
            }
        }
    }
}

/// Adopt the join snapshot, then replay what was committed after it.
fn settle_join(replica: &mut Replica, room_id: Uuid, notes: Vec<Note>, early: &[ReplicationEvent]) {
    replica.resync(room_id, notes);
    for event in early {
        replica.apply(event);
    }
}

fn encode(frame: &Frame) -> Result<Message, ClientError> {
    serde_json::to_string(frame)
        .map(|json| Message::Text(json.into()))
        .map_err(|e| ClientError::Protocol(e.to_string()))
}

/// Next text frame from the socket. Control frames are skipped.
async fn recv_frame(inbound: &mut SplitStream<WsStream>) -> Result<Frame, ClientError> {
    loop {
        let Some(msg) = inbound.next().await else {
            return Err(ClientError::TransportUnavailable("connection closed".into()));
        };
        match msg? {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).map_err(|e| ClientError::Protocol(e.to_string()));
            }
            Message::Close(_) => return Err(ClientError::TransportUnavailable("connection closed".into())),
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
