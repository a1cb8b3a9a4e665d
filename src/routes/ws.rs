//! WebSocket handler — the push channel.
//!
//! DESIGN
//! ======
//! On upgrade the socket is split. A writer task owns the sink and drains the
//! connection's outbound channel; the same channel carries direct replies and
//! hub broadcasts, so a client sees them in the order they were queued. The
//! reader loop parses inbound frames, dispatches on `syscall`, and queues the
//! reply.
//!
//! Handler functions validate, call the hub, and return an `Outcome`. They
//! never touch the socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `join_room` → snapshot reply, membership for broadcasts
//! 3. Mutations / drags → hub → reply and fan-out
//! 4. Close → `disconnect` drops the membership
//!
//! A connection evicted by the hub for falling behind is closed from this
//! side; the client reconnects and resyncs.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{NOTE_DRAG, ReplicationEvent};
use crate::frame::{Data, Frame, Status};
use crate::model::{NewNote, NotePatch};
use crate::state::AppState;

pub const SESSION_CONNECTED: &str = "session:connected";
pub const GATEWAY_ERROR: &str = "gateway:error";
pub const JOIN_ROOM: &str = "join_room";
pub const LEAVE_ROOM: &str = "leave_room";
pub const NOTE_CREATE: &str = "note_create";
pub const NOTE_UPDATE: &str = "note_update";
pub const NOTE_DELETE: &str = "note_delete";

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer turns it into
/// the frames queued for the sender.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
    /// Send nothing. Used for drags.
    Silent,
}

/// Per-connection state owned by the reader loop.
pub(crate) struct Connection {
    pub client_id: Uuid,
    pub room_id: Option<Uuid>,
    pub tx: mpsc::Sender<Frame>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Frame>(state.ws_outbound_capacity);
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if send_frame(&mut sink, &frame).await.is_err() {
                break;
            }
        }
    });

    let welcome = Frame::request(SESSION_CONNECTED, Data::new()).with_data("client_id", client_id.to_string());
    if tx.send(welcome).await.is_err() {
        writer.abort();
        return;
    }

    info!(%client_id, "ws: client connected");
    let evicted = state.hub.eviction_signal(client_id).await;
    let mut conn = Connection { client_id, room_id: None, tx };

    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            () = evicted.notified() => {
                warn!(%client_id, "ws: evicted for falling behind");
                break;
            }
        };
        let Some(Ok(msg)) = msg else { break };
        match msg {
            Message::Text(text) => {
                for frame in process_inbound_text(&state, &mut conn, text.as_str()).await {
                    if conn.tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
        if writer.is_finished() {
            break;
        }
    }

    state.hub.disconnect(client_id).await;
    writer.abort();
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
pub(crate) async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request(GATEWAY_ERROR, Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    req.from = Some(conn.client_id.to_string());

    let is_drag = req.syscall == NOTE_DRAG;
    if !is_drag {
        info!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }
    if req.status != Status::Request {
        return if is_drag { vec![] } else { vec![req.error("only request frames are accepted")] };
    }

    let syscall = req.syscall.clone();
    let result = match syscall.as_str() {
        JOIN_ROOM => handle_join(state, conn, &req).await,
        LEAVE_ROOM => handle_leave(state, conn, &req).await,
        NOTE_DRAG => Ok(handle_drag(state, conn, &mut req).await),
        NOTE_CREATE => handle_create(state, conn, &req).await,
        NOTE_UPDATE => handle_update(state, conn, &req).await,
        NOTE_DELETE => handle_delete(state, conn, &req).await,
        other => Err(req.error(format!("unknown syscall: {other}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Silent) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

/// Room named on the frame header, a `room_id` data field, or the joined room.
fn target_room(conn: &Connection, req: &Frame) -> Result<Uuid, Frame> {
    req.room_id
        .or_else(|| req.data_uuid("room_id"))
        .or(conn.room_id)
        .ok_or_else(|| req.error("room_id required"))
}

// =============================================================================
// MEMBERSHIP HANDLERS
// =============================================================================

async fn handle_join(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room_id = req
        .room_id
        .or_else(|| req.data_uuid("room_id"))
        .ok_or_else(|| req.error("room_id required"))?;

    let notes = state
        .hub
        .join(conn.client_id, room_id, conn.tx.clone())
        .await
        .map_err(|e| req.error_from(&e))?;

    match join_reply(room_id, &notes) {
        Ok(data) => {
            conn.room_id = Some(room_id);
            Ok(Outcome::Reply(data))
        }
        Err(e) => {
            warn!(client_id = %conn.client_id, %room_id, error = %e, "ws: snapshot encoding failed");
            state.hub.leave(conn.client_id, room_id).await;
            conn.room_id = None;
            Err(req.error(format!("snapshot encoding failed: {e}")))
        }
    }
}

/// Payload of a successful join: the room id and its encoded snapshot.
fn join_reply<T: serde::Serialize + ?Sized>(room_id: Uuid, notes: &T) -> Result<Data, serde_json::Error> {
    let mut data = Data::new();
    data.insert("room_id".into(), serde_json::json!(room_id));
    data.insert("notes".into(), serde_json::to_value(notes)?);
    Ok(data)
}

async fn handle_leave(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room_id = target_room(conn, req)?;
    state.hub.leave(conn.client_id, room_id).await;
    if conn.room_id == Some(room_id) {
        conn.room_id = None;
    }
    Ok(Outcome::Done)
}

// =============================================================================
// NOTE HANDLERS
// =============================================================================

/// Drags never produce a reply, even when rejected.
async fn handle_drag(state: &AppState, conn: &Connection, req: &mut Frame) -> Outcome {
    if req.room_id.is_none() {
        req.room_id = conn.room_id;
    }
    match ReplicationEvent::try_from(&*req) {
        Ok(ReplicationEvent::Dragging { room_id, note_id, x, y }) => {
            if !state.hub.drag(conn.client_id, room_id, note_id, x, y).await {
                debug!(client_id = %conn.client_id, %room_id, %note_id, "ws: drag dropped");
            }
        }
        Ok(_) => {}
        Err(e) => debug!(client_id = %conn.client_id, error = %e, "ws: malformed drag"),
    }
    Outcome::Silent
}

async fn handle_create(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room_id = target_room(conn, req)?;
    let fields = NewNote::from_data(&req.data).map_err(|e| req.error_from(&e))?;

    let note = state
        .hub
        .create_note(room_id, fields, Some(conn.client_id))
        .await
        .map_err(|e| req.error_from(&e))?;

    let mut data = Data::new();
    data.insert("note".into(), serde_json::json!(note.to_data()));
    Ok(Outcome::Reply(data))
}

async fn handle_update(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room_id = target_room(conn, req)?;
    let note_id = req
        .data_uuid("note_id")
        .ok_or_else(|| req.error("note_id required"))?;
    let patch = NotePatch::from_data(&req.data).map_err(|e| req.error_from(&e))?;

    let note = state
        .hub
        .update_note(room_id, note_id, &patch, Some(conn.client_id))
        .await
        .map_err(|e| req.error_from(&e))?;

    let mut data = Data::new();
    data.insert("note".into(), serde_json::json!(note.to_data()));
    Ok(Outcome::Reply(data))
}

async fn handle_delete(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room_id = target_room(conn, req)?;
    let note_id = req
        .data_uuid("note_id")
        .ok_or_else(|| req.error("note_id required"))?;

    state
        .hub
        .delete_note(room_id, note_id, Some(conn.client_id))
        .await
        .map_err(|e| req.error_from(&e))?;

    let mut data = Data::new();
    data.insert("note_id".into(), serde_json::json!(note_id));
    Ok(Outcome::Reply(data))
}

// =============================================================================
// OUTBOUND
// =============================================================================

async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Ok(());
        }
    };
    if frame.syscall != NOTE_DRAG {
        if frame.status == Status::Error {
            let code = frame.error_code().unwrap_or("-");
            let message = frame.error_message().unwrap_or("-");
            warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
        } else {
            info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        }
    }
    sink.send(Message::Text(json.into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
