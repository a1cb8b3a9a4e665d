//! Replication events — the four things a replica ever has to reconcile.
//!
//! Each event travels as a request frame whose `room_id` is always set.
//! `Dragging` is the only ephemeral kind; the other three mirror a committed
//! store operation.

use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::model::{Note, NotePatch, ValidationError};

pub const NOTE_CREATED: &str = "note_created";
pub const NOTE_UPDATED: &str = "note_updated";
pub const NOTE_DELETED: &str = "note_deleted";
pub const NOTE_DRAG: &str = "note_drag";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    Created { room_id: Uuid, note: Note },
    Updated { room_id: Uuid, note_id: Uuid, fields: NotePatch },
    Deleted { room_id: Uuid, note_id: Uuid },
    Dragging { room_id: Uuid, note_id: Uuid, x: f64, y: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("not a replication event: {0}")]
    NotAnEvent(String),
    #[error("event frame has no room_id")]
    MissingRoom,
    #[error("event field `{0}` missing or malformed")]
    Malformed(&'static str),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl ReplicationEvent {
    /// Full-state update event for a committed note.
    #[must_use]
    pub fn updated(note: &Note) -> Self {
        Self::Updated { room_id: note.room_id, note_id: note.id, fields: NotePatch::from_note(note) }
    }

    #[must_use]
    pub fn room_id(&self) -> Uuid {
        match self {
            Self::Created { room_id, .. }
            | Self::Updated { room_id, .. }
            | Self::Deleted { room_id, .. }
            | Self::Dragging { room_id, .. } => *room_id,
        }
    }

    #[must_use]
    pub fn note_id(&self) -> Uuid {
        match self {
            Self::Created { note, .. } => note.id,
            Self::Updated { note_id, .. } | Self::Deleted { note_id, .. } | Self::Dragging { note_id, .. } => {
                *note_id
            }
        }
    }

    /// Durable events are committed by the store and ordered per room.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Dragging { .. })
    }

    #[must_use]
    pub fn syscall(&self) -> &'static str {
        match self {
            Self::Created { .. } => NOTE_CREATED,
            Self::Updated { .. } => NOTE_UPDATED,
            Self::Deleted { .. } => NOTE_DELETED,
            Self::Dragging { .. } => NOTE_DRAG,
        }
    }

    /// Encode as a push-channel frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut data = Data::new();
        match self {
            Self::Created { note, .. } => {
                data.insert("note".into(), serde_json::json!(note.to_data()));
            }
            Self::Updated { room_id, note_id, fields } => {
                let mut note = fields.to_data();
                note.insert("id".into(), serde_json::json!(note_id));
                note.insert("room_id".into(), serde_json::json!(room_id));
                data.insert("note".into(), serde_json::json!(note));
            }
            Self::Deleted { note_id, .. } => {
                data.insert("note_id".into(), serde_json::json!(note_id));
            }
            Self::Dragging { note_id, x, y, .. } => {
                data.insert("note_id".into(), serde_json::json!(note_id));
                data.insert("x".into(), serde_json::json!(x));
                data.insert("y".into(), serde_json::json!(y));
            }
        }
        Frame::request(self.syscall(), data).with_room_id(self.room_id())
    }
}

impl TryFrom<&Frame> for ReplicationEvent {
    type Error = EventDecodeError;

    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        if frame.status != Status::Request {
            return Err(EventDecodeError::NotAnEvent(frame.syscall.clone()));
        }
        let room_id = frame.room_id.ok_or(EventDecodeError::MissingRoom)?;

        match frame.syscall.as_str() {
            NOTE_CREATED => {
                let raw = frame.data.get("note").ok_or(EventDecodeError::Malformed("note"))?;
                let note: Note =
                    serde_json::from_value(raw.clone()).map_err(|_| EventDecodeError::Malformed("note"))?;
                Ok(Self::Created { room_id, note })
            }
            NOTE_UPDATED => {
                let Some(serde_json::Value::Object(map)) = frame.data.get("note") else {
                    return Err(EventDecodeError::Malformed("note"));
                };
                let note: Data = map.clone().into_iter().collect();
                let note_id = note
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .ok_or(EventDecodeError::Malformed("note.id"))?;
                let fields = NotePatch::from_data(&note)?;
                Ok(Self::Updated { room_id, note_id, fields })
            }
            NOTE_DELETED => {
                let note_id = frame
                    .data_uuid("note_id")
                    .ok_or(EventDecodeError::Malformed("note_id"))?;
                Ok(Self::Deleted { room_id, note_id })
            }
            NOTE_DRAG => {
                let note_id = frame
                    .data_uuid("note_id")
                    .ok_or(EventDecodeError::Malformed("note_id"))?;
                let x = finite(frame, "x")?;
                let y = finite(frame, "y")?;
                Ok(Self::Dragging { room_id, note_id, x, y })
            }
            other => Err(EventDecodeError::NotAnEvent(other.to_owned())),
        }
    }
}

fn finite(frame: &Frame, key: &'static str) -> Result<f64, EventDecodeError> {
    frame
        .data
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .filter(|n| n.is_finite())
        .ok_or(EventDecodeError::Malformed(key))
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
