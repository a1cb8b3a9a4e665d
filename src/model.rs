//! Rooms and notes, plus the typed create/patch payloads.
//!
//! DESIGN
//! ======
//! Payloads arrive as flat `Data` maps (WebSocket) or JSON objects (REST).
//! Both go through the same `from_data` parsers, so a malformed field is a
//! `ValidationError` no matter which channel carried it. Unknown keys are
//! ignored; `id` and `room_id` are never read from a patch, which keeps both
//! immutable after creation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::frame::Data;

pub const DEFAULT_COLOR: &str = "#ffeb3b";
pub const DEFAULT_WIDTH: f64 = 200.0;
pub const DEFAULT_HEIGHT: f64 = 150.0;
pub const DEFAULT_ROOM_NAME: &str = "Untitled Room";

// =============================================================================
// ROOM
// =============================================================================

/// A canvas. Owns zero or more notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    /// Milliseconds since Unix epoch. Rooms list in this order.
    pub created_at: i64,
}

/// A room together with its current notes, as served to a joining client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: Uuid,
    pub name: String,
    pub notes: Vec<Note>,
}

// =============================================================================
// NOTE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Link,
    Image,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Image => "image",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "link" => Some(Self::Link),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// Optional media attached to a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub url: String,
}

/// A positioned, editable entity on a canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub room_id: Uuid,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub color: String,
    pub content: String,
    #[serde(default)]
    pub media: Option<Media>,
}

impl Note {
    /// A note carrying only defaults. Base for creation and for replicas that
    /// learn about a note through a partial update.
    #[must_use]
    pub fn placeholder(id: Uuid, room_id: Uuid) -> Self {
        Self {
            id,
            room_id,
            x: 0.0,
            y: 0.0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            color: DEFAULT_COLOR.to_owned(),
            content: String::new(),
            media: None,
        }
    }

    /// Apply caller-supplied creation fields over the defaults.
    #[must_use]
    pub fn from_new(id: Uuid, room_id: Uuid, fields: NewNote) -> Self {
        let mut note = Self::placeholder(id, room_id);
        if let Some(content) = fields.content {
            note.content = content;
        }
        if let Some(x) = fields.x {
            note.x = x;
        }
        if let Some(y) = fields.y {
            note.y = y;
        }
        if let Some(width) = fields.width {
            note.width = width;
        }
        if let Some(height) = fields.height {
            note.height = height;
        }
        if let Some(color) = fields.color {
            note.color = color;
        }
        note.media = fields.media;
        note
    }

    /// Shallow, field-scoped merge. Omitted fields keep their prior value.
    pub fn apply(&mut self, patch: &NotePatch) {
        if let Some(content) = &patch.content {
            content.clone_into(&mut self.content);
        }
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(color) = &patch.color {
            color.clone_into(&mut self.color);
        }
        if let Some(media) = &patch.media {
            self.media.clone_from(media);
        }
    }

    /// Flatten into a frame payload.
    #[must_use]
    pub fn to_data(&self) -> Data {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => Data::new(),
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// A payload field had the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: &'static str,
}

impl ValidationError {
    fn new(field: &str, reason: &'static str) -> Self {
        Self { field: field.to_owned(), reason }
    }
}

impl crate::frame::ErrorCode for ValidationError {
    fn error_code(&self) -> &'static str {
        "E_VALIDATION_FAILED"
    }
}

/// Convert a JSON request body into flat frame data.
///
/// # Errors
///
/// Returns a `ValidationError` if the body is not a JSON object.
pub fn body_to_data(body: Value) -> Result<Data, ValidationError> {
    match body {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(ValidationError::new("body", "must be a JSON object")),
    }
}

fn read_f64(data: &Data, key: &str) -> Result<Option<f64>, ValidationError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| ValidationError::new(key, "must be a finite number")),
    }
}

fn read_string(data: &Data, key: &str) -> Result<Option<String>, ValidationError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::new(key, "must be a string")),
    }
}

/// `None` when absent, `Some(None)` when explicitly null.
fn read_media(data: &Data) -> Result<Option<Option<Media>>, ValidationError> {
    let Some(raw) = data.get("media") else {
        return Ok(None);
    };
    let Value::Object(map) = raw else {
        if raw.is_null() {
            return Ok(Some(None));
        }
        return Err(ValidationError::new("media", "must be an object or null"));
    };
    let kind = map
        .get("kind")
        .and_then(Value::as_str)
        .and_then(MediaKind::parse)
        .ok_or_else(|| ValidationError::new("media.kind", "must be \"link\" or \"image\""))?;
    let url = map
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::new("media.url", "must be a string"))?;
    Ok(Some(Some(Media { kind, url: url.to_owned() })))
}

// =============================================================================
// CREATE PAYLOAD
// =============================================================================

/// Creation fields. Everything is optional; the store fills in defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNote {
    pub content: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub color: Option<String>,
    pub media: Option<Media>,
}

impl NewNote {
    /// An empty note at a position.
    #[must_use]
    pub fn at(x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    /// Parse creation fields from a flat payload.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for the first malformed field.
    pub fn from_data(data: &Data) -> Result<Self, ValidationError> {
        Ok(Self {
            content: read_string(data, "content")?,
            x: read_f64(data, "x")?,
            y: read_f64(data, "y")?,
            width: read_f64(data, "width")?,
            height: read_f64(data, "height")?,
            color: read_string(data, "color")?,
            media: read_media(data)?.flatten(),
        })
    }

    #[must_use]
    pub fn to_data(&self) -> Data {
        let mut data = Data::new();
        insert_opt(&mut data, "content", self.content.as_ref());
        insert_opt(&mut data, "x", self.x.as_ref());
        insert_opt(&mut data, "y", self.y.as_ref());
        insert_opt(&mut data, "width", self.width.as_ref());
        insert_opt(&mut data, "height", self.height.as_ref());
        insert_opt(&mut data, "color", self.color.as_ref());
        insert_opt(&mut data, "media", self.media.as_ref());
        data
    }
}

// =============================================================================
// PATCH PAYLOAD
// =============================================================================

/// Partial update. `media: Some(None)` clears the attachment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotePatch {
    pub content: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub color: Option<String>,
    pub media: Option<Option<Media>>,
}

impl NotePatch {
    /// A position-only patch, as produced by a committed drag.
    #[must_use]
    pub fn position(x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    /// A patch that sets every field to the note's current value.
    #[must_use]
    pub fn from_note(note: &Note) -> Self {
        Self {
            content: Some(note.content.clone()),
            x: Some(note.x),
            y: Some(note.y),
            width: Some(note.width),
            height: Some(note.height),
            color: Some(note.color.clone()),
            media: Some(note.media.clone()),
        }
    }

    /// Parse a partial update from a flat payload.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for the first malformed field.
    pub fn from_data(data: &Data) -> Result<Self, ValidationError> {
        Ok(Self {
            content: read_string(data, "content")?,
            x: read_f64(data, "x")?,
            y: read_f64(data, "y")?,
            width: read_f64(data, "width")?,
            height: read_f64(data, "height")?,
            color: read_string(data, "color")?,
            media: read_media(data)?,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn to_data(&self) -> Data {
        let mut data = Data::new();
        insert_opt(&mut data, "content", self.content.as_ref());
        insert_opt(&mut data, "x", self.x.as_ref());
        insert_opt(&mut data, "y", self.y.as_ref());
        insert_opt(&mut data, "width", self.width.as_ref());
        insert_opt(&mut data, "height", self.height.as_ref());
        insert_opt(&mut data, "color", self.color.as_ref());
        if let Some(media) = &self.media {
            data.insert("media".into(), serde_json::to_value(media).unwrap_or(Value::Null));
        }
        data
    }
}

fn insert_opt<T: Serialize>(data: &mut Data, key: &str, value: Option<&T>) {
    if let Some(value) = value
        && let Ok(json) = serde_json::to_value(value)
    {
        data.insert(key.into(), json);
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
