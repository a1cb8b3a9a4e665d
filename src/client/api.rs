//! REST client for rooms and notes.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{ClientError, FIRST_ROOM_NAME};
use crate::frame::Data;
use crate::model::{NewNote, Note, NotePatch, Room, RoomSnapshot};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_owned() }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// # Errors
    ///
    /// Returns transport or server errors.
    pub async fn list_rooms(&self) -> Result<Vec<Room>, ClientError> {
        let resp = self.http.get(self.url("/api/rooms")).send().await?;
        read_json(resp).await
    }

    /// # Errors
    ///
    /// Returns transport or server errors.
    pub async fn create_room(&self, name: &str) -> Result<Room, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/rooms"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        read_json(resp).await
    }

    /// The oldest room, creating the default one when none exist.
    ///
    /// # Errors
    ///
    /// Returns transport or server errors.
    pub async fn ensure_default_room(&self) -> Result<Room, ClientError> {
        if let Some(room) = self.list_rooms().await?.into_iter().next() {
            return Ok(room);
        }
        self.create_room(FIRST_ROOM_NAME).await
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the room does not exist.
    pub async fn snapshot(&self, room_id: Uuid) -> Result<RoomSnapshot, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/rooms/{room_id}")))
            .send()
            .await?;
        read_json(resp).await
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the room does not exist, or `ValidationFailed`
    /// if the server rejects a field.
    pub async fn create_note(&self, room_id: Uuid, fields: &NewNote) -> Result<Note, ClientError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/rooms/{room_id}/notes")))
            .json(&data_body(fields.to_data()))
            .send()
            .await?;
        read_json(resp).await
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the room or note does not exist, or
    /// `ValidationFailed` if the server rejects a field.
    pub async fn update_note(&self, room_id: Uuid, note_id: Uuid, patch: &NotePatch) -> Result<Note, ClientError> {
        let resp = self
            .http
            .put(self.url(&format!("/api/rooms/{room_id}/notes/{note_id}")))
            .json(&data_body(patch.to_data()))
            .send()
            .await?;
        read_json(resp).await
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the room does not exist.
    pub async fn delete_note(&self, room_id: Uuid, note_id: Uuid) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/rooms/{room_id}/notes/{note_id}")))
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn data_body(data: Data) -> serde_json::Value {
    serde_json::Value::Object(data.into_iter().collect())
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let resp = check_status(resp).await?;
    Ok(resp.json::<T>().await?)
}

/// Map non-success statuses to typed errors, using the `message` field of
/// the error body when there is one.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(serde_json::Value::as_str).map(ToOwned::to_owned))
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ClientError::ValidationFailed(message),
        _ => ClientError::Server { status: status.as_u16(), message },
    })
}
