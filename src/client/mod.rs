//! Client half of the transport.
//!
//! `ApiClient` speaks the request/response API. `RoomSession` holds one push
//! channel connection, keeps a `Replica` in step with it, and routes local
//! edits through the API.

pub mod api;
pub mod session;

pub use api::ApiClient;
pub use session::RoomSession;

/// Name given to the room created when a fresh server has none.
pub const FIRST_ROOM_NAME: &str = "My First Whiteboard";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::TransportUnavailable(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::TransportUnavailable(err.to_string())
    }
}

/// Push-channel state as seen by the session owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

fn ws_url(base_url: &str) -> Result<String, ClientError> {
    let trimmed = base_url.trim_end_matches('/');

    if let Some(rest) = trimmed.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = trimmed.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }

    Err(ClientError::InvalidBaseUrl(base_url.to_owned()))
}
