//! Matrix homeserver access
//!
//! A thin client over the handful of client-server and Synapse admin
//! endpoints the bot needs, plus the extras plain clients lack:
//! shared-secret registration and login, room hierarchy pagination, sync
//! cursor checkpointing and DM room lookup.

pub mod client;
pub mod rooms;
pub mod secret;
pub mod sync;

use thiserror::Error;

pub use client::{ClientConfig, ExtendedClient, SyncHandler};
pub use rooms::{RoomCache, RoomSummary};
pub use sync::{ClientState, HierarchyRoom, SyncResponse};

/// A request to the Matrix homeserver did not succeed
#[derive(Debug, Clone, Error)]
#[error("{method} {path} failed with status {status}: {}", .errcode.as_deref().unwrap_or("no errcode"))]
pub struct RequestError {
    pub method: String,
    pub path: String,
    pub status: u16,
    /// Matrix error code, such as `M_FORBIDDEN`
    pub errcode: Option<String>,
    /// Human readable message sent by the homeserver
    pub error: Option<String>,
}

impl RequestError {
    /// Whether the homeserver answered with the given Matrix error code
    pub fn is(&self, errcode: &str) -> bool {
        self.errcode.as_deref() == Some(errcode)
    }
}

/// Matrix layer errors
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid homeserver url: {0}")]
    Url(#[from] url::ParseError),

    #[error("State file error: {0}")]
    State(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shared secret cannot be used as an HMAC key")]
    InvalidSecret,

    #[error("Client is not logged in")]
    NotLoggedIn,
}

impl MatrixError {
    /// The failed request, if the error came from the homeserver
    pub fn request(&self) -> Option<&RequestError> {
        match self {
            MatrixError::Request(err) => Some(err),
            _ => None,
        }
    }
}
