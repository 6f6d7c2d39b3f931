//! Wire protocol for client-server communication.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use handlechat_core::{Message, MessageKey, RoomId};
use handlechat_sync::{BufferEvent, EngineNotice};
use serde::{Deserialize, Serialize};

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The credential layer signed a user in.
    SignIn {
        identity: String,
        display_name: String,
    },
    /// The credential layer signed the user out.
    SignOut,
    /// Send a text message.
    SendText { text: String },
    /// Send a photo (base64 encoded).
    SendPhoto { file_name: String, data: String },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Create a photo message from raw bytes.
    #[must_use]
    pub fn photo(file_name: impl Into<String>, data: &[u8]) -> Self {
        Self::SendPhoto {
            file_name: file_name.into(),
            data: BASE64.encode(data),
        }
    }

    /// Decode photo data from base64.
    #[must_use]
    pub fn decode_photo(&self) -> Option<Vec<u8>> {
        if let Self::SendPhoto { data, .. } = self {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session bound to a room.
    SessionActive { room: RoomId, display_name: String },
    /// Session ended; the client should ask for credentials.
    SignedOut,
    /// A message was appended to the room view.
    MessageAdded { key: MessageKey, message: Message },
    /// The room view was emptied.
    Cleared,
    /// Non-fatal problem with the live subscription.
    Notice { message: String },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl From<BufferEvent> for ServerMessage {
    fn from(event: BufferEvent) -> Self {
        match event {
            BufferEvent::Added { key, message } => Self::MessageAdded { key, message },
            BufferEvent::Cleared => Self::Cleared,
        }
    }
}

impl From<EngineNotice> for ServerMessage {
    fn from(notice: EngineNotice) -> Self {
        let message = match notice {
            EngineNotice::BootstrapFailed { room, error } => {
                format!("Could not load history for {room}: {error}")
            }
            EngineNotice::SubscriptionFailed { room, reason } => {
                format!("Live updates for {room} stopped: {reason}")
            }
        };
        Self::Notice { message }
    }
}
