//! Transport layer between handlechat sessions and a presentation client.
//!
//! Provides:
//! - Wire protocol (JSON, attachments base64-encoded)
//! - `ChatConnection` - One client's controller plus outbound channel
//! - WebSocket transport (feature: websocket)

pub mod connection;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::{Backends, ChatConnection};
pub use protocol::{ClientMessage, ServerMessage};
