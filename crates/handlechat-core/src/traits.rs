//! Capability traits for the remote log, blob store and user directory.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{BlobKey, LogPath, Message, MessageKey, RoomId, UserId};

/// Event delivered by a live subscription to a log path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    /// A new entry was appended.
    Added { key: MessageKey, message: Message },
    /// An existing entry was overwritten.
    Changed { key: MessageKey, message: Message },
    /// An entry was deleted.
    Removed { key: MessageKey },
    /// An entry changed position.
    Moved {
        key: MessageKey,
        previous: Option<MessageKey>,
    },
    /// The remote side terminated the subscription.
    Cancelled { reason: String },
}

/// Identifies one installed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerHandle(Uuid);

impl ListenerHandle {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An installed listener: its handle plus the stream of child events.
///
/// Events are delivered one at a time in log key order.
pub struct Listener {
    pub handle: ListenerHandle,
    pub events: BoxStream<'static, ChildEvent>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Remote log error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("Log entry not found: {0}")]
    NotFound(MessageKey),
    #[error("Remote log unavailable: {0}")]
    Unavailable(String),
    #[error("Remote log error: {0}")]
    Internal(String),
}

/// Ordered, key-indexed, append-only event source.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    /// Append `message` at `path`, returning the key the log assigned.
    async fn append(&self, path: &LogPath, message: &Message) -> Result<MessageKey, LogError>;

    /// The last `n` entries at `path`, in key order.
    async fn query_last_n(
        &self,
        path: &LogPath,
        n: usize,
    ) -> Result<Vec<(MessageKey, Message)>, LogError>;

    /// Install a listener for child events at `path`.
    ///
    /// Only entries appended after the listener is installed are delivered.
    async fn subscribe(&self, path: &LogPath) -> Result<Listener, LogError>;

    /// Remove a listener. Unknown handles are ignored.
    fn unsubscribe(&self, handle: ListenerHandle);
}

/// Reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub key: BlobKey,
}

/// Blob store error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(BlobKey),
    #[error("Upload rejected: {0}")]
    UploadRejected(String),
    #[error("Blob store error: {0}")]
    Internal(String),
}

/// Binary attachment storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`.
    async fn put(&self, key: &BlobKey, data: Bytes) -> Result<BlobRef, BlobError>;

    /// Durable download URI for a stored blob.
    async fn download_reference(&self, blob: &BlobRef) -> Result<String, BlobError>;
}

/// User directory error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("User directory unavailable: {0}")]
    Unavailable(String),
    #[error("User directory error: {0}")]
    Internal(String),
}

/// User to room assignments.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The room assigned to `identity`, if any.
    async fn lookup_room(&self, identity: &UserId) -> Result<Option<RoomId>, DirectoryError>;
}
