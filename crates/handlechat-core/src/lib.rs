//! Core abstractions for the handlechat synchronization engine.
//!
//! This crate provides the fundamental building blocks:
//! - `Message`, `Session` and the room/key/path identifiers
//! - Capability traits for the remote log, blob store, user directory
//!   and configuration source
//! - `CachedConfig` - Remote configuration with defaults and cache expiration

pub mod config;
pub mod model;
pub mod traits;

pub use config::{
    CachedConfig, ChatSettings, ConfigError, ConfigProvider, ConfigSource, ConfigValue,
};
pub use model::{
    ANONYMOUS, BlobKey, BlobSource, LogPath, Message, MessageKey, PendingUpload, RoomId, Session,
    UserId,
};
pub use traits::{
    BlobError, BlobRef, BlobStore, ChildEvent, DirectoryError, Listener, ListenerHandle, LogError,
    RemoteLog, UserDirectory,
};
