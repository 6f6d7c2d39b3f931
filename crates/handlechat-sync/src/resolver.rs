//! Room resolution for new sessions.

use std::sync::Arc;

use handlechat_core::{RoomId, UserDirectory, UserId};

/// Resolves the room a session binds to.
///
/// A directory failure never blocks sign-in: missing records and lookup
/// errors both resolve to the default room.
pub struct SessionResolver<D>
where
    D: UserDirectory,
{
    directory: Arc<D>,
    default_room: RoomId,
}

impl<D> SessionResolver<D>
where
    D: UserDirectory,
{
    /// Create a resolver falling back to `default_room`.
    #[must_use]
    pub fn new(directory: Arc<D>, default_room: RoomId) -> Self {
        Self {
            directory,
            default_room,
        }
    }

    #[must_use]
    pub const fn default_room(&self) -> &RoomId {
        &self.default_room
    }

    /// Room assigned to `identity`, or the default room.
    pub async fn resolve(&self, identity: &UserId) -> RoomId {
        match self.directory.lookup_room(identity).await {
            Ok(Some(room)) => {
                tracing::debug!(%identity, %room, "Resolved assigned room");
                room
            }
            Ok(None) => {
                tracing::debug!(%identity, room = %self.default_room, "No room assigned, using default");
                self.default_room.clone()
            }
            Err(e) => {
                tracing::warn!(%identity, "Room lookup failed, falling back to default: {e}");
                self.default_room.clone()
            }
        }
    }
}
