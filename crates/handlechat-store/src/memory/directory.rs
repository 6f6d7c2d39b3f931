//! In-memory user directory.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use handlechat_core::{DirectoryError, RoomId, UserDirectory, UserId};

use super::poisoned;

/// In-memory user to room assignments.
pub struct MemoryUserDirectory {
    rooms: RwLock<HashMap<UserId, RoomId>>,
}

impl MemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Assign `identity` to `room`, replacing any previous assignment.
    ///
    /// # Errors
    /// Returns error if the directory lock is poisoned.
    pub fn assign(&self, identity: UserId, room: RoomId) -> Result<(), DirectoryError> {
        self.rooms
            .write()
            .map_err(|e| DirectoryError::Internal(poisoned(e)))?
            .insert(identity, room);
        Ok(())
    }
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn lookup_room(&self, identity: &UserId) -> Result<Option<RoomId>, DirectoryError> {
        Ok(self
            .rooms
            .read()
            .map_err(|e| DirectoryError::Internal(poisoned(e)))?
            .get(identity)
            .cloned())
    }
}
