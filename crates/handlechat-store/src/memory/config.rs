//! In-memory config source.

use std::{
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use handlechat_core::{ConfigError, ConfigSource, ConfigValue};

use super::poisoned;

/// Config source backed by a mutable map.
///
/// Can be switched offline to exercise the fetch fallback.
pub struct MemoryConfigSource {
    values: RwLock<HashMap<String, ConfigValue>>,
    offline: AtomicBool,
}

impl MemoryConfigSource {
    /// Create an empty, online source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Set a remote value.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn set(&self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Result<(), ConfigError> {
        self.values
            .write()
            .map_err(|e| ConfigError::Fetch(poisoned(e)))?
            .insert(key.into(), value.into());
        Ok(())
    }

    /// Make subsequent fetches fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl Default for MemoryConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn fetch(&self) -> Result<HashMap<String, ConfigValue>, ConfigError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ConfigError::Fetch("config source offline".into()));
        }
        Ok(self
            .values
            .read()
            .map_err(|e| ConfigError::Fetch(poisoned(e)))?
            .clone())
    }
}
