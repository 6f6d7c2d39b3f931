//! Remote configuration with local defaults and a fetch cache.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::RoomId;

/// Maximum characters in an outbound text message.
pub const KEY_MESSAGE_LENGTH: &str = "max_message_length";
/// Room used when the user directory has no assignment.
pub const KEY_DEFAULT_CHAT_ROOM: &str = "default_chat_room";
/// Size of the bootstrap window.
pub const KEY_NUMBER_MESSAGES: &str = "number_messages";

pub const DEFAULT_MESSAGE_LENGTH: i64 = 200;
pub const DEFAULT_CHAT_ROOM: &str = "default";
pub const DEFAULT_NUMBER_MESSAGES: i64 = 15;

/// Cache expiration for fetched values (1 hour).
pub const CACHE_EXPIRATION: Duration = Duration::from_secs(3600);

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Str(String),
}

impl ConfigValue {
    /// Integer form of the value stored under `key`.
    ///
    /// # Errors
    /// Returns `InvalidValue` if a string value is not numeric.
    pub fn as_int(&self, key: &str) -> Result<i64, ConfigError> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::Str(s) => s.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_owned(),
                reason: format!("{s:?}: {e}"),
            }),
        }
    }

    fn as_string(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Str(s) => s.clone(),
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

/// Configuration error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Config fetch failed: {0}")]
    Fetch(String),
    #[error("Invalid config value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Read access to activated configuration values.
pub trait ConfigProvider: Send + Sync {
    /// Integer value for `key`, or `default` if absent or not numeric.
    fn get_int(&self, key: &str, default: i64) -> i64;

    /// String value for `key`, or `default` if absent.
    fn get_string(&self, key: &str, default: &str) -> String;
}

/// Remote source of configuration values.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch the current remote values.
    async fn fetch(&self) -> Result<HashMap<String, ConfigValue>, ConfigError>;
}

#[derive(Default)]
struct CacheState {
    active: HashMap<String, ConfigValue>,
    fetched_at: Option<Instant>,
}

/// Configuration cache layered over a [`ConfigSource`].
///
/// Lookups resolve activated values first, then the defaults table, then the
/// caller's default. A failed fetch keeps whatever was active before.
pub struct CachedConfig<S> {
    source: S,
    defaults: HashMap<String, ConfigValue>,
    cache_expiration: Duration,
    state: RwLock<CacheState>,
}

impl<S: ConfigSource> CachedConfig<S> {
    /// Create a cache with the standard defaults and a one hour expiration.
    #[must_use]
    pub fn new(source: S) -> Self {
        let defaults = HashMap::from([
            (KEY_MESSAGE_LENGTH.to_owned(), ConfigValue::Int(DEFAULT_MESSAGE_LENGTH)),
            (KEY_DEFAULT_CHAT_ROOM.to_owned(), ConfigValue::from(DEFAULT_CHAT_ROOM)),
            (KEY_NUMBER_MESSAGES.to_owned(), ConfigValue::Int(DEFAULT_NUMBER_MESSAGES)),
        ]);
        Self {
            source,
            defaults,
            cache_expiration: CACHE_EXPIRATION,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Developer mode: every refresh goes to the source.
    #[must_use]
    pub fn developer_mode(mut self) -> Self {
        self.cache_expiration = Duration::ZERO;
        self
    }

    /// Override a default.
    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn cache_expiration(&self) -> Duration {
        self.cache_expiration
    }

    fn is_fresh(&self) -> bool {
        self.state
            .read()
            .ok()
            .and_then(|s| s.fetched_at)
            .is_some_and(|at| at.elapsed() < self.cache_expiration)
    }

    /// Fetch and activate remote values unless the cache is still fresh.
    ///
    /// Returns `true` if new values were activated. Fetch failures are logged
    /// and leave the active values untouched.
    pub async fn refresh(&self) -> bool {
        if self.is_fresh() {
            tracing::debug!("Config cache fresh, skipping fetch");
            return false;
        }

        match self.source.fetch().await {
            Ok(values) => {
                let Ok(mut state) = self.state.write() else {
                    tracing::warn!("Config cache lock poisoned, keeping previous values");
                    return false;
                };
                tracing::info!(keys = values.len(), "Activated fetched config");
                state.active = values;
                state.fetched_at = Some(Instant::now());
                true
            }
            Err(e) => {
                tracing::warn!("Error fetching config, falling back to defaults: {e}");
                false
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<ConfigValue> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.active.get(key).cloned())
            .or_else(|| self.defaults.get(key).cloned())
    }
}

impl<S: ConfigSource> ConfigProvider for CachedConfig<S> {
    fn get_int(&self, key: &str, default: i64) -> i64 {
        int_or_default(key, self.lookup(key).as_ref(), default)
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.lookup(key)
            .map_or_else(|| default.to_owned(), |v| v.as_string())
    }
}

impl ConfigProvider for HashMap<String, ConfigValue> {
    fn get_int(&self, key: &str, default: i64) -> i64 {
        int_or_default(key, self.get(key), default)
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .map_or_else(|| default.to_owned(), ConfigValue::as_string)
    }
}

/// Typed view of the recognised configuration keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub max_message_length: usize,
    pub default_room: RoomId,
    pub bootstrap_size: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_length: positive(DEFAULT_MESSAGE_LENGTH, DEFAULT_MESSAGE_LENGTH),
            default_room: RoomId::from(DEFAULT_CHAT_ROOM),
            bootstrap_size: positive(DEFAULT_NUMBER_MESSAGES, DEFAULT_NUMBER_MESSAGES),
        }
    }
}

impl ChatSettings {
    /// Read settings, replacing non-positive numbers and blank rooms with defaults.
    #[must_use]
    pub fn from_provider(config: &dyn ConfigProvider) -> Self {
        let room = config.get_string(KEY_DEFAULT_CHAT_ROOM, DEFAULT_CHAT_ROOM);
        let room = if room.trim().is_empty() {
            DEFAULT_CHAT_ROOM.to_owned()
        } else {
            room
        };
        Self {
            max_message_length: positive(
                config.get_int(KEY_MESSAGE_LENGTH, DEFAULT_MESSAGE_LENGTH),
                DEFAULT_MESSAGE_LENGTH,
            ),
            default_room: RoomId::new(room),
            bootstrap_size: positive(
                config.get_int(KEY_NUMBER_MESSAGES, DEFAULT_NUMBER_MESSAGES),
                DEFAULT_NUMBER_MESSAGES,
            ),
        }
    }
}

fn int_or_default(key: &str, value: Option<&ConfigValue>, default: i64) -> i64 {
    match value.map(|v| v.as_int(key)) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            tracing::warn!(key, default, "{e}, using default");
            default
        }
        None => default,
    }
}

fn positive(value: i64, default: i64) -> usize {
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .or_else(|| usize::try_from(default).ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    struct StubSource {
        values: Option<HashMap<String, ConfigValue>>,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConfigSource for StubSource {
        async fn fetch(&self) -> Result<HashMap<String, ConfigValue>, ConfigError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.values
                .clone()
                .ok_or_else(|| ConfigError::Fetch("offline".into()))
        }
    }

    fn source(values: Option<HashMap<String, ConfigValue>>) -> (StubSource, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        (
            StubSource {
                values,
                fetches: Arc::clone(&fetches),
            },
            fetches,
        )
    }

    #[test]
    fn test_defaults_without_fetch() {
        let (src, _) = source(None);
        let settings = ChatSettings::from_provider(&CachedConfig::new(src));
        assert_eq!(settings, ChatSettings::default());
        assert_eq!(settings.max_message_length, 200);
        assert_eq!(settings.default_room.as_str(), "default");
        assert_eq!(settings.bootstrap_size, 15);
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back_to_defaults() {
        let (src, fetches) = source(None);
        let config = CachedConfig::new(src);
        assert!(!config.refresh().await);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(config.get_int(KEY_NUMBER_MESSAGES, 0), 15);
    }

    #[tokio::test]
    async fn test_fetched_values_are_cached() {
        let values = HashMap::from([
            (KEY_NUMBER_MESSAGES.to_owned(), ConfigValue::Int(5)),
            (KEY_DEFAULT_CHAT_ROOM.to_owned(), ConfigValue::from("lobby")),
        ]);
        let (src, fetches) = source(Some(values));
        let config = CachedConfig::new(src);

        assert!(config.refresh().await);
        assert!(!config.refresh().await);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let settings = ChatSettings::from_provider(&config);
        assert_eq!(settings.bootstrap_size, 5);
        assert_eq!(settings.default_room.as_str(), "lobby");
        assert_eq!(settings.max_message_length, 200);
    }

    #[tokio::test]
    async fn test_developer_mode_always_fetches() {
        let (src, fetches) = source(Some(HashMap::new()));
        let config = CachedConfig::new(src).developer_mode();
        assert_eq!(config.cache_expiration(), Duration::ZERO);

        config.refresh().await;
        config.refresh().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_numbers_use_defaults() {
        let values = HashMap::from([
            (KEY_NUMBER_MESSAGES.to_owned(), ConfigValue::Int(-3)),
            (KEY_MESSAGE_LENGTH.to_owned(), ConfigValue::from("lots")),
            (KEY_DEFAULT_CHAT_ROOM.to_owned(), ConfigValue::from("  ")),
        ]);
        let settings = ChatSettings::from_provider(&values);
        assert_eq!(settings, ChatSettings::default());
    }

    #[test]
    fn test_string_values_parse_as_int() {
        let values = HashMap::from([(KEY_NUMBER_MESSAGES.to_owned(), ConfigValue::from("20"))]);
        assert_eq!(values.get_int(KEY_NUMBER_MESSAGES, 15), 20);
    }

    #[test]
    fn test_non_numeric_string_is_invalid_value() {
        let err = ConfigValue::from("lots").as_int(KEY_MESSAGE_LENGTH).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == KEY_MESSAGE_LENGTH
        ));
        assert_eq!(ConfigValue::from(" 7 ").as_int(KEY_MESSAGE_LENGTH), Ok(7));

        let values = HashMap::from([(KEY_MESSAGE_LENGTH.to_owned(), ConfigValue::from("lots"))]);
        assert_eq!(values.get_int(KEY_MESSAGE_LENGTH, 200), 200);
    }
}
