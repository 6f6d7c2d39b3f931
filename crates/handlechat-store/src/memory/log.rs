//! In-memory remote log.

use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

use async_trait::async_trait;
use futures::StreamExt;
use handlechat_core::{
    ChildEvent, Listener, ListenerHandle, LogError, LogPath, Message, MessageKey, RemoteLog,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::poisoned;

struct Subscriber {
    path: LogPath,
    sender: mpsc::UnboundedSender<ChildEvent>,
}

#[derive(Default)]
struct Inner {
    logs: HashMap<LogPath, BTreeMap<MessageKey, Message>>,
    subscribers: HashMap<ListenerHandle, Subscriber>,
    next_seq: u64,
}

impl Inner {
    fn notify(&mut self, path: &LogPath, event: &ChildEvent) {
        // Receivers dropped without unsubscribing are pruned here.
        self.subscribers
            .retain(|_, sub| sub.path != *path || sub.sender.send(event.clone()).is_ok());
    }
}

/// In-memory remote log.
///
/// Keys are zero-padded sequence numbers, so lexicographic key order equals
/// append order. Appends and event fan-out happen under one lock, which keeps
/// delivery in key order for every listener.
pub struct MemoryRemoteLog {
    inner: RwLock<Inner>,
}

impl MemoryRemoteLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of entries at `path`.
    #[must_use]
    pub fn len(&self, path: &LogPath) -> usize {
        self.inner
            .read()
            .map(|inner| inner.logs.get(path).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Whether `path` has no entries.
    #[must_use]
    pub fn is_empty(&self, path: &LogPath) -> bool {
        self.len(path) == 0
    }

    /// All entries at `path`, in key order.
    ///
    /// # Errors
    /// Returns error if the log lock is poisoned.
    pub fn entries(&self, path: &LogPath) -> Result<Vec<(MessageKey, Message)>, LogError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| LogError::Internal(poisoned(e)))?;
        Ok(inner
            .logs
            .get(path)
            .map(|log| log.iter().map(|(k, m)| (k.clone(), m.clone())).collect())
            .unwrap_or_default())
    }

    /// Number of installed listeners across all paths.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.subscribers.len())
            .unwrap_or(0)
    }

    /// Overwrite an existing entry, notifying listeners with `Changed`.
    ///
    /// # Errors
    /// Returns `NotFound` if `key` does not exist at `path`.
    pub fn update(&self, path: &LogPath, key: &MessageKey, message: Message) -> Result<(), LogError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| LogError::Internal(poisoned(e)))?;
        let entry = inner
            .logs
            .get_mut(path)
            .and_then(|log| log.get_mut(key))
            .ok_or_else(|| LogError::NotFound(key.clone()))?;
        *entry = message.clone();

        inner.notify(
            path,
            &ChildEvent::Changed {
                key: key.clone(),
                message,
            },
        );
        Ok(())
    }

    /// Delete an entry, notifying listeners with `Removed`.
    ///
    /// # Errors
    /// Returns `NotFound` if `key` does not exist at `path`.
    pub fn remove(&self, path: &LogPath, key: &MessageKey) -> Result<Message, LogError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| LogError::Internal(poisoned(e)))?;
        let removed = inner
            .logs
            .get_mut(path)
            .and_then(|log| log.remove(key))
            .ok_or_else(|| LogError::NotFound(key.clone()))?;

        inner.notify(path, &ChildEvent::Removed { key: key.clone() });
        Ok(removed)
    }

    /// Terminate every listener at `path` with `Cancelled`.
    ///
    /// # Errors
    /// Returns error if the log lock is poisoned.
    pub fn cancel_listeners(&self, path: &LogPath, reason: &str) -> Result<(), LogError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| LogError::Internal(poisoned(e)))?;
        inner.notify(
            path,
            &ChildEvent::Cancelled {
                reason: reason.to_owned(),
            },
        );
        Ok(())
    }
}

impl Default for MemoryRemoteLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteLog for MemoryRemoteLog {
    async fn append(&self, path: &LogPath, message: &Message) -> Result<MessageKey, LogError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| LogError::Internal(poisoned(e)))?;

        inner.next_seq += 1;
        let key = MessageKey::new(format!("{:020}", inner.next_seq));
        inner
            .logs
            .entry(path.clone())
            .or_default()
            .insert(key.clone(), message.clone());

        tracing::trace!(%path, %key, "Appended log entry");
        inner.notify(
            path,
            &ChildEvent::Added {
                key: key.clone(),
                message: message.clone(),
            },
        );

        Ok(key)
    }

    async fn query_last_n(
        &self,
        path: &LogPath,
        n: usize,
    ) -> Result<Vec<(MessageKey, Message)>, LogError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| LogError::Internal(poisoned(e)))?;

        let Some(log) = inner.logs.get(path) else {
            return Ok(Vec::new());
        };

        let mut tail: Vec<_> = log
            .iter()
            .rev()
            .take(n)
            .map(|(k, m)| (k.clone(), m.clone()))
            .collect();
        tail.reverse();
        Ok(tail)
    }

    async fn subscribe(&self, path: &LogPath) -> Result<Listener, LogError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ListenerHandle::new();

        self.inner
            .write()
            .map_err(|e| LogError::Internal(poisoned(e)))?
            .subscribers
            .insert(
                handle,
                Subscriber {
                    path: path.clone(),
                    sender,
                },
            );

        tracing::debug!(%path, %handle, "Installed listener");
        Ok(Listener {
            handle,
            events: UnboundedReceiverStream::new(receiver).boxed(),
        })
    }

    fn unsubscribe(&self, handle: ListenerHandle) {
        match self.inner.write() {
            Ok(mut inner) => {
                if inner.subscribers.remove(&handle).is_some() {
                    tracing::debug!(%handle, "Removed listener");
                }
            }
            Err(e) => tracing::error!("Failed to remove listener {handle}: {e}"),
        }
    }
}
