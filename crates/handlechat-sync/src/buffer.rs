//! Ordered message buffer with broadcast for the display layer.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::{StreamExt, stream::BoxStream};
use handlechat_core::{Message, MessageKey};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const CHANNEL_CAPACITY: usize = 1024;

/// Change applied to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEvent {
    /// An entry was appended at the tail.
    Added { key: MessageKey, message: Message },
    /// The buffer was emptied (detach or re-attach).
    Cleared,
}

/// Write token tied to one attachment of the engine.
///
/// Every reset hands out a new epoch; writes carrying an older epoch are
/// discarded, so a superseded subscription can never touch the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Epoch(u64);

struct Inner {
    entries: Vec<(MessageKey, Message)>,
    epoch: u64,
}

/// Local read-only view of a room's message log.
///
/// Entries are kept in key order. Only the sync engine writes to it; readers
/// take snapshots or follow [`MessageBuffer::updates`].
pub struct MessageBuffer {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<BufferEvent>,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                entries: Vec::with_capacity(32),
                epoch: 0,
            }),
            sender,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the buffer and start a new epoch.
    pub(crate) fn reset(&self) -> Epoch {
        let mut inner = self.write();
        inner.entries.clear();
        inner.epoch += 1;
        let _ = self.sender.send(BufferEvent::Cleared);
        Epoch(inner.epoch)
    }

    /// Load a bootstrap window. Returns how many entries were applied.
    pub(crate) fn seed(&self, epoch: Epoch, entries: Vec<(MessageKey, Message)>) -> usize {
        let mut applied = 0;
        for (key, message) in entries {
            if self.push(epoch, key, message) {
                applied += 1;
            }
        }
        applied
    }

    /// Append at the tail.
    ///
    /// Rejected when `epoch` is stale or `key` does not sort after the
    /// current tail (an entry already delivered by the bootstrap window).
    pub(crate) fn push(&self, epoch: Epoch, key: MessageKey, message: Message) -> bool {
        let mut inner = self.write();
        if inner.epoch != epoch.0 {
            return false;
        }
        if inner.entries.last().is_some_and(|(tail, _)| *tail >= key) {
            return false;
        }

        inner.entries.push((key.clone(), message.clone()));
        let _ = self.sender.send(BufferEvent::Added { key, message });
        true
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of keys and messages, in key order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(MessageKey, Message)> {
        self.read().entries.clone()
    }

    /// Snapshot of the messages only, in key order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.read().entries.iter().map(|(_, m)| m.clone()).collect()
    }

    /// Receiver for live changes only.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.sender.subscribe()
    }

    /// Stream that yields the current contents as `Added` events, then live
    /// changes.
    ///
    /// A reader that lags behind the channel capacity skips the missed events.
    #[must_use]
    pub fn updates(&self) -> BoxStream<'static, BufferEvent> {
        // Snapshot and subscribe under one lock so nothing falls between them.
        let (history, rx) = {
            let inner = self.read();
            let history: Vec<_> = inner
                .entries
                .iter()
                .map(|(key, message)| BufferEvent::Added {
                    key: key.clone(),
                    message: message.clone(),
                })
                .collect();
            (history, self.sender.subscribe())
        };

        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Buffer reader lagged: {e}");
                    None
                }
            }
        });

        futures::stream::iter(history).chain(live).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, text: &str) -> (MessageKey, Message) {
        (MessageKey::from(key), Message::text("alice", text))
    }

    #[test]
    fn test_push_keeps_key_order() {
        let buffer = MessageBuffer::new();
        let epoch = buffer.reset();

        assert!(buffer.push(epoch, MessageKey::from("01"), Message::text("a", "one")));
        assert!(buffer.push(epoch, MessageKey::from("02"), Message::text("a", "two")));
        assert!(!buffer.push(epoch, MessageKey::from("02"), Message::text("a", "dup")));
        assert!(!buffer.push(epoch, MessageKey::from("00"), Message::text("a", "old")));

        let texts: Vec<_> = buffer
            .messages()
            .into_iter()
            .filter_map(|m| m.text)
            .collect();
        assert_eq!(texts, ["one", "two"]);
    }

    #[test]
    fn test_stale_epoch_is_discarded() {
        let buffer = MessageBuffer::new();
        let old = buffer.reset();
        let current = buffer.reset();

        assert!(!buffer.push(old, MessageKey::from("01"), Message::text("a", "late")));
        assert_eq!(buffer.seed(old, vec![entry("01", "late bootstrap")]), 0);
        assert!(buffer.is_empty());

        assert_eq!(buffer.seed(current, vec![entry("01", "x"), entry("02", "y")]), 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_reset_clears_and_notifies() {
        let buffer = MessageBuffer::new();
        let epoch = buffer.reset();
        buffer.seed(epoch, vec![entry("01", "x")]);

        let mut rx = buffer.subscribe();
        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(rx.try_recv().unwrap(), BufferEvent::Cleared);
    }

    #[tokio::test]
    async fn test_updates_replays_then_follows() {
        let buffer = MessageBuffer::new();
        let epoch = buffer.reset();
        buffer.seed(epoch, vec![entry("01", "x")]);

        let mut updates = buffer.updates();
        buffer.push(epoch, MessageKey::from("02"), Message::text("b", "y"));

        assert!(matches!(
            updates.next().await,
            Some(BufferEvent::Added { key, .. }) if key.as_str() == "01"
        ));
        assert!(matches!(
            updates.next().await,
            Some(BufferEvent::Added { key, .. }) if key.as_str() == "02"
        ));
    }
}
