//! Live subscription to one room's message log.
//!
//! The engine moves through `Detached -> Attaching -> Attached -> Detached`.
//! Attaching installs the listener, loads the bootstrap window (the last
//! `number_messages` entries), then hands the listener stream to a single
//! pump task that appends child-added events to the buffer.
//!
//! Changed, removed and moved events are accepted but leave the buffer
//! untouched: observed history is treated as append-only.

use std::sync::{Arc, Mutex, PoisonError};

use futures::{StreamExt, stream::BoxStream};
use handlechat_core::{ChildEvent, ListenerHandle, LogError, LogPath, RemoteLog, RoomId};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::buffer::{Epoch, MessageBuffer};

const NOTICE_CAPACITY: usize = 64;

/// Sync engine error.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Subscription to room {room} failed: {source}")]
    Subscription {
        room: RoomId,
        #[source]
        source: LogError,
    },
}

/// Non-fatal problem reported while attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotice {
    /// The bootstrap query failed; the buffer starts empty.
    BootstrapFailed { room: RoomId, error: LogError },
    /// The remote side cancelled the live listener.
    SubscriptionFailed { room: RoomId, reason: String },
}

/// Observable engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Detached,
    Attaching(RoomId),
    Attached(RoomId),
}

/// The live listener for one room.
///
/// Only [`SyncEngine::attach`] creates one and only [`SyncEngine::detach`]
/// consumes it, so an engine holds at most one.
struct Subscription {
    room: RoomId,
    handle: ListenerHandle,
    pump: JoinHandle<()>,
}

/// Removes a listener unless disarmed.
struct ListenerGuard<'a, L: RemoteLog> {
    log: &'a L,
    handle: Option<ListenerHandle>,
}

impl<L: RemoteLog> ListenerGuard<'_, L> {
    fn disarm(mut self) -> Option<ListenerHandle> {
        self.handle.take()
    }
}

impl<L: RemoteLog> Drop for ListenerGuard<'_, L> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.log.unsubscribe(handle);
        }
    }
}

/// Marks a room as attaching until dropped.
struct AttachingGuard<'a> {
    slot: &'a Mutex<Option<RoomId>>,
}

impl<'a> AttachingGuard<'a> {
    fn enter(slot: &'a Mutex<Option<RoomId>>, room: &RoomId) -> Self {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(room.clone());
        Self { slot }
    }
}

impl Drop for AttachingGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Owns the single live subscription and the buffer derived from it.
pub struct SyncEngine<L>
where
    L: RemoteLog,
{
    log: Arc<L>,
    buffer: Arc<MessageBuffer>,
    bootstrap_size: usize,
    subscription: Option<Subscription>,
    attaching: Mutex<Option<RoomId>>,
    notices: broadcast::Sender<EngineNotice>,
}

impl<L> SyncEngine<L>
where
    L: RemoteLog,
{
    /// Create a detached engine with a bootstrap window of `bootstrap_size`.
    #[must_use]
    pub fn new(log: Arc<L>, bootstrap_size: usize) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            log,
            buffer: Arc::new(MessageBuffer::new()),
            bootstrap_size,
            subscription: None,
            attaching: Mutex::new(None),
            notices,
        }
    }

    /// The buffer the display layer reads from.
    #[must_use]
    pub fn buffer(&self) -> Arc<MessageBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Receiver for bootstrap and subscription failures.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Room of the live subscription, if any.
    #[must_use]
    pub fn room(&self) -> Option<&RoomId> {
        self.subscription.as_ref().map(|s| &s.room)
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        if let Some(sub) = &self.subscription {
            return EngineState::Attached(sub.room.clone());
        }
        match &*self.attaching.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(room) => EngineState::Attaching(room.clone()),
            None => EngineState::Detached,
        }
    }

    /// Attach to `room`.
    ///
    /// A no-op when already attached to `room`. When attached elsewhere the
    /// previous subscription is detached first. A failed bootstrap query is
    /// reported as a notice and the engine still attaches; a failed listener
    /// install leaves the engine detached.
    ///
    /// # Errors
    /// Returns error if the live listener cannot be installed.
    pub async fn attach(&mut self, room: RoomId) -> Result<(), SyncError> {
        if self.room() == Some(&room) {
            tracing::debug!(%room, "Already attached");
            return Ok(());
        }
        self.detach();

        let attaching = AttachingGuard::enter(&self.attaching, &room);
        let result = self.install(&room).await;
        drop(attaching);

        let subscription = result?;
        tracing::info!(%room, handle = %subscription.handle, "Attached to room");
        self.subscription = Some(subscription);
        Ok(())
    }

    async fn install(&self, room: &RoomId) -> Result<Subscription, SyncError> {
        let path = LogPath::messages(room);
        let epoch = self.buffer.reset();

        // Listen before querying so nothing appended in between is lost;
        // overlap with the window is dropped by the buffer's key check.
        let listener = self
            .log
            .subscribe(&path)
            .await
            .map_err(|source| SyncError::Subscription {
                room: room.clone(),
                source,
            })?;
        let guard = ListenerGuard {
            log: self.log.as_ref(),
            handle: Some(listener.handle),
        };

        match self.log.query_last_n(&path, self.bootstrap_size).await {
            Ok(window) => {
                let applied = self.buffer.seed(epoch, window);
                tracing::debug!(%room, applied, "Loaded bootstrap window");
            }
            Err(error) => {
                tracing::warn!(%room, "Bootstrap query failed: {error}");
                let _ = self.notices.send(EngineNotice::BootstrapFailed {
                    room: room.clone(),
                    error,
                });
            }
        }

        let pump = tokio::spawn(pump(
            listener.events,
            Arc::clone(&self.buffer),
            epoch,
            room.clone(),
            self.notices.clone(),
        ));

        Ok(Subscription {
            room: room.clone(),
            handle: guard.disarm().unwrap_or(listener.handle),
            pump,
        })
    }

    /// Remove the live listener and clear the buffer.
    ///
    /// A no-op when detached.
    pub fn detach(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };

        self.log.unsubscribe(subscription.handle);
        subscription.pump.abort();
        self.buffer.reset();
        tracing::info!(room = %subscription.room, "Detached from room");
    }
}

impl<L> Drop for SyncEngine<L>
where
    L: RemoteLog,
{
    fn drop(&mut self) {
        self.detach();
    }
}

/// Apply one listener's events to the buffer, in delivery order.
async fn pump(
    mut events: BoxStream<'static, ChildEvent>,
    buffer: Arc<MessageBuffer>,
    epoch: Epoch,
    room: RoomId,
    notices: broadcast::Sender<EngineNotice>,
) {
    while let Some(event) = events.next().await {
        match event {
            ChildEvent::Added { key, message } => {
                if !buffer.push(epoch, key.clone(), message) {
                    tracing::trace!(%room, %key, "Skipped stale or duplicate entry");
                }
            }
            ChildEvent::Changed { key, .. }
            | ChildEvent::Removed { key }
            | ChildEvent::Moved { key, .. } => {
                tracing::trace!(%room, %key, "Ignoring mutation of observed entry");
            }
            ChildEvent::Cancelled { reason } => {
                tracing::warn!(%room, "Listener cancelled: {reason}");
                let _ = notices.send(EngineNotice::SubscriptionFailed {
                    room: room.clone(),
                    reason,
                });
            }
        }
    }
    tracing::debug!(%room, "Listener stream ended");
}
