//! Test doubles: recording and failure-injecting capability wrappers.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use handlechat_core::{
    BlobError, BlobKey, BlobRef, BlobStore, DirectoryError, Listener, ListenerHandle, LogError,
    LogPath, Message, MessageKey, RemoteLog, RoomId, UserDirectory, UserId,
};
use handlechat_store::{MemoryBlobStore, MemoryRemoteLog};

use crate::MessageBuffer;

/// A listener call seen by [`RecordingLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCall {
    Subscribe(LogPath),
    Unsubscribe,
}

/// Memory log that records listener calls and can fail on demand.
#[derive(Default)]
pub struct RecordingLog {
    pub inner: MemoryRemoteLog,
    calls: Mutex<Vec<LogCall>>,
    pub fail_subscribe: AtomicBool,
    pub fail_query: AtomicBool,
    pub stall_query: AtomicBool,
    pub fail_append: AtomicBool,
}

impl RecordingLog {
    /// Listener calls in the order they were made.
    pub fn calls(&self) -> Vec<LogCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subscribed(&self) -> Vec<LogPath> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                LogCall::Subscribe(path) => Some(path),
                LogCall::Unsubscribe => None,
            })
            .collect()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == LogCall::Unsubscribe)
            .count()
    }
}

#[async_trait]
impl RemoteLog for RecordingLog {
    async fn append(&self, path: &LogPath, message: &Message) -> Result<MessageKey, LogError> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("append rejected".into()));
        }
        self.inner.append(path, message).await
    }

    async fn query_last_n(
        &self,
        path: &LogPath,
        n: usize,
    ) -> Result<Vec<(MessageKey, Message)>, LogError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("query timed out".into()));
        }
        if self.stall_query.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.inner.query_last_n(path, n).await
    }

    async fn subscribe(&self, path: &LogPath) -> Result<Listener, LogError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("permission denied".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(LogCall::Subscribe(path.clone()));
        self.inner.subscribe(path).await
    }

    fn unsubscribe(&self, handle: ListenerHandle) {
        self.calls.lock().unwrap().push(LogCall::Unsubscribe);
        self.inner.unsubscribe(handle);
    }
}

/// Memory blob store that can fail either phase.
#[derive(Default)]
pub struct FlakyBlobStore {
    pub inner: MemoryBlobStore,
    pub fail_put: AtomicBool,
    pub fail_reference: AtomicBool,
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &BlobKey, data: Bytes) -> Result<BlobRef, BlobError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(BlobError::UploadRejected("connection reset".into()));
        }
        self.inner.put(key, data).await
    }

    async fn download_reference(&self, blob: &BlobRef) -> Result<String, BlobError> {
        if self.fail_reference.load(Ordering::SeqCst) {
            return Err(BlobError::Internal("reference unavailable".into()));
        }
        self.inner.download_reference(blob).await
    }
}

/// Directory whose lookups always fail.
pub struct FailingDirectory;

#[async_trait]
impl UserDirectory for FailingDirectory {
    async fn lookup_room(&self, _identity: &UserId) -> Result<Option<RoomId>, DirectoryError> {
        Err(DirectoryError::Unavailable("lookup timed out".into()))
    }
}

pub fn room_path(room: &str) -> LogPath {
    LogPath::messages(&RoomId::from(room))
}

/// Wait until the buffer holds `len` messages.
pub async fn wait_for_len(buffer: &MessageBuffer, len: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while buffer.len() < len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("buffer never reached expected length");
}

/// Give spawned listener tasks a chance to deliver anything in flight.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
