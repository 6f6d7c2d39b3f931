//! Outbound message creation.
//!
//! Sends never touch the local buffer: a sent message shows up through the
//! engine's live stream like any other.

use std::sync::Arc;

use handlechat_core::{
    BlobError, BlobKey, BlobRef, BlobSource, BlobStore, LogError, Message, MessageKey,
    PendingUpload, RemoteLog, Session,
};
use tokio::sync::Mutex;

/// Outbound send error.
#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("No active session")]
    NoSession,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Attachment has no file name: {0}")]
    InvalidSource(String),
    #[error("Upload failed: {0}")]
    Upload(#[source] BlobError),
    #[error("Could not resolve download reference: {0}")]
    ResolveReference(#[source] BlobError),
    #[error("Append failed: {0}")]
    Append(#[from] LogError),
}

/// Serializes message appends for a session's room.
pub struct OutboundCoordinator<L, B>
where
    L: RemoteLog,
    B: BlobStore,
{
    log: Arc<L>,
    blobs: Arc<B>,
    max_message_length: usize,
    append_lock: Mutex<()>,
}

impl<L, B> OutboundCoordinator<L, B>
where
    L: RemoteLog,
    B: BlobStore,
{
    /// Create a coordinator truncating text at `max_message_length` characters.
    #[must_use]
    pub fn new(log: Arc<L>, blobs: Arc<B>, max_message_length: usize) -> Self {
        Self {
            log,
            blobs,
            max_message_length,
            append_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Append a text message authored by the session's user.
    ///
    /// Text over the length limit is truncated, then rejected if blank.
    ///
    /// # Errors
    /// Returns error if the text is blank or the append fails.
    pub async fn send_text(&self, session: &Session, text: &str) -> Result<MessageKey, OutboundError> {
        let text = match text.char_indices().nth(self.max_message_length) {
            Some((cut, _)) => {
                tracing::debug!(limit = self.max_message_length, "Truncating outbound text");
                &text[..cut]
            }
            None => text,
        };

        if text.trim().is_empty() {
            return Err(OutboundError::EmptyMessage);
        }

        self.append(session, Message::text(&session.display_name, text))
            .await
    }

    /// Upload an attachment, then append a photo message referencing it.
    ///
    /// No message is appended unless the upload and reference resolution
    /// both succeed.
    ///
    /// # Errors
    /// Returns error if the source has no file name, or any phase fails.
    pub async fn send_attachment(
        &self,
        session: &Session,
        source: BlobSource,
    ) -> Result<MessageKey, OutboundError> {
        let (pending, blob) = self.upload(session, source).await?;

        let photo_ref = self
            .blobs
            .download_reference(&blob)
            .await
            .map_err(|e| {
                tracing::warn!(key = %pending.blob_key, "Download reference failed: {e}");
                OutboundError::ResolveReference(e)
            })?;

        tracing::debug!(key = %pending.blob_key, origin = %pending.local_origin, "Upload resolved");
        self.append(session, Message::photo(&session.display_name, photo_ref))
            .await
    }

    /// Phase one of an attachment send: store the bytes.
    ///
    /// # Errors
    /// Returns error if the source has no file name or the upload fails.
    pub async fn upload(
        &self,
        session: &Session,
        source: BlobSource,
    ) -> Result<(PendingUpload, BlobRef), OutboundError> {
        let basename = source
            .basename()
            .ok_or_else(|| OutboundError::InvalidSource(source.origin.clone()))?;

        let pending = PendingUpload {
            blob_key: BlobKey::for_attachment(&session.room, basename),
            local_origin: source.origin.clone(),
        };

        let blob = self
            .blobs
            .put(&pending.blob_key, source.data)
            .await
            .map_err(|e| {
                tracing::warn!(key = %pending.blob_key, "Upload failed: {e}");
                OutboundError::Upload(e)
            })?;

        Ok((pending, blob))
    }

    async fn append(&self, session: &Session, message: Message) -> Result<MessageKey, OutboundError> {
        let path = session.log_path();
        let _guard = self.append_lock.lock().await;

        match self.log.append(&path, &message).await {
            Ok(key) => {
                tracing::debug!(%path, %key, "Appended message");
                Ok(key)
            }
            Err(e) => {
                tracing::error!(%path, "Append failed: {e}");
                Err(OutboundError::Append(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use handlechat_core::{LogPath, RoomId, UserId};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::testing::{FlakyBlobStore, RecordingLog};

    struct Fixture {
        log: Arc<RecordingLog>,
        blobs: Arc<FlakyBlobStore>,
        outbound: OutboundCoordinator<RecordingLog, FlakyBlobStore>,
        session: Session,
    }

    fn fixture(max_len: usize) -> Fixture {
        let log = Arc::new(RecordingLog::default());
        let blobs = Arc::new(FlakyBlobStore::default());
        let outbound = OutboundCoordinator::new(Arc::clone(&log), Arc::clone(&blobs), max_len);
        let session = Session::new(UserId::from("u1"), "alice", RoomId::from("default"));
        Fixture {
            log,
            blobs,
            outbound,
            session,
        }
    }

    fn path(f: &Fixture) -> LogPath {
        f.session.log_path()
    }

    #[tokio::test]
    async fn test_send_text() {
        let f = fixture(200);
        let key = assert_ok!(f.outbound.send_text(&f.session, "hi").await);

        let entries = f.log.inner.entries(&path(&f)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, key);
        assert_eq!(entries[0].1.text.as_deref(), Some("hi"));
        assert_eq!(entries[0].1.author, "alice");
        assert_eq!(entries[0].1.photo_ref, None);
    }

    #[tokio::test]
    async fn test_blank_text_rejected() {
        let f = fixture(200);
        assert!(matches!(
            f.outbound.send_text(&f.session, "   \n").await,
            Err(OutboundError::EmptyMessage)
        ));
        assert!(f.log.inner.is_empty(&path(&f)));
    }

    #[tokio::test]
    async fn test_long_text_truncated_on_char_boundary() {
        let f = fixture(5);
        f.outbound.send_text(&f.session, "héllo wörld").await.unwrap();

        let entries = f.log.inner.entries(&path(&f)).unwrap();
        assert_eq!(entries[0].1.text.as_deref(), Some("héllo"));
    }

    #[tokio::test]
    async fn test_text_blank_after_truncation_rejected() {
        let f = fixture(2);
        assert!(matches!(
            f.outbound.send_text(&f.session, "   hello").await,
            Err(OutboundError::EmptyMessage)
        ));

        let f = fixture(0);
        assert!(matches!(
            f.outbound.send_text(&f.session, "hello").await,
            Err(OutboundError::EmptyMessage)
        ));
        assert!(f.log.inner.is_empty(&path(&f)));
    }

    #[tokio::test]
    async fn test_append_failure_is_reported() {
        let f = fixture(200);
        f.log.fail_append.store(true, Ordering::SeqCst);

        let err = assert_err!(f.outbound.send_text(&f.session, "hi").await);
        assert!(matches!(err, OutboundError::Append(LogError::Unavailable(_))));
        assert!(f.log.inner.is_empty(&path(&f)));
    }

    #[tokio::test]
    async fn test_send_attachment() {
        let f = fixture(200);
        let source = BlobSource::new("/sdcard/DCIM/cat.jpg", b"jpeg bytes".to_vec());
        f.outbound.send_attachment(&f.session, source).await.unwrap();

        let stored = f
            .blobs
            .inner
            .get(&BlobKey::from("chat_photos/default/cat.jpg"))
            .unwrap();
        assert_eq!(&stored[..], b"jpeg bytes");

        let entries = f.log.inner.entries(&path(&f)).unwrap();
        assert_eq!(entries.len(), 1);
        let message = &entries[0].1;
        assert_eq!(message.text, None);
        assert_eq!(message.author, "alice");
        assert!(
            message
                .photo_ref
                .as_deref()
                .is_some_and(|r| r.starts_with("memory://blobs/chat_photos/default/cat.jpg"))
        );
    }

    #[tokio::test]
    async fn test_upload_failure_appends_nothing() {
        let f = fixture(200);
        f.outbound.send_text(&f.session, "before").await.unwrap();
        f.blobs.fail_put.store(true, Ordering::SeqCst);

        for name in ["a.jpg", "b.png", "c.gif"] {
            let source = BlobSource::new(format!("/tmp/{name}"), vec![0_u8; 16]);
            let err = f.outbound.send_attachment(&f.session, source).await.unwrap_err();
            assert!(matches!(err, OutboundError::Upload(BlobError::UploadRejected(_))));
        }

        assert_eq!(f.log.inner.len(&path(&f)), 1);
        assert!(f.blobs.inner.is_empty());
    }

    #[tokio::test]
    async fn test_reference_failure_appends_nothing() {
        let f = fixture(200);
        f.blobs.fail_reference.store(true, Ordering::SeqCst);

        let source = BlobSource::new("/tmp/a.jpg", vec![1_u8]);
        let err = f.outbound.send_attachment(&f.session, source).await.unwrap_err();
        assert!(matches!(err, OutboundError::ResolveReference(_)));
        assert!(f.log.inner.is_empty(&path(&f)));
    }

    #[tokio::test]
    async fn test_upload_phase_alone_appends_nothing() {
        let f = fixture(200);
        let (pending, blob) = f
            .outbound
            .upload(&f.session, BlobSource::new("/tmp/a.jpg", vec![1_u8]))
            .await
            .unwrap();

        assert_eq!(pending.blob_key, blob.key);
        assert_eq!(pending.local_origin, "/tmp/a.jpg");
        assert!(f.log.inner.is_empty(&path(&f)));
    }

    #[tokio::test]
    async fn test_source_without_name_rejected() {
        let f = fixture(200);
        let err = f
            .outbound
            .send_attachment(&f.session, BlobSource::new("/tmp/", vec![1_u8]))
            .await
            .unwrap_err();
        assert!(matches!(err, OutboundError::InvalidSource(_)));
        assert!(f.blobs.inner.is_empty());
    }
}
