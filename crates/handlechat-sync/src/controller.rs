//! Session lifecycle: binds the sync engine to sign-in and sign-out events.
//!
//! ```text
//! NoSession --SignedIn--> Binding(identity) --room resolved--> Active(session)
//!     ^                                                              |
//!     +---------------------------SignedOut--------------------------+
//! ```
//!
//! The engine is attached exactly when the state is `Active`. Every
//! transition detaches before it attaches.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use handlechat_core::{
    ANONYMOUS, BlobSource, BlobStore, ChatSettings, MessageKey, RemoteLog, Session, UserDirectory,
    UserId,
};

use crate::{
    MessageBuffer,
    engine::{SyncEngine, SyncError},
    outbound::{OutboundCoordinator, OutboundError},
    resolver::SessionResolver,
};

/// Authentication event from the credential layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn {
        identity: UserId,
        display_name: String,
    },
    SignedOut,
}

/// Controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    /// Resolving the room for this identity.
    Binding(UserId),
    Active(Session),
}

/// Result of handling an [`AuthEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The session is bound and the engine attached to its room.
    Activated(Session),
    /// The session ended; the credential layer should prompt for sign-in.
    SignedOut,
}

/// Controller error.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Outbound(#[from] OutboundError),
}

/// Drives the sync engine and outbound path from session transitions.
pub struct SessionController<L, B, D>
where
    L: RemoteLog,
    B: BlobStore,
    D: UserDirectory,
{
    resolver: SessionResolver<D>,
    engine: SyncEngine<L>,
    outbound: Arc<OutboundCoordinator<L, B>>,
    state: SessionState,
}

impl<L, B, D> SessionController<L, B, D>
where
    L: RemoteLog,
    B: BlobStore,
    D: UserDirectory,
{
    /// Create a controller with no session.
    #[must_use]
    pub fn new(log: Arc<L>, blobs: Arc<B>, directory: Arc<D>, settings: &ChatSettings) -> Self {
        Self {
            resolver: SessionResolver::new(directory, settings.default_room.clone()),
            engine: SyncEngine::new(Arc::clone(&log), settings.bootstrap_size),
            outbound: Arc::new(OutboundCoordinator::new(
                log,
                blobs,
                settings.max_message_length,
            )),
            state: SessionState::NoSession,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// The active session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match &self.state {
            SessionState::Active(session) => Some(session),
            _ => None,
        }
    }

    /// Display name of the active session, or the anonymous sentinel.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.session().map_or(ANONYMOUS, |s| s.display_name.as_str())
    }

    #[must_use]
    pub const fn engine(&self) -> &SyncEngine<L> {
        &self.engine
    }

    /// Buffer of the current room.
    #[must_use]
    pub fn buffer(&self) -> Arc<MessageBuffer> {
        self.engine.buffer()
    }

    /// Outbound path, for sends that outlive a borrow of the controller.
    #[must_use]
    pub fn outbound(&self) -> Arc<OutboundCoordinator<L, B>> {
        Arc::clone(&self.outbound)
    }

    /// Apply one authentication event.
    ///
    /// # Errors
    /// Returns error if the engine cannot attach to the resolved room.
    pub async fn handle(&mut self, event: AuthEvent) -> Result<Transition, ControllerError> {
        match event {
            AuthEvent::SignedIn {
                identity,
                display_name,
            } => Ok(Transition::Activated(
                self.sign_in(identity, display_name).await?,
            )),
            AuthEvent::SignedOut => {
                self.sign_out();
                Ok(Transition::SignedOut)
            }
        }
    }

    /// Tear down any previous session, resolve the room, and attach.
    ///
    /// # Errors
    /// Returns error if the engine cannot attach; the controller is then
    /// left with no session.
    pub async fn sign_in(
        &mut self,
        identity: UserId,
        display_name: String,
    ) -> Result<Session, ControllerError> {
        self.engine.detach();
        self.state = SessionState::Binding(identity.clone());

        let room = self.resolver.resolve(&identity).await;

        if let Err(e) = self.engine.attach(room.clone()).await {
            tracing::error!(%identity, %room, "Session activation failed: {e}");
            self.state = SessionState::NoSession;
            return Err(e.into());
        }

        let session = Session::new(identity, display_name, room);
        tracing::info!(
            identity = ?session.identity,
            room = %session.room,
            "Session active"
        );
        self.state = SessionState::Active(session.clone());
        debug_assert!(self.engine.is_attached());
        Ok(session)
    }

    /// End the session and detach.
    pub fn sign_out(&mut self) {
        if let SessionState::Active(session) = &self.state {
            tracing::info!(room = %session.room, "Session ended");
        }
        self.state = SessionState::NoSession;
        self.engine.detach();
        debug_assert!(!self.engine.is_attached());
    }

    /// Send text as the active session's user.
    ///
    /// # Errors
    /// Returns error if there is no session or the send fails.
    pub async fn send_text(&self, text: &str) -> Result<MessageKey, ControllerError> {
        let session = self.session().ok_or(OutboundError::NoSession)?;
        Ok(self.outbound.send_text(session, text).await?)
    }

    /// Send an attachment as the active session's user.
    ///
    /// # Errors
    /// Returns error if there is no session or any send phase fails.
    pub async fn send_attachment(&self, source: BlobSource) -> Result<MessageKey, ControllerError> {
        let session = self.session().ok_or(OutboundError::NoSession)?;
        Ok(self.outbound.send_attachment(session, source).await?)
    }

    /// Handle events until the stream ends.
    pub async fn run<S>(&mut self, events: S)
    where
        S: Stream<Item = AuthEvent>,
    {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            match self.handle(event).await {
                Ok(Transition::Activated(session)) => {
                    tracing::debug!(room = %session.room, "Handled sign-in");
                }
                Ok(Transition::SignedOut) => {
                    tracing::info!("Signed out, credentials required");
                }
                Err(e) => tracing::error!("Session transition failed: {e}"),
            }
        }
    }
}
