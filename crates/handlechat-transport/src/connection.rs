//! One client connection: a session controller bridged to the wire protocol.

use std::sync::Arc;

use futures::StreamExt;
use handlechat_core::{BlobSource, BlobStore, ChatSettings, RemoteLog, UserDirectory, UserId};
use handlechat_sync::{AuthEvent, SessionController, Transition};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};

/// Shared capabilities every connection is built from.
pub struct Backends<L, B, D> {
    pub log: Arc<L>,
    pub blobs: Arc<B>,
    pub directory: Arc<D>,
    pub settings: ChatSettings,
}

impl<L, B, D> Clone for Backends<L, B, D> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            blobs: Arc::clone(&self.blobs),
            directory: Arc::clone(&self.directory),
            settings: self.settings.clone(),
        }
    }
}

/// A client's session controller plus the channel back to the client.
///
/// Buffer changes and engine notices are forwarded to the client as they
/// happen. Sends run in their own tasks so a slow upload never blocks
/// session events.
pub struct ChatConnection<L, B, D>
where
    L: RemoteLog,
    B: BlobStore,
    D: UserDirectory,
{
    id: Uuid,
    controller: SessionController<L, B, D>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    forwarders: Vec<JoinHandle<()>>,
}

impl<L, B, D> ChatConnection<L, B, D>
where
    L: RemoteLog + 'static,
    B: BlobStore + 'static,
    D: UserDirectory + 'static,
{
    /// Open a connection with no session.
    #[must_use]
    pub fn open(backends: &Backends<L, B, D>, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        let controller = SessionController::new(
            Arc::clone(&backends.log),
            Arc::clone(&backends.blobs),
            Arc::clone(&backends.directory),
            &backends.settings,
        );

        let buffer_forwarder = {
            let tx = tx.clone();
            let mut updates = controller.buffer().updates();
            tokio::spawn(async move {
                while let Some(event) = updates.next().await {
                    if tx.send(event.into()).is_err() {
                        break;
                    }
                }
            })
        };

        let notice_forwarder = {
            let tx = tx.clone();
            let mut notices = controller.engine().notices();
            tokio::spawn(async move {
                loop {
                    match notices.recv().await {
                        Ok(notice) => {
                            if tx.send(notice.into()).is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Dropped engine notices");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        let id = Uuid::new_v4();
        tracing::debug!(%id, "Connection opened");
        Self {
            id,
            controller,
            tx,
            forwarders: vec![buffer_forwarder, notice_forwarder],
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn controller(&self) -> &SessionController<L, B, D> {
        &self.controller
    }

    fn reply(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg);
    }

    fn error(&self, message: impl Into<String>) {
        self.reply(ServerMessage::Error {
            message: message.into(),
        });
    }

    /// Handle one client message.
    pub async fn dispatch(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Ping => self.reply(ServerMessage::Pong),
            ClientMessage::SignIn {
                identity,
                display_name,
            } => {
                let event = AuthEvent::SignedIn {
                    identity: UserId::new(identity),
                    display_name,
                };
                self.transition(event).await;
            }
            ClientMessage::SignOut => self.transition(AuthEvent::SignedOut).await,
            ClientMessage::SendText { text } => self.send_text(text),
            ClientMessage::SendPhoto { .. } => {
                let Some(data) = msg.decode_photo() else {
                    self.error("Invalid photo data");
                    return;
                };
                let ClientMessage::SendPhoto { file_name, .. } = msg else {
                    return;
                };
                self.send_photo(BlobSource::new(file_name, data));
            }
        }
    }

    async fn transition(&mut self, event: AuthEvent) {
        match self.controller.handle(event).await {
            Ok(Transition::Activated(session)) => self.reply(ServerMessage::SessionActive {
                room: session.room,
                display_name: session.display_name,
            }),
            Ok(Transition::SignedOut) => self.reply(ServerMessage::SignedOut),
            Err(e) => self.error(e.to_string()),
        }
    }

    fn send_text(&self, text: String) {
        let Some(session) = self.controller.session().cloned() else {
            self.error("No active session");
            return;
        };
        let outbound = self.controller.outbound();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Err(e) = outbound.send_text(&session, &text).await {
                let _ = tx.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        });
    }

    fn send_photo(&self, source: BlobSource) {
        let Some(session) = self.controller.session().cloned() else {
            self.error("No active session");
            return;
        };
        let outbound = self.controller.outbound();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Err(e) = outbound.send_attachment(&session, source).await {
                let _ = tx.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        });
    }
}

impl<L, B, D> Drop for ChatConnection<L, B, D>
where
    L: RemoteLog,
    B: BlobStore,
    D: UserDirectory,
{
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
        tracing::debug!(id = %self.id, "Connection closed");
    }
}
