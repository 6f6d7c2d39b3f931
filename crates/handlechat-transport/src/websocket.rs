//! WebSocket transport for chat clients.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use handlechat_core::{BlobStore, RemoteLog, UserDirectory};
use tokio::sync::mpsc;

use crate::{
    connection::{Backends, ChatConnection},
    protocol::{ClientMessage, ServerMessage},
};

/// WebSocket handler state.
pub struct WsState<L, B, D> {
    /// Capabilities shared by every connection.
    pub backends: Arc<Backends<L, B, D>>,
}

impl<L, B, D> Clone for WsState<L, B, D> {
    fn clone(&self) -> Self {
        Self {
            backends: Arc::clone(&self.backends),
        }
    }
}

impl<L, B, D> WsState<L, B, D> {
    /// Create new WebSocket state.
    #[must_use]
    pub fn new(backends: Backends<L, B, D>) -> Self {
        Self {
            backends: Arc::new(backends),
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<L, B, D>(
    ws: WebSocketUpgrade,
    State(state): State<WsState<L, B, D>>,
) -> impl IntoResponse
where
    L: RemoteLog + 'static,
    B: BlobStore + 'static,
    D: UserDirectory + 'static,
{
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket<L, B, D>(socket: WebSocket, state: WsState<L, B, D>)
where
    L: RemoteLog + 'static,
    B: BlobStore + 'static,
    D: UserDirectory + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut connection = ChatConnection::open(&state.backends, tx.clone());

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(id = %connection.id(), "WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        connection.dispatch(client_msg).await;
    }

    drop(connection);
    send_task.abort();
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(backends));
/// ```
#[must_use]
pub fn create_ws_router<L, B, D>(backends: Backends<L, B, D>) -> axum::Router
where
    L: RemoteLog + 'static,
    B: BlobStore + 'static,
    D: UserDirectory + 'static,
{
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<L, B, D>))
        .with_state(WsState::new(backends))
}
