//! Example chat server backed by the in-memory store.
//!
//! Run with: cargo run -p web-chat-demo
//!
//! Then open http://localhost:3000 in two browser tabs.
//!
//! Environment:
//! - `HANDLECHAT_ROOMS` - user to room assignments, e.g. `u1=room7,u2=lobby`
//! - `HANDLECHAT_DEFAULT_ROOM` - remote value for `default_chat_room`
//! - `HANDLECHAT_HISTORY` - remote value for `number_messages`
//! - `HANDLECHAT_DEV` - set to refetch config on every refresh

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use handlechat_core::{
    CachedConfig, ChatSettings, RoomId, UserId,
    config::{KEY_DEFAULT_CHAT_ROOM, KEY_NUMBER_MESSAGES},
};
use handlechat_store::{MemoryBlobStore, MemoryConfigSource, MemoryRemoteLog, MemoryUserDirectory};
use handlechat_transport::{Backends, websocket::create_ws_router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = load_settings().await?;
    tracing::info!(
        default_room = %settings.default_room,
        history = settings.bootstrap_size,
        max_length = settings.max_message_length,
        "Loaded chat settings"
    );

    let directory = MemoryUserDirectory::new();
    if let Ok(assignments) = std::env::var("HANDLECHAT_ROOMS") {
        for (user, room) in parse_assignments(&assignments) {
            tracing::info!(%user, %room, "Assigned room");
            directory.assign(user, room)?;
        }
    }

    let backends = Backends {
        log: Arc::new(MemoryRemoteLog::new()),
        blobs: Arc::new(MemoryBlobStore::new()),
        directory: Arc::new(directory),
        settings,
    };

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(backends))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Seed the memory config source from the environment and fetch once.
async fn load_settings() -> anyhow::Result<ChatSettings> {
    let source = MemoryConfigSource::new();
    if let Ok(room) = std::env::var("HANDLECHAT_DEFAULT_ROOM") {
        source.set(KEY_DEFAULT_CHAT_ROOM, room.as_str())?;
    }
    if let Ok(history) = std::env::var("HANDLECHAT_HISTORY") {
        let history: i64 = history
            .parse()
            .with_context(|| format!("HANDLECHAT_HISTORY is not a number: {history}"))?;
        source.set(KEY_NUMBER_MESSAGES, history)?;
    }

    let mut config = CachedConfig::new(source);
    if std::env::var_os("HANDLECHAT_DEV").is_some() {
        config = config.developer_mode();
    }
    config.refresh().await;

    Ok(ChatSettings::from_provider(&config))
}

fn parse_assignments(raw: &str) -> Vec<(UserId, RoomId)> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(user, room)| (user.trim(), room.trim()))
        .filter(|(user, room)| !user.is_empty() && !room.is_empty())
        .map(|(user, room)| (UserId::from(user), RoomId::from(room)))
        .collect()
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>handlechat</title>
    <style>
        body { font-family: sans-serif; max-width: 640px; margin: 2em auto; }
        #messages { list-style: none; padding: 0; border: 1px solid #ccc; height: 360px; overflow-y: auto; }
        #messages li { padding: 4px 8px; }
        #messages .author { font-weight: bold; margin-right: 6px; }
        #messages img { max-width: 240px; display: block; }
        #status { color: #666; }
    </style>
</head>
<body>
    <div>
        <input id="identity" placeholder="user id" value="u1">
        <input id="name" placeholder="display name" value="Alice">
        <button id="signin">Sign in</button>
        <button id="signout">Sign out</button>
        <span id="status">signed out</span>
    </div>
    <ul id="messages"></ul>
    <div>
        <input id="text" maxlength="200" size="50">
        <button id="send" disabled>Send</button>
        <input id="photo" type="file" accept="image/jpeg">
    </div>
    <script>
        const ws = new WebSocket(`ws://${location.host}/ws`);
        const list = document.getElementById('messages');
        const status = document.getElementById('status');
        const text = document.getElementById('text');
        const send = document.getElementById('send');

        ws.onmessage = (event) => {
            const msg = JSON.parse(event.data);
            switch (msg.type) {
                case 'session_active':
                    status.textContent = `${msg.display_name} in ${msg.room}`;
                    break;
                case 'signed_out':
                    status.textContent = 'signed out';
                    break;
                case 'cleared':
                    list.innerHTML = '';
                    break;
                case 'message_added': {
                    const li = document.createElement('li');
                    const author = document.createElement('span');
                    author.className = 'author';
                    author.textContent = msg.message.author;
                    li.appendChild(author);
                    if (msg.message.photo_ref) {
                        const img = document.createElement('img');
                        img.src = msg.message.photo_ref;
                        img.alt = msg.message.photo_ref;
                        li.appendChild(img);
                    } else {
                        li.appendChild(document.createTextNode(msg.message.text || ''));
                    }
                    list.appendChild(li);
                    list.scrollTop = list.scrollHeight;
                    break;
                }
                case 'notice':
                case 'error':
                    status.textContent = msg.message;
                    break;
            }
        };

        document.getElementById('signin').onclick = () => ws.send(JSON.stringify({
            type: 'sign_in',
            identity: document.getElementById('identity').value,
            display_name: document.getElementById('name').value,
        }));
        document.getElementById('signout').onclick = () => ws.send(JSON.stringify({ type: 'sign_out' }));

        text.oninput = () => { send.disabled = text.value.trim().length === 0; };
        send.onclick = () => {
            ws.send(JSON.stringify({ type: 'send_text', text: text.value }));
            text.value = '';
            send.disabled = true;
        };

        document.getElementById('photo').onchange = (event) => {
            const file = event.target.files[0];
            if (!file) return;
            const reader = new FileReader();
            reader.onload = () => {
                const data = reader.result.split(',')[1];
                ws.send(JSON.stringify({ type: 'send_photo', file_name: file.name, data }));
            };
            reader.readAsDataURL(file);
        };

        setInterval(() => ws.send(JSON.stringify({ type: 'ping' })), 30000);
    </script>
</body>
</html>
"#;
