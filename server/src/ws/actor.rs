use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::{self, broadcast};
use crate::chat::events::ServerEvent;
use crate::chat::presence::PresenceTransition;
use crate::state::AppState;
use crate::ws::protocol;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection loop for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: processes incoming frames, dispatches client commands
///
/// The mpsc sender is the session's transport handle — the registry holds a
/// clone, so any part of the system can push frames to this client.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let session_id = state.sessions.register(&user_id, tx.clone());

    // First session for this user flips them online, everyone hears it.
    if let Some(PresenceTransition::Online) = state.presence.connect(&user_id) {
        broadcast::to_all(
            &state.sessions,
            &ServerEvent::PresenceChanged {
                user_id: user_id.clone(),
                online: true,
                last_seen_at: None,
            },
        );
    }

    // Send the current presence snapshot to the newly connected client
    for online_user in state.presence.online_users() {
        let event = ServerEvent::PresenceChanged {
            user_id: online_user,
            online: true,
            last_seen_at: None,
        };
        if let Ok(text) = serde_json::to_string(&event) {
            let _ = tx.send(Message::Text(text.into()));
        }
    }

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        "WebSocket actor started"
    );

    // Writer task: forwards mpsc messages to the WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Ping task: periodic pings, close on missed pong
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    state.sessions.touch(&session_id);
                    protocol::handle_text_frame(&text, &state, session_id, &user_id).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "Received binary frame (protocol is JSON text), ignoring"
                    );
                }
                Message::Pong(_) => {
                    state.sessions.touch(&session_id);
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        session_id = %session_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    session_id = %session_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, session_id = %session_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort tasks, then run the shared teardown. The idle sweeper
    // may have torn this session down already; teardown is idempotent.
    writer_handle.abort();
    ping_handle.abort();
    chat::disconnect_session(&state, session_id);

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from the mpsc channel and forwards them to
/// the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
    }
}
