//! Client command frames and their dispatch.
//!
//! Inbound frames are a tagged JSON envelope: a `cmd` discriminator, an
//! optional client-chosen `id`, and the command's own fields flattened in.
//! Every command gets exactly one reply frame (`ack` or `error`) echoing
//! that id; side effects reach other sessions as server events.

use serde::Deserialize;

use crate::chat::events::ServerEvent;
use crate::chat::messages::{self, NewMessage};
use crate::chat::rooms::RoomId;
use crate::chat::{self, broadcast, reactions, typing};
use crate::db::models::MessageKind;
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::SessionId;

#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    /// Client-chosen correlation id, echoed in the reply.
    pub id: Option<String>,
    #[serde(flatten)]
    pub cmd: ClientCommand,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    Join {
        room_id: String,
    },
    Leave {
        room_id: String,
    },
    Post {
        room_id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        kind: MessageKind,
        media_url: Option<String>,
        idempotency_key: Option<String>,
    },
    Typing {
        room_id: String,
        is_typing: bool,
    },
    React {
        message_id: i64,
        emoji: String,
    },
    DeleteMessage {
        message_id: i64,
    },
}

/// Handle one inbound text frame from `session_id` and send the reply.
pub async fn handle_text_frame(
    text: &str,
    state: &AppState,
    session_id: SessionId,
    user_id: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "Unparseable client frame");
            broadcast::to_session(
                &state.sessions,
                &session_id,
                &ServerEvent::error(None, 400, "malformed frame"),
            );
            return;
        }
    };

    let request_id = frame.id.clone();
    let reply = match dispatch(frame.cmd, state, session_id, user_id, request_id.clone()).await {
        Ok(reply) => reply,
        Err(e) => ServerEvent::error(request_id, e.code(), e.to_string()),
    };
    broadcast::to_session(&state.sessions, &session_id, &reply);
}

async fn dispatch(
    cmd: ClientCommand,
    state: &AppState,
    session_id: SessionId,
    user_id: &str,
    request_id: Option<String>,
) -> Result<ServerEvent, ApiError> {
    // The idle sweeper may have torn this session down while the socket was
    // still open; a client that ignores the Close frame gets no further say.
    if !state.sessions.contains(&session_id) {
        return Err(ApiError::Unauthorized);
    }

    match cmd {
        ClientCommand::Join { room_id } => {
            let room = parse_room(&room_id)?;
            chat::join_room(state, session_id, user_id, &room).await?;
            Ok(ServerEvent::ack(request_id))
        }

        ClientCommand::Leave { room_id } => {
            let room = parse_room(&room_id)?;
            chat::leave_room(state, session_id, user_id, &room);
            Ok(ServerEvent::ack(request_id))
        }

        ClientCommand::Post {
            room_id,
            content,
            kind,
            media_url,
            idempotency_key,
        } => {
            let room = parse_room(&room_id)?;
            let (message, _created) = messages::post_message(
                state,
                &room,
                user_id,
                Some(session_id),
                NewMessage {
                    kind,
                    content,
                    media_url,
                    idempotency_key,
                },
            )
            .await?;
            // The posting session's copy of the message rides on the ack.
            Ok(ServerEvent::Ack {
                request_id,
                message: Some(message),
            })
        }

        ClientCommand::Typing { room_id, is_typing } => {
            let room = parse_room(&room_id)?;
            // Typing only makes sense from inside the room; a session that
            // never joined gets no say.
            if !state.sessions.is_in_room(&session_id, &room) {
                return Err(ApiError::Forbidden("not joined to room"));
            }
            typing::set_typing(state, &room, user_id, is_typing);
            Ok(ServerEvent::ack(request_id))
        }

        ClientCommand::React { message_id, emoji } => {
            reactions::toggle_reaction(state, message_id, user_id, &emoji).await?;
            Ok(ServerEvent::ack(request_id))
        }

        ClientCommand::DeleteMessage { message_id } => {
            messages::delete_message(state, message_id, user_id).await?;
            Ok(ServerEvent::ack(request_id))
        }
    }
}

fn parse_room(raw: &str) -> Result<RoomId, ApiError> {
    RoomId::parse(raw).ok_or(ApiError::BadRequest("invalid room id"))
}
