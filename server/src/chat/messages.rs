//! The chat message write path and history reads.
//!
//! `post_message` is the single append-then-broadcast path shared by the
//! WebSocket command and the REST endpoint, which keeps per-room delivery
//! order equal to durable commit order. Nothing is ever broadcast that did
//! not durably commit first.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::access;
use crate::auth::middleware::Claims;
use crate::chat::events::ServerEvent;
use crate::chat::rooms::RoomId;
use crate::chat::{broadcast, typing};
use crate::db::models::{Message, MessageKind};
use crate::db::store;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::ws::SessionId;

/// Maximum message content length (chars).
const MAX_CONTENT_LENGTH: usize = 4000;
/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    pub media_url: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Post a message to a room. Steps, in order: authorize author against the
/// room; replay the idempotency key if the author already used it; persist;
/// resolve membership fresh and fan out to everyone except the posting
/// session; clear the author's typing flag (a delivered message implies
/// typing ended). A replayed key returns the existing message without a
/// second broadcast. The bool is true when a new row was created.
pub async fn post_message(
    state: &AppState,
    room: &RoomId,
    author_id: &str,
    origin: Option<SessionId>,
    input: NewMessage,
) -> ApiResult<(Message, bool)> {
    let content = input.content.trim().to_string();
    match input.kind {
        MessageKind::Text => {
            if content.is_empty() {
                return Err(ApiError::BadRequest("empty message content"));
            }
        }
        _ => {
            if input.media_url.as_deref().map_or(true, |u| u.is_empty()) {
                return Err(ApiError::BadRequest("media message requires media_url"));
            }
        }
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(ApiError::BadRequest("message content too long"));
    }

    access::require_room_access(state, author_id, room).await?;

    // Persist. Failure aborts here — never broadcast an uncommitted message.
    let db = state.db.clone();
    let room_str = room.to_string();
    let author = author_id.to_string();
    let (message, created) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        store::insert_message(
            &conn,
            &room_str,
            &author,
            input.kind,
            &content,
            input.media_url.as_deref(),
            input.idempotency_key.as_deref(),
        )
    })
    .await??;

    // The author stopped typing by definition.
    typing::set_typing(state, room, author_id, false);

    if created {
        // Membership is resolved now, at fan-out time — it may have changed
        // while the insert was in flight. No self-echo: the posting session
        // gets the message in its reply, the author's other sessions get the
        // broadcast.
        broadcast::to_room(
            &state.sessions,
            &state.rooms,
            room,
            &ServerEvent::MessageCreated {
                room_id: room.clone(),
                message: message.clone(),
            },
            origin.as_ref(),
        );
    }

    Ok((message, created))
}

/// Delete a message. Permitted for the author, or for an elevated role.
/// Returns the room id so the caller's broadcast carries only ids — clients
/// drop the message locally, content is not re-sent.
pub async fn delete_message(
    state: &AppState,
    message_id: i64,
    requester_id: &str,
) -> ApiResult<RoomId> {
    let db = state.db.clone();
    let requester = requester_id.to_string();

    let room_str = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;

        let message =
            store::find_message(&conn, message_id)?.ok_or(ApiError::NotFound("message"))?;

        if message.author_id != requester && !access::has_elevated_role(&conn, &requester)? {
            return Err(ApiError::Forbidden("not the message author"));
        }

        store::delete_message(&conn, message_id)?;
        Ok(message.room_id)
    })
    .await??;

    let room = RoomId::parse(&room_str)
        .ok_or_else(|| ApiError::Internal(format!("stored message has bad room id: {room_str}")))?;

    broadcast::to_room(
        &state.sessions,
        &state.rooms,
        &room,
        &ServerEvent::MessageDeleted {
            room_id: room.clone(),
            message_id,
        },
        None,
    );

    Ok(room)
}

// --- REST handlers ---

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

/// POST /api/rooms/{room_id}/messages — create a message. JWT auth required.
/// 201 on create, 200 when an idempotency key replayed an existing message.
pub async fn create_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(room_id): Path<String>,
    Json(body): Json<NewMessage>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let room = RoomId::parse(&room_id).ok_or(ApiError::BadRequest("invalid room id"))?;
    let (message, created) = post_message(&state, &room, &claims.sub, None, body).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(message)))
}

/// GET /api/rooms/{room_id}/messages?before={seq}&limit={n}
/// Paginated history, newest first. JWT auth + room access required.
pub async fn get_room_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let room = RoomId::parse(&room_id).ok_or(ApiError::BadRequest("invalid room id"))?;
    access::require_room_access(&state, &claims.sub, &room).await?;

    let db = state.db.clone();
    let room_str = room.to_string();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let (messages, has_more) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        store::list_messages(&conn, &room_str, query.before, limit)
    })
    .await??;

    Ok(Json(HistoryResponse { messages, has_more }))
}

/// DELETE /api/messages/{message_id} — author or elevated role.
pub async fn delete_message_rest(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    delete_message(&state, message_id, &claims.sub).await?;
    Ok(StatusCode::OK)
}
