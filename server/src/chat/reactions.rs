//! Emoji reaction toggling.
//!
//! One operation covers add and remove: the storage layer flips the
//! (message, user, emoji) row inside a transaction, and the broadcast
//! reflects whichever way it flipped. Two racing toggles serialize on the
//! transaction; observers see add/remove in commit order.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::access;
use crate::auth::middleware::Claims;
use crate::chat::broadcast;
use crate::chat::events::ServerEvent;
use crate::chat::rooms::RoomId;
use crate::db::store::{self, ReactionToggle};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Longest accepted emoji value. Covers multi-codepoint sequences (skin
/// tones, ZWJ families) with room to spare.
const MAX_EMOJI_LENGTH: usize = 64;

/// Toggle `user_id`'s reaction on a message. NotFound if the message is
/// gone (e.g. deleted moments ago), Forbidden if the user cannot access
/// the message's room.
pub async fn toggle_reaction(
    state: &AppState,
    message_id: i64,
    user_id: &str,
    emoji: &str,
) -> ApiResult<ReactionToggle> {
    let emoji = emoji.trim();
    if emoji.is_empty() || emoji.len() > MAX_EMOJI_LENGTH {
        return Err(ApiError::BadRequest("invalid emoji"));
    }

    // Room lookup first so the access check runs before any write.
    let db = state.db.clone();
    let room_str = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        store::find_message(&conn, message_id)?
            .map(|m| m.room_id)
            .ok_or(ApiError::NotFound("message"))
    })
    .await??;

    let room = RoomId::parse(&room_str)
        .ok_or_else(|| ApiError::Internal(format!("stored message has bad room id: {room_str}")))?;
    access::require_room_access(state, user_id, &room).await?;

    let db = state.db.clone();
    let user = user_id.to_string();
    let emoji_owned = emoji.to_string();
    let toggle = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        store::toggle_reaction(&conn, message_id, &user, &emoji_owned)
    })
    .await??;

    let event = match toggle {
        ReactionToggle::Added => ServerEvent::ReactionAdded {
            message_id,
            emoji: emoji.to_string(),
            user_id: user_id.to_string(),
        },
        ReactionToggle::Removed => ServerEvent::ReactionRemoved {
            message_id,
            emoji: emoji.to_string(),
            user_id: user_id.to_string(),
        },
    };
    broadcast::to_room(&state.sessions, &state.rooms, &room, &event, None);

    Ok(toggle)
}

// --- REST handler ---

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct ReactResponse {
    pub state: &'static str,
}

/// POST /api/messages/{message_id}/reactions — toggle the caller's reaction.
pub async fn react_to_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<i64>,
    Json(body): Json<ReactRequest>,
) -> Result<Json<ReactResponse>, ApiError> {
    let toggle = toggle_reaction(&state, message_id, &claims.sub, &body.emoji).await?;
    Ok(Json(ReactResponse {
        state: match toggle {
            ReactionToggle::Added => "added",
            ReactionToggle::Removed => "removed",
        },
    }))
}
