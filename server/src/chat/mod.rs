//! Room join/leave and session teardown glue.
//!
//! These functions are the only writers of the session<->room relationship,
//! keeping the registry's joined-room sets and the RoomManager's member sets
//! bidirectionally consistent. Teardown is shared by the actor's exit path,
//! the idle sweeper, and any duplicate disconnect — running it twice is a
//! no-op.

pub mod broadcast;
pub mod events;
pub mod messages;
pub mod presence;
pub mod reactions;
pub mod rooms;
pub mod typing;

use crate::auth::access;
use crate::chat::events::ServerEvent;
use crate::chat::presence::PresenceTransition;
use crate::chat::rooms::RoomId;
use crate::error::ApiResult;
use crate::state::AppState;
use crate::ws::SessionId;

/// Join a session to a room, after checking the permission collaborator.
/// The access check suspends; if the session disconnected while it ran,
/// nothing is joined.
pub async fn join_room(
    state: &AppState,
    session_id: SessionId,
    user_id: &str,
    room: &RoomId,
) -> ApiResult<()> {
    access::require_room_access(state, user_id, room).await?;

    // Re-validate after the suspension point: the session may be gone.
    if !state.sessions.contains(&session_id) {
        return Ok(());
    }

    state.rooms.join(room, session_id);
    state.sessions.add_room(&session_id, room);
    tracing::debug!(user_id = %user_id, room = %room, "Joined room");
    Ok(())
}

/// Remove a session from a room. Typing state for the user is cleared (and
/// a stop broadcast) when this was their last session in the room.
pub fn leave_room(state: &AppState, session_id: SessionId, user_id: &str, room: &RoomId) {
    state.rooms.leave(room, &session_id);
    state.sessions.remove_room(&session_id, room);

    if !user_in_room(state, user_id, room) {
        typing::set_typing(state, room, user_id, false);
    }
}

/// Full session teardown: leave every joined room, clear typing, and
/// re-evaluate presence. Identical for explicit disconnect, transport
/// errors, and idle eviction; safe to call more than once.
pub fn disconnect_session(state: &AppState, session_id: SessionId) {
    let Some(entry) = state.sessions.unregister(&session_id) else {
        return;
    };

    for room in &entry.rooms {
        state.rooms.leave(room, &session_id);
        if !user_in_room(state, &entry.user_id, room) {
            typing::set_typing(state, room, &entry.user_id, false);
        }
    }

    if let Some(PresenceTransition::Offline) = state.presence.disconnect(&entry.user_id) {
        broadcast::to_all(
            &state.sessions,
            &ServerEvent::PresenceChanged {
                user_id: entry.user_id.clone(),
                online: false,
                last_seen_at: state
                    .presence
                    .last_seen_at(&entry.user_id)
                    .map(|t| t.to_rfc3339()),
            },
        );
    }
}

/// Periodically evict sessions with no activity inside the idle window.
/// The only time-based eviction in the subsystem; runs the same teardown as
/// a disconnect, and the actor's own exit afterwards finds nothing to do.
pub async fn run_idle_sweeper(
    state: AppState,
    idle_timeout: std::time::Duration,
    sweep_interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.tick().await; // skip the immediate first tick

    loop {
        ticker.tick().await;
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::zero());

        for session_id in state.sessions.idle_since(cutoff) {
            tracing::info!(session_id = %session_id, "Evicting idle session");
            state
                .sessions
                .send_close(&session_id, crate::ws::CLOSE_IDLE_TIMEOUT, "Idle timeout");
            disconnect_session(&state, session_id);
        }
    }
}

/// Does any of the user's live sessions still have this room joined?
fn user_in_room(state: &AppState, user_id: &str, room: &RoomId) -> bool {
    state
        .sessions
        .sessions_of(user_id)
        .iter()
        .any(|sid| state.sessions.is_in_room(sid, room))
}
