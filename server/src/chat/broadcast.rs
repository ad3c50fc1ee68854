//! Fan-out helpers: serialize a server event once, push it to an audience.
//!
//! Room membership is always resolved here, at push time — never reuse a
//! member list captured before an await point. Send failures (a socket that
//! just closed) are swallowed: live delivery is best-effort, durable
//! retrieval on reconnect is the reconciliation path.

use crate::chat::events::ServerEvent;
use crate::chat::rooms::{RoomId, RoomManager};
use crate::ws::registry::SessionRegistry;
use crate::ws::SessionId;

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Push an event to every session currently in the room, optionally
/// excluding one (the no-self-echo policy for posts).
pub fn to_room(
    sessions: &SessionRegistry,
    rooms: &RoomManager,
    room: &RoomId,
    event: &ServerEvent,
    exclude: Option<&SessionId>,
) {
    let Some(text) = encode(event) else { return };
    for member in rooms.members_of(room) {
        if exclude == Some(&member) {
            continue;
        }
        sessions.send_text(&member, &text);
    }
}

/// Push an event to all of one user's sessions.
pub fn to_user(sessions: &SessionRegistry, user_id: &str, event: &ServerEvent) {
    let Some(text) = encode(event) else { return };
    sessions.send_text_to_user(user_id, &text);
}

/// Push an event to every connected session (presence changes).
pub fn to_all(sessions: &SessionRegistry, event: &ServerEvent) {
    let Some(text) = encode(event) else { return };
    sessions.send_text_to_all(&text);
}

/// Push a reply frame to a single session.
pub fn to_session(sessions: &SessionRegistry, session_id: &SessionId, event: &ServerEvent) {
    if let Some(text) = encode(event) {
        sessions.send_text(session_id, &text);
    }
}
