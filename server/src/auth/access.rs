//! Permission-matrix lookups consumed by the collaboration core.
//!
//! These answer two questions and nothing more: may this user enter this
//! room, and does this user hold an elevated role. Reads go against the
//! directory tables owned by the CRUD application, never against JWT-cached
//! state, so role changes take effect immediately.

use rusqlite::{params, Connection};

use crate::chat::rooms::RoomId;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// May `user_id` join/post in `room`?
/// Event rooms: event member or event creator. Direct rooms: one of the two
/// participants (the room id already encodes both).
pub fn can_access_room(
    conn: &Connection,
    user_id: &str,
    room: &RoomId,
) -> Result<bool, rusqlite::Error> {
    match room {
        RoomId::Event(event_id) => conn.query_row(
            "SELECT COUNT(*) FROM events e
             LEFT JOIN event_members m ON m.event_id = e.id AND m.user_id = ?2
             WHERE e.id = ?1 AND (e.created_by = ?2 OR m.user_id IS NOT NULL)",
            params![event_id, user_id],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        ),
        RoomId::Direct(a, b) => Ok(user_id == a || user_id == b),
    }
}

/// Elevated role check (moderation override, service dispatch hook).
pub fn has_elevated_role(conn: &Connection, user_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1 AND role = 'admin'",
        params![user_id],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )
}

/// Async wrapper: fail with Forbidden unless the user may access the room.
pub async fn require_room_access(state: &AppState, user_id: &str, room: &RoomId) -> ApiResult<()> {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let room = room.clone();

    let allowed = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        can_access_room(&conn, &uid, &room).map_err(ApiError::from)
    })
    .await??;

    if allowed {
        Ok(())
    } else {
        Err(ApiError::Forbidden("no access to room"))
    }
}

/// Async wrapper: fail with Forbidden unless the user holds an elevated role.
pub async fn require_elevated_role(state: &AppState, user_id: &str) -> ApiResult<()> {
    let db = state.db.clone();
    let uid = user_id.to_string();

    let elevated = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        has_elevated_role(&conn, &uid).map_err(ApiError::from)
    })
    .await??;

    if elevated {
        Ok(())
    } else {
        Err(ApiError::Forbidden("elevated role required"))
    }
}
