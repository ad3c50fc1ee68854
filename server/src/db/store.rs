//! Durable-store operations for the collaboration core.
//!
//! All functions take a borrowed [`rusqlite::Connection`] and are called from
//! `tokio::task::spawn_blocking` while holding the pool mutex, so a sequence
//! of statements inside one call executes without interleaving. The store is
//! the single source of truth: nothing is broadcast that did not come out of
//! these functions.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{Message, MessageKind, Notification, Priority, ReactionGroup};
use crate::error::{ApiError, ApiResult};

/// Outcome of a reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionToggle {
    Added,
    Removed,
}

// --- Messages ---

/// Insert a message, or return the existing one if the author already used
/// this idempotency key (client retry-on-timeout). The bool is true when a
/// new row was created — callers broadcast only in that case.
pub fn insert_message(
    conn: &Connection,
    room_id: &str,
    author_id: &str,
    kind: MessageKind,
    content: &str,
    media_url: Option<&str>,
    idempotency_key: Option<&str>,
) -> ApiResult<(Message, bool)> {
    if let Some(key) = idempotency_key {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM messages WHERE author_id = ?1 AND idempotency_key = ?2",
                params![author_id, key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok((load_message(conn, id)?, false));
        }
    }

    // Author must exist in the directory (FK would reject anyway, but a
    // clean NotFound beats a constraint error).
    let author_exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        params![author_id],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )?;
    if !author_exists {
        return Err(ApiError::NotFound("author"));
    }

    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(room_sequence), 0) + 1 FROM messages WHERE room_id = ?1",
        params![room_id],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO messages (room_id, author_id, kind, content, media_url, idempotency_key, room_sequence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            room_id,
            author_id,
            kind.as_str(),
            content,
            media_url,
            idempotency_key,
            next_seq,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;

    let id = conn.last_insert_rowid();
    Ok((load_message(conn, id)?, true))
}

/// Load one message with author display name and reaction groups resolved.
pub fn load_message(conn: &Connection, id: i64) -> ApiResult<Message> {
    let mut message = conn.query_row(
        "SELECT m.id, m.room_id, m.author_id, m.kind, m.content, m.media_url,
                m.room_sequence, m.created_at, u.display_name
         FROM messages m
         LEFT JOIN users u ON u.id = m.author_id
         WHERE m.id = ?1",
        params![id],
        row_to_message,
    )?;
    message.reactions = reaction_groups(conn, id)?;
    Ok(message)
}

pub fn find_message(conn: &Connection, id: i64) -> ApiResult<Option<Message>> {
    match load_message(conn, id) {
        Ok(msg) => Ok(Some(msg)),
        Err(ApiError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Hard-delete a message; reactions go with it via FK cascade.
/// Returns false if no row existed.
pub fn delete_message(conn: &Connection, id: i64) -> ApiResult<bool> {
    let rows = conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

/// Paginated room history, newest first. Fetches limit+1 rows to compute
/// has_more without a count query.
pub fn list_messages(
    conn: &Connection,
    room_id: &str,
    before_sequence: Option<i64>,
    limit: u32,
) -> ApiResult<(Vec<Message>, bool)> {
    let before = before_sequence.unwrap_or(i64::MAX);

    let mut stmt = conn.prepare(
        "SELECT m.id, m.room_id, m.author_id, m.kind, m.content, m.media_url,
                m.room_sequence, m.created_at, u.display_name
         FROM messages m
         LEFT JOIN users u ON u.id = m.author_id
         WHERE m.room_id = ?1 AND m.room_sequence < ?2
         ORDER BY m.room_sequence DESC
         LIMIT ?3",
    )?;

    let rows: Vec<Message> = stmt
        .query_map(params![room_id, before, (limit + 1) as i64], row_to_message)?
        .collect::<Result<_, _>>()?;

    let has_more = rows.len() > limit as usize;
    let mut messages: Vec<Message> = rows.into_iter().take(limit as usize).collect();
    for msg in &mut messages {
        msg.reactions = reaction_groups(conn, msg.id)?;
    }

    Ok((messages, has_more))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind_str: String = row.get(3)?;
    let display_name: Option<String> = row.get(8)?;
    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        author_id: row.get(2)?,
        kind: MessageKind::from_str(&kind_str).unwrap_or_default(),
        content: row.get(4)?,
        media_url: row.get(5)?,
        room_sequence: row.get(6)?,
        created_at: row.get(7)?,
        author_name: display_name.unwrap_or_else(|| "Unknown".to_string()),
        reactions: vec![],
    })
}

// --- Reactions ---

/// Toggle a (message, user, emoji) reaction: delete if present, insert
/// otherwise. Runs in a transaction so the toggle stays race-safe even if
/// the pool ever allows true parallelism; the UNIQUE constraint backs it up.
pub fn toggle_reaction(
    conn: &Connection,
    message_id: i64,
    user_id: &str,
    emoji: &str,
) -> ApiResult<ReactionToggle> {
    let tx = conn.unchecked_transaction()?;

    let exists: bool = tx.query_row(
        "SELECT COUNT(*) FROM messages WHERE id = ?1",
        params![message_id],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )?;
    if !exists {
        return Err(ApiError::NotFound("message"));
    }

    let removed = tx.execute(
        "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
        params![message_id, user_id, emoji],
    )?;

    let toggle = if removed > 0 {
        ReactionToggle::Removed
    } else {
        tx.execute(
            "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id, user_id, emoji, chrono::Utc::now().to_rfc3339()],
        )?;
        ReactionToggle::Added
    };

    tx.commit()?;
    Ok(toggle)
}

/// Reactions for a message, grouped by emoji, most used first.
pub fn reaction_groups(conn: &Connection, message_id: i64) -> ApiResult<Vec<ReactionGroup>> {
    let mut stmt = conn.prepare(
        "SELECT emoji, COUNT(*) AS cnt, GROUP_CONCAT(user_id) AS user_ids
         FROM reactions
         WHERE message_id = ?1
         GROUP BY emoji
         ORDER BY cnt DESC",
    )?;

    let groups = stmt
        .query_map(params![message_id], |row| {
            let emoji: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let user_ids_str: String = row.get(2)?;
            Ok(ReactionGroup {
                emoji,
                count,
                user_ids: user_ids_str.split(',').map(|s| s.to_string()).collect(),
            })
        })?
        .collect::<Result<_, _>>()?;

    Ok(groups)
}

// --- Notifications ---

pub fn insert_notification(
    conn: &Connection,
    recipient_id: &str,
    kind: &str,
    priority: Priority,
    title: &str,
    body: &str,
    action_ref: Option<&str>,
) -> ApiResult<Notification> {
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO notifications (recipient_id, kind, priority, title, body, action_ref, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![recipient_id, kind, priority.as_str(), title, body, action_ref, created_at],
    )?;

    Ok(Notification {
        id: conn.last_insert_rowid(),
        recipient_id: recipient_id.to_string(),
        kind: kind.to_string(),
        priority,
        title: title.to_string(),
        body: body.to_string(),
        action_ref: action_ref.map(|s| s.to_string()),
        read: false,
        created_at,
    })
}

pub fn list_notifications(
    conn: &Connection,
    recipient_id: &str,
    unread_only: bool,
    before_id: Option<i64>,
    limit: u32,
) -> ApiResult<(Vec<Notification>, bool)> {
    let before = before_id.unwrap_or(i64::MAX);
    let min_read_filter = if unread_only { 0 } else { 1 };

    let mut stmt = conn.prepare(
        "SELECT id, recipient_id, kind, priority, title, body, action_ref, read, created_at
         FROM notifications
         WHERE recipient_id = ?1 AND id < ?2 AND read <= ?3
         ORDER BY id DESC
         LIMIT ?4",
    )?;

    let rows: Vec<Notification> = stmt
        .query_map(
            params![recipient_id, before, min_read_filter, (limit + 1) as i64],
            row_to_notification,
        )?
        .collect::<Result<_, _>>()?;

    let has_more = rows.len() > limit as usize;
    let notifications = rows.into_iter().take(limit as usize).collect();
    Ok((notifications, has_more))
}

/// Recipient-scoped: marking someone else's notification is a NotFound.
pub fn mark_notification_read(conn: &Connection, recipient_id: &str, id: i64) -> ApiResult<bool> {
    let rows = conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
        params![id, recipient_id],
    )?;
    Ok(rows > 0)
}

pub fn mark_all_notifications_read(conn: &Connection, recipient_id: &str) -> ApiResult<usize> {
    let rows = conn.execute(
        "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
        params![recipient_id],
    )?;
    Ok(rows)
}

pub fn delete_notification(conn: &Connection, recipient_id: &str, id: i64) -> ApiResult<bool> {
    let rows = conn.execute(
        "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
        params![id, recipient_id],
    )?;
    Ok(rows > 0)
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let priority_str: String = row.get(3)?;
    let read: i64 = row.get(7)?;
    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        kind: row.get(2)?,
        priority: Priority::from_str(&priority_str).unwrap_or_default(),
        title: row.get(4)?,
        body: row.get(5)?,
        action_ref: row.get(6)?,
        read: read != 0,
        created_at: row.get(8)?,
    })
}

// --- Directory seeding (tables owned by the CRUD application) ---

pub fn insert_user(conn: &Connection, id: &str, display_name: &str, role: &str) -> ApiResult<()> {
    conn.execute(
        "INSERT INTO users (id, display_name, role, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, display_name, role, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn insert_event(conn: &Connection, id: &str, title: &str, created_by: &str) -> ApiResult<()> {
    conn.execute(
        "INSERT INTO events (id, title, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, title, created_by, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn add_event_member(conn: &Connection, event_id: &str, user_id: &str) -> ApiResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO event_members (event_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![event_id, user_id, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
