//! Session registry: every live connection, who owns it, which rooms it has
//! joined, and when it was last active.
//!
//! The registry owns sessions exclusively: created on connect, destroyed on
//! disconnect or idle eviction. The joined-room set here and the member set
//! in the RoomManager are kept bidirectionally consistent by the glue in
//! `chat` — always mutate through there, not directly.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::chat::rooms::RoomId;
use crate::ws::{ConnectionSender, SessionId};

pub struct SessionEntry {
    pub user_id: String,
    pub sender: ConnectionSender,
    pub rooms: HashSet<RoomId>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
    by_user: Arc<DashMap<String, HashSet<SessionId>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &str, sender: ConnectionSender) -> SessionId {
        let session_id = Uuid::now_v7();
        self.sessions.insert(
            session_id,
            SessionEntry {
                user_id: user_id.to_string(),
                sender,
                rooms: HashSet::new(),
                last_seen: Utc::now(),
            },
        );
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id);

        tracing::debug!(
            user_id = %user_id,
            session_id = %session_id,
            connections = self.session_count(user_id),
            "Session registered"
        );
        session_id
    }

    /// Remove a session and return its entry so teardown can run exactly
    /// once. Unregistering an unknown session returns None — duplicate
    /// disconnect events are expected from transport layers, not an error.
    pub fn unregister(&self, session_id: &SessionId) -> Option<SessionEntry> {
        let (_, entry) = self.sessions.remove(session_id)?;

        let mut drop_user = false;
        if let Some(mut ids) = self.by_user.get_mut(&entry.user_id) {
            ids.remove(session_id);
            drop_user = ids.is_empty();
        }
        if drop_user {
            self.by_user.remove_if(&entry.user_id, |_, ids| ids.is_empty());
        }

        tracing::debug!(
            user_id = %entry.user_id,
            session_id = %session_id,
            "Session unregistered"
        );
        Some(entry)
    }

    /// Update last-activity. Called on every inbound frame and pong.
    pub fn touch(&self, session_id: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.last_seen = Utc::now();
        }
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn user_of(&self, session_id: &SessionId) -> Option<String> {
        self.sessions.get(session_id).map(|e| e.user_id.clone())
    }

    pub fn sessions_of(&self, user_id: &str) -> Vec<SessionId> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn add_room(&self, session_id: &SessionId, room: &RoomId) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.rooms.insert(room.clone());
        }
    }

    pub fn remove_room(&self, session_id: &SessionId, room: &RoomId) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.rooms.remove(room);
        }
    }

    pub fn rooms_of(&self, session_id: &SessionId) -> Vec<RoomId> {
        self.sessions
            .get(session_id)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_in_room(&self, session_id: &SessionId, room: &RoomId) -> bool {
        self.sessions
            .get(session_id)
            .map(|e| e.rooms.contains(room))
            .unwrap_or(false)
    }

    /// Push a text frame to one session. Send failures mean the connection
    /// is already closing; the caller treats that as best-effort.
    pub fn send_text(&self, session_id: &SessionId, text: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|e| e.sender.send(Message::Text(text.to_string().into())).is_ok())
            .unwrap_or(false)
    }

    pub fn send_text_to_user(&self, user_id: &str, text: &str) {
        for session_id in self.sessions_of(user_id) {
            self.send_text(&session_id, text);
        }
    }

    pub fn send_text_to_all(&self, text: &str) {
        for entry in self.sessions.iter() {
            let _ = entry
                .sender
                .send(Message::Text(text.to_string().into()));
        }
    }

    /// Ask a session's client to close (idle eviction, moderation).
    pub fn send_close(&self, session_id: &SessionId, code: u16, reason: &str) {
        if let Some(entry) = self.sessions.get(session_id) {
            let _ = entry.sender.send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })));
        }
    }

    /// Sessions with no activity since `cutoff`, for the idle sweeper.
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.last_seen < cutoff)
            .map(|entry| *entry.key())
            .collect()
    }
}
