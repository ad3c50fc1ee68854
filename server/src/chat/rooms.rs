//! Room identifiers and live room membership.
//!
//! A room scopes message fan-out: either an event's chat or a 1:1
//! conversation. Direct room ids are order-normalized so both participants
//! resolve to the same room regardless of who initiates.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ws::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// An event's chat room, keyed by the event's durable id.
    Event(String),
    /// A private conversation; participants stored in sorted order.
    Direct(String, String),
}

impl RoomId {
    pub fn event(event_id: impl Into<String>) -> Self {
        RoomId::Event(event_id.into())
    }

    /// Order-independent constructor: `direct(a, b) == direct(b, a)`.
    pub fn direct(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            RoomId::Direct(a, b)
        } else {
            RoomId::Direct(b, a)
        }
    }

    /// Parse the wire form: `event:{id}` or `dm:{a}:{b}`.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(event_id) = s.strip_prefix("event:") {
            if event_id.is_empty() {
                return None;
            }
            return Some(RoomId::Event(event_id.to_string()));
        }
        if let Some(rest) = s.strip_prefix("dm:") {
            let (a, b) = rest.split_once(':')?;
            if a.is_empty() || b.is_empty() {
                return None;
            }
            return Some(RoomId::direct(a, b));
        }
        None
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Event(id) => write!(f, "event:{id}"),
            RoomId::Direct(a, b) => write!(f, "dm:{a}:{b}"),
        }
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RoomId::parse(&s).ok_or_else(|| de::Error::custom(format!("invalid room id: {s}")))
    }
}

/// Maps a room to the set of currently joined session ids.
/// Performs no authorization — callers check the permission collaborator
/// before `join`. Empty rooms are dropped from the index; membership is
/// reconstructible from active sessions, so this is safe.
#[derive(Clone, Default)]
pub struct RoomManager {
    rooms: Arc<DashMap<RoomId, HashSet<SessionId>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: joining twice is a no-op. Returns true if newly added.
    pub fn join(&self, room: &RoomId, session: SessionId) -> bool {
        self.rooms.entry(room.clone()).or_default().insert(session)
    }

    /// Returns true if the session was a member. Garbage-collects the room
    /// when the last member leaves.
    pub fn leave(&self, room: &RoomId, session: &SessionId) -> bool {
        let mut removed = false;
        let mut now_empty = false;
        if let Some(mut members) = self.rooms.get_mut(room) {
            removed = members.remove(session);
            now_empty = members.is_empty();
        }
        if now_empty {
            // remove_if re-checks under the shard lock so a concurrent join
            // between the drop above and here is not lost
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        removed
    }

    pub fn members_of(&self, room: &RoomId) -> Vec<SessionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, room: &RoomId) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.is_empty())
            .unwrap_or(true)
    }

    /// Number of indexed rooms (empty rooms are never indexed).
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
