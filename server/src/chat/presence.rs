//! Derived online/offline presence.
//!
//! Presence is a reference count of live sessions per user, never set
//! directly by clients. `connect`/`disconnect` return a transition only when
//! the count crosses zero, which makes the "exactly one event per crossing"
//! guarantee mechanical: a user with three tabs open goes offline only when
//! the last one disconnects.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    Online,
    Offline,
}

#[derive(Clone, Default)]
pub struct PresenceTracker {
    counts: Arc<DashMap<String, usize>>,
    last_seen: Arc<DashMap<String, DateTime<Utc>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more live session for the user.
    /// Returns Some(Online) exactly when the count goes 0 -> 1.
    pub fn connect(&self, user_id: &str) -> Option<PresenceTransition> {
        let mut count = self.counts.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            Some(PresenceTransition::Online)
        } else {
            None
        }
    }

    /// Record one fewer live session. Returns Some(Offline) exactly when the
    /// count goes 1 -> 0; `last_seen` is stamped at that moment, not
    /// continuously. Unknown users are a no-op (duplicate disconnects are
    /// expected from transport layers).
    pub fn disconnect(&self, user_id: &str) -> Option<PresenceTransition> {
        let mut went_offline = false;
        if let Some(mut count) = self.counts.get_mut(user_id) {
            if *count > 0 {
                *count -= 1;
                went_offline = *count == 0;
            }
        }
        if went_offline {
            self.counts.remove_if(user_id, |_, c| *c == 0);
            self.last_seen.insert(user_id.to_string(), Utc::now());
            Some(PresenceTransition::Offline)
        } else {
            None
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.counts.get(user_id).map(|c| *c > 0).unwrap_or(false)
    }

    pub fn session_count(&self, user_id: &str) -> usize {
        self.counts.get(user_id).map(|c| *c).unwrap_or(0)
    }

    pub fn last_seen_at(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(user_id).map(|t| *t)
    }

    /// Snapshot of currently online users, for the connect-time push to a
    /// fresh session.
    pub fn online_users(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|entry| *entry.value() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_fires_once_per_zero_crossing() {
        let presence = PresenceTracker::new();

        assert_eq!(presence.connect("alice"), Some(PresenceTransition::Online));
        assert_eq!(presence.connect("alice"), None); // second tab
        assert_eq!(presence.connect("alice"), None); // third tab
        assert!(presence.is_online("alice"));
        assert_eq!(presence.session_count("alice"), 3);

        assert_eq!(presence.disconnect("alice"), None);
        assert_eq!(presence.disconnect("alice"), None);
        assert!(presence.last_seen_at("alice").is_none());

        assert_eq!(
            presence.disconnect("alice"),
            Some(PresenceTransition::Offline)
        );
        assert!(!presence.is_online("alice"));
        assert!(presence.last_seen_at("alice").is_some());
    }

    #[test]
    fn duplicate_disconnect_is_a_no_op() {
        let presence = PresenceTracker::new();
        presence.connect("alice");
        assert_eq!(
            presence.disconnect("alice"),
            Some(PresenceTransition::Offline)
        );
        assert_eq!(presence.disconnect("alice"), None);
        assert_eq!(presence.disconnect("ghost"), None);
    }

    #[test]
    fn online_snapshot_lists_each_user_once() {
        let presence = PresenceTracker::new();
        presence.connect("alice");
        presence.connect("alice");
        presence.connect("bob");

        let mut online = presence.online_users();
        online.sort();
        assert_eq!(online, vec!["alice".to_string(), "bob".to_string()]);
    }
}
