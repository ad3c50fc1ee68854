//! Short-lived "is typing" state per (room, user).
//!
//! Each active flag holds exactly one pending cancellable expiry timer;
//! restarting typing aborts and replaces it. An explicit stop and a timer
//! expiry converge on the same terminal state: whichever removes the entry
//! first emits the single "typing stopped" event, the loser does nothing
//! (the removal is generation-checked).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::chat::broadcast;
use crate::chat::events::ServerEvent;
use crate::chat::rooms::RoomId;
use crate::state::AppState;

type TypingKey = (RoomId, String);

struct TypingEntry {
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct TypingCoordinator {
    entries: Arc<DashMap<TypingKey, TypingEntry>>,
    generation: Arc<AtomicU64>,
}

impl TypingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)start the typing flag. Returns true on a rising edge (the user
    /// was not already marked typing). `on_expire` runs iff the TTL elapses
    /// before an explicit stop.
    pub fn start<F>(&self, room: &RoomId, user_id: &str, ttl: Duration, on_expire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let key: TypingKey = (room.clone(), user_id.to_string());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let timer = {
            let entries = self.entries.clone();
            let key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                // Only fire if this exact timer still owns the entry: a
                // restart or explicit stop invalidates the generation.
                if entries
                    .remove_if(&key, |_, e| e.generation == generation)
                    .is_some()
                {
                    on_expire();
                }
            })
        };

        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let old = occupied.insert(TypingEntry { generation, timer });
                old.timer.abort();
                false
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(TypingEntry { generation, timer });
                true
            }
        }
    }

    /// Explicit stop (or any teardown path). Returns true if the flag was
    /// set — the caller emits "typing stopped" exactly in that case.
    pub fn stop(&self, room: &RoomId, user_id: &str) -> bool {
        let key: TypingKey = (room.clone(), user_id.to_string());
        if let Some((_, entry)) = self.entries.remove(&key) {
            entry.timer.abort();
            true
        } else {
            false
        }
    }

    pub fn is_typing(&self, room: &RoomId, user_id: &str) -> bool {
        self.entries
            .contains_key(&(room.clone(), user_id.to_string()))
    }
}

/// Apply a typing signal and broadcast the resulting edge, if any.
/// A delivered message and every teardown path call this with `false`.
pub fn set_typing(state: &AppState, room: &RoomId, user_id: &str, is_typing: bool) {
    if is_typing {
        let rising = state.typing.start(room, user_id, state.typing_ttl, {
            let state = state.clone();
            let room = room.clone();
            let user_id = user_id.to_string();
            move || {
                broadcast::to_room(
                    &state.sessions,
                    &state.rooms,
                    &room,
                    &ServerEvent::TypingStopped {
                        room_id: room.clone(),
                        user_id,
                    },
                    None,
                );
            }
        });
        if rising {
            broadcast::to_room(
                &state.sessions,
                &state.rooms,
                room,
                &ServerEvent::TypingStarted {
                    room_id: room.clone(),
                    user_id: user_id.to_string(),
                },
                None,
            );
        }
    } else if state.typing.stop(room, user_id) {
        broadcast::to_room(
            &state.sessions,
            &state.rooms,
            room,
            &ServerEvent::TypingStopped {
                room_id: room.clone(),
                user_id: user_id.to_string(),
            },
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const TTL: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_fires_exactly_once() {
        let typing = TypingCoordinator::new();
        let room = RoomId::event("42");
        let (tx, rx) = mpsc::channel();

        let tx2 = tx.clone();
        assert!(typing.start(&room, "alice", TTL, move || tx2.send(()).unwrap()));
        assert!(typing.is_typing(&room, "alice"));

        tokio::time::sleep(TTL + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        assert_eq!(rx.try_iter().count(), 1);
        assert!(!typing.is_typing(&room, "alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_suppresses_the_timer() {
        let typing = TypingCoordinator::new();
        let room = RoomId::event("42");
        let (tx, rx) = mpsc::channel();

        typing.start(&room, "alice", TTL, move || tx.send(()).unwrap());
        assert!(typing.stop(&room, "alice"));
        assert!(!typing.stop(&room, "alice")); // converged, second stop is silent

        tokio::time::sleep(TTL * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_pending_timer() {
        let typing = TypingCoordinator::new();
        let room = RoomId::event("42");
        let (tx, rx) = mpsc::channel();

        let tx1 = tx.clone();
        assert!(typing.start(&room, "alice", TTL, move || tx1.send(1).unwrap()));

        tokio::time::sleep(TTL / 2).await;
        let tx2 = tx.clone();
        // Not a rising edge, and the first timer must never fire
        assert!(!typing.start(&room, "alice", TTL, move || tx2.send(2).unwrap()));

        tokio::time::sleep(TTL / 2 + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(rx.try_iter().count(), 0); // first timer aborted, second still pending

        tokio::time::sleep(TTL).await;
        tokio::task::yield_now().await;
        let fired: Vec<i32> = rx.try_iter().collect();
        assert_eq!(fired, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_state_is_per_room_and_user() {
        let typing = TypingCoordinator::new();
        let room_a = RoomId::event("a");
        let room_b = RoomId::event("b");

        typing.start(&room_a, "alice", TTL, || {});
        assert!(typing.is_typing(&room_a, "alice"));
        assert!(!typing.is_typing(&room_b, "alice"));
        assert!(!typing.is_typing(&room_a, "bob"));
    }
}
