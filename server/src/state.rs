use std::time::Duration;

use crate::chat::presence::PresenceTracker;
use crate::chat::rooms::RoomManager;
use crate::chat::typing::TypingCoordinator;
use crate::db::DbPool;
use crate::ws::registry::SessionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
///
/// The registries are explicit, injected values — no ambient globals — so
/// independent instances can exist side by side (tests spin up several).
/// All in-memory maps are process-local caches of transient state; a restart
/// loses only typing/presence, never durable history.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key, shared with the auth service)
    pub jwt_secret: Vec<u8>,
    /// Live connections: identity, joined rooms, last activity
    pub sessions: SessionRegistry,
    /// Room id -> joined session ids
    pub rooms: RoomManager,
    /// Refcounted online/offline per user
    pub presence: PresenceTracker,
    /// Pending typing-expiry timers per (room, user)
    pub typing: TypingCoordinator,
    /// TTL for a typing flag without an explicit stop
    pub typing_ttl: Duration,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, typing_ttl: Duration) -> Self {
        Self {
            db,
            jwt_secret,
            sessions: SessionRegistry::new(),
            rooms: RoomManager::new(),
            presence: PresenceTracker::new(),
            typing: TypingCoordinator::new(),
            typing_ttl,
        }
    }
}
