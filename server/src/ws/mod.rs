pub mod actor;
pub mod handler;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;
use uuid::Uuid;

/// One live connection (one per open tab/device).
pub type SessionId = Uuid;

/// Sender half of a connection's channel. Any part of the system can clone
/// this to push frames to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
/// 4004 = idle timeout
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_IDLE_TIMEOUT: u16 = 4004;
