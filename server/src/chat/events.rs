//! The event surface pushed to connected clients.
//!
//! One tagged JSON envelope per event; the `type` field carries the
//! dotted event name. Reply frames (`ack`/`error`) answer a specific client
//! command and echo its request id.

use serde::Serialize;

use crate::chat::rooms::RoomId;
use crate::db::models::{Message, Notification};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "message.created")]
    MessageCreated { room_id: RoomId, message: Message },

    #[serde(rename = "message.deleted")]
    MessageDeleted { room_id: RoomId, message_id: i64 },

    #[serde(rename = "reaction.added")]
    ReactionAdded {
        message_id: i64,
        emoji: String,
        user_id: String,
    },

    #[serde(rename = "reaction.removed")]
    ReactionRemoved {
        message_id: i64,
        emoji: String,
        user_id: String,
    },

    #[serde(rename = "typing.started")]
    TypingStarted { room_id: RoomId, user_id: String },

    #[serde(rename = "typing.stopped")]
    TypingStopped { room_id: RoomId, user_id: String },

    #[serde(rename = "presence.changed")]
    PresenceChanged {
        user_id: String,
        online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen_at: Option<String>,
    },

    #[serde(rename = "notification.created")]
    NotificationCreated {
        recipient_id: String,
        notification: Notification,
    },

    /// Positive reply to a client command. Carries the persisted message for
    /// posts (the author gets its message here, not via broadcast).
    #[serde(rename = "ack")]
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
    },

    /// Negative reply to a client command.
    #[serde(rename = "error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: u16,
        message: String,
    },
}

impl ServerEvent {
    pub fn ack(request_id: Option<String>) -> Self {
        ServerEvent::Ack {
            request_id,
            message: None,
        }
    }

    pub fn error(request_id: Option<String>, code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            request_id,
            code,
            message: message.into(),
        }
    }
}
