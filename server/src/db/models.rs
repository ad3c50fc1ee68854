//! Row types shared by the durable store, the REST responses, and the
//! WebSocket event payloads.

use serde::{Deserialize, Serialize};

/// What a message carries besides text.
/// Non-text kinds reference pre-uploaded media by URL — the core never
/// handles raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Voice => "voice",
            MessageKind::File => "file",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "voice" => Some(MessageKind::Voice),
            "file" => Some(MessageKind::File),
            _ => None,
        }
    }
}

/// A persisted chat message, shaped for delivery: author display name and
/// reaction groups are resolved at load time.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub room_id: String,
    pub author_id: String,
    pub author_name: String,
    pub kind: MessageKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub room_sequence: i64,
    pub created_at: String,
    pub reactions: Vec<ReactionGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: i64,
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

/// A persisted notification. Created by the dispatcher, mutated only by
/// read/delete actions from its recipient.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: String,
    pub kind: String,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_ref: Option<String>,
    pub read: bool,
    pub created_at: String,
}
