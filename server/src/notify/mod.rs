//! Notification dispatch: persist per recipient, then push live.
//!
//! Persistence comes first so an offline recipient loses nothing; the live
//! push is a hint for recipients with a connected session. Recipients are
//! independent — one failed insert is logged and skipped, the rest still
//! get theirs. Only a total failure surfaces as an error.

pub mod api;

use crate::chat::broadcast;
use crate::chat::events::ServerEvent;
use crate::db::models::{Notification, Priority};
use crate::db::store;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Well-known notification kinds emitted by the rest of the app.
pub mod kinds {
    pub const TASK_ASSIGNED: &str = "task_assigned";
    pub const EVENT_CREATED: &str = "event_created";
    pub const USER_JOINED: &str = "user_joined";
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotificationInput {
    pub kind: String,
    #[serde(default)]
    pub priority: Priority,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub action_ref: Option<String>,
}

/// Create one notification per recipient and push it to each recipient's
/// live sessions. Returns the notifications that were persisted.
pub async fn dispatch(
    state: &AppState,
    recipient_ids: &[String],
    input: NotificationInput,
) -> ApiResult<Vec<Notification>> {
    if recipient_ids.is_empty() {
        return Ok(Vec::new());
    }
    if input.kind.trim().is_empty() || input.title.trim().is_empty() {
        return Err(ApiError::BadRequest("notification kind and title required"));
    }

    let db = state.db.clone();
    let recipients = recipient_ids.to_vec();
    let notifications = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;

        let mut created = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            match store::insert_notification(
                &conn,
                recipient,
                &input.kind,
                input.priority,
                &input.title,
                &input.body,
                input.action_ref.as_deref(),
            ) {
                Ok(n) => created.push(n),
                Err(e) => {
                    tracing::warn!(recipient_id = %recipient, error = %e,
                        "Failed to persist notification, skipping recipient");
                }
            }
        }

        if created.is_empty() {
            Err(ApiError::Internal(
                "failed to persist notification for any recipient".into(),
            ))
        } else {
            Ok(created)
        }
    })
    .await??;

    for notification in &notifications {
        if state.presence.is_online(&notification.recipient_id) {
            broadcast::to_user(
                &state.sessions,
                &notification.recipient_id,
                &ServerEvent::NotificationCreated {
                    recipient_id: notification.recipient_id.clone(),
                    notification: notification.clone(),
                },
            );
        }
    }

    Ok(notifications)
}
