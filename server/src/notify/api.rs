//! REST surface for notifications.
//!
//! Dispatch is restricted to elevated roles (it is how backend workflows
//! reach users); the read/mark/delete endpoints operate strictly on the
//! caller's own notifications.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::access;
use crate::auth::middleware::Claims;
use crate::db::models::Notification;
use crate::db::store;
use crate::error::ApiError;
use crate::notify::{self, NotificationInput};
use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub recipient_ids: Vec<String>,
    #[serde(flatten)]
    pub notification: NotificationInput,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub created: usize,
}

/// POST /api/notify — fan a notification out to a set of recipients.
/// Elevated role required. 202: persisted, live push is best-effort.
pub async fn dispatch_notifications(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<DispatchResponse>), ApiError> {
    access::require_elevated_role(&state, &claims.sub).await?;

    if body.recipient_ids.is_empty() {
        return Err(ApiError::BadRequest("recipient_ids must not be empty"));
    }

    let created = notify::dispatch(&state, &body.recipient_ids, body.notification).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchResponse {
            created: created.len(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub before: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub notifications: Vec<Notification>,
    pub has_more: bool,
}

/// GET /api/notifications — the caller's notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let (notifications, has_more) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        store::list_notifications(&conn, &recipient, query.unread_only, query.before, limit)
    })
    .await??;

    Ok(Json(ListResponse {
        notifications,
        has_more,
    }))
}

/// PUT /api/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();

    let updated = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        store::mark_notification_read(&conn, &recipient, id)
    })
    .await??;

    if updated {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound("notification"))
    }
}

#[derive(Debug, Serialize)]
pub struct MarkAllResponse {
    pub updated: usize,
}

/// PUT /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<MarkAllResponse>, ApiError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();

    let updated = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        store::mark_all_notifications_read(&conn, &recipient)
    })
    .await??;

    Ok(Json(MarkAllResponse { updated }))
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();

    let deleted = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ApiError::Internal("db lock poisoned".into()))?;
        store::delete_notification(&conn, &recipient, id)
    })
    .await??;

    if deleted {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound("notification"))
    }
}
