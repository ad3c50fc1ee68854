//! Error type shared by REST handlers, WebSocket command dispatch, and the
//! storage layer.
//!
//! REST responses render it as a status code with a JSON body; WebSocket
//! replies carry `code()` in an error frame. Storage errors collapse to 500
//! except "no rows", which is a NotFound at every call site we have.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("storage error: {0}")]
    Storage(rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Numeric code for WebSocket error frames (mirrors the HTTP status).
    pub fn code(&self) -> u16 {
        self.status().as_u16()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => ApiError::NotFound("row"),
            other => ApiError::Storage(other),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_as_expected() {
        assert_eq!(ApiError::Unauthorized.code(), 401);
        assert_eq!(ApiError::Forbidden("nope").code(), 403);
        assert_eq!(ApiError::NotFound("message").code(), 404);
        assert_eq!(ApiError::BadRequest("bad").code(), 400);
        assert_eq!(ApiError::Internal("boom".into()).code(), 500);
    }

    #[test]
    fn no_rows_becomes_not_found() {
        let err = ApiError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.code(), 404);
    }
}
