use axum::{middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::{messages, reactions};
use crate::notify::api as notify_api;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Message routes (JWT required — Claims extractor validates token)
    let message_routes = Router::new()
        .route(
            "/api/rooms/{room_id}/messages",
            axum::routing::post(messages::create_message),
        )
        .route(
            "/api/rooms/{room_id}/messages",
            axum::routing::get(messages::get_room_messages),
        )
        .route(
            "/api/messages/{message_id}",
            axum::routing::delete(messages::delete_message_rest),
        )
        .route(
            "/api/messages/{message_id}/reactions",
            axum::routing::post(reactions::react_to_message),
        );

    // Notification routes.
    // Note: /api/notifications/read-all MUST come before /api/notifications/{id}
    // routes to avoid path param conflict.
    let notification_routes = Router::new()
        .route(
            "/api/notify",
            axum::routing::post(notify_api::dispatch_notifications),
        )
        .route(
            "/api/notifications",
            axum::routing::get(notify_api::list_notifications),
        )
        .route(
            "/api/notifications/read-all",
            axum::routing::put(notify_api::mark_all_read),
        )
        .route(
            "/api/notifications/{id}/read",
            axum::routing::put(notify_api::mark_read),
        )
        .route(
            "/api/notifications/{id}",
            axum::routing::delete(notify_api::delete_notification),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(message_routes)
        .merge(notification_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
