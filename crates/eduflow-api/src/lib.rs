pub mod auth;
pub mod calls;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod webhook;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// REST surface under `/api/chat`. Everything except the enrollment webhook
/// needs a user token.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/chat/rooms", get(rooms::list_rooms))
        .route("/api/chat/rooms/dm", post(rooms::create_dm))
        .route("/api/chat/rooms/{room_id}/messages", get(messages::get_messages))
        .route("/api/chat/rooms/{room_id}/calls", get(calls::get_calls))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    let service = Router::new().route("/api/chat/webhook/enrollment", post(webhook::enrollment));

    Router::new().merge(protected).merge(service).with_state(state)
}
