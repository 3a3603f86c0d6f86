pub mod config;

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use eduflow_api::auth::AppStateInner;
use eduflow_db::Database;
use eduflow_gateway::connection;
use eduflow_gateway::dispatcher::Dispatcher;
use eduflow_gateway::identity::{Identity, resolve_identity};

use crate::config::Config;

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn chat_socket(
    State(dispatcher): State<Dispatcher>,
    Path(room_name): Path<String>,
    Extension(identity): Extension<Identity>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::serve_chat(socket, dispatcher, identity, room_name))
}

async fn call_socket(
    State(dispatcher): State<Dispatcher>,
    Path(room_id): Path<String>,
    Extension(identity): Extension<Identity>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::serve_call(socket, dispatcher, identity, room_id))
}

/// Full application: socket routes, REST routes and health.
pub fn app(config: &Config, db: Arc<Database>) -> Router {
    let dispatcher = Dispatcher::new(db.clone());
    let secret: Arc<str> = Arc::from(config.jwt_secret.as_str());

    let ws_routes = Router::new()
        .route("/ws/chat/{room_name}", get(chat_socket))
        .route("/ws/chat/{room_name}/", get(chat_socket))
        .route("/ws/call/{room_id}", get(call_socket))
        .route("/ws/call/{room_id}/", get(call_socket))
        .route_layer(middleware::from_fn_with_state(secret, resolve_identity))
        .with_state(dispatcher);

    let api_state = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        service_token: config.service_token.clone(),
    });

    Router::new()
        .route("/health", get(health))
        .merge(ws_routes)
        .merge(eduflow_api::router(api_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
