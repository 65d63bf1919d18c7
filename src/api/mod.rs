//! HTTP API for the bridge
//!
//! Thin marshaling layer over the session manager and message store. All
//! handlers are synchronous request/response; long-running work lives in
//! the bridge core, never here.

mod chats;
mod messages;
mod qr;
mod status;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::session::SessionManager;
use crate::store::MessageStore;

/// Shared state for API handlers
pub struct ApiState {
    /// Session manager (status, QR, sends, logout)
    pub session: Arc<SessionManager>,
    /// Message store (history, search, chats)
    pub store: MessageStore,
    /// Version string reported by `/status`
    pub version: &'static str,
}

/// Build the API router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/logout", post(status::logout))
        .route("/qr", get(qr::page))
        .route("/qr/data", get(qr::data))
        .route("/send/text", post(messages::send_text))
        .route("/send/file", post(messages::send_file))
        .route("/messages", get(messages::list))
        .route("/messages/search", get(messages::search))
        .route("/chats", get(chats::list))
        .route("/chats/{jid}/messages", get(chats::chat_messages))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Uniform error body
pub(crate) fn error_json(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}
