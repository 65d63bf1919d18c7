//! Chat listing endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use super::{ApiState, error_json};
use crate::store::{ChatSummary, StoredMessage};

/// Query parameters for chat listings
#[derive(Debug, Deserialize)]
pub struct ChatsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// Distinct chats with their most recent message
pub async fn list(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ChatsQuery>,
) -> Result<Json<Vec<ChatSummary>>, (StatusCode, Json<Value>)> {
    let chats = state
        .store
        .chats(query.limit)
        .map_err(|e| error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(chats))
}

/// Messages for the chat in the path
pub async fn chat_messages(
    State(state): State<Arc<ApiState>>,
    Path(jid): Path<String>,
    Query(query): Query<ChatsQuery>,
) -> Result<Json<Vec<StoredMessage>>, (StatusCode, Json<Value>)> {
    let msgs = state
        .store
        .messages_for_chat(&jid, query.limit, query.offset)
        .map_err(|e| error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(msgs))
}
