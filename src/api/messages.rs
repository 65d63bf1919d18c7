//! Messaging endpoints: send text/file, history, search

use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiState, error_json};
use crate::Error;
use crate::store::StoredMessage;

type ApiResult<T> = Result<T, (StatusCode, Json<Value>)>;

fn send_error(e: &Error) -> (StatusCode, Json<Value>) {
    let status = match e {
        Error::InvalidJid(_) => StatusCode::BAD_REQUEST,
        Error::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_json(status, e.to_string())
}

/// Body for `POST /send/text`
#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub to: String,
    pub message: String,
}

/// Send a text message
pub async fn send_text(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SendTextRequest>,
) -> ApiResult<Json<Value>> {
    if req.to.is_empty() || req.message.is_empty() {
        return Err(error_json(
            StatusCode::BAD_REQUEST,
            "to and message are required",
        ));
    }

    let message_id = state
        .session
        .send_text(&req.to, &req.message)
        .await
        .map_err(|e| send_error(&e))?;

    Ok(Json(json!({ "status": "sent", "message_id": message_id })))
}

/// Send a media file (multipart: `to`, optional `caption`, `file`)
pub async fn send_file(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut to = String::new();
    let mut caption = String::new();
    let mut filename = String::new();
    let mut mime_type = String::new();
    let mut data: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| error_json(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "to" => {
                to = field
                    .text()
                    .await
                    .map_err(|e| error_json(StatusCode::BAD_REQUEST, e.to_string()))?;
            }
            "caption" => {
                caption = field
                    .text()
                    .await
                    .map_err(|e| error_json(StatusCode::BAD_REQUEST, e.to_string()))?;
            }
            "file" => {
                filename = field.file_name().unwrap_or("file").to_string();
                mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| error_json(StatusCode::BAD_REQUEST, e.to_string()))?;
                data = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    if to.is_empty() {
        return Err(error_json(StatusCode::BAD_REQUEST, "to is required"));
    }
    let Some(data) = data else {
        return Err(error_json(StatusCode::BAD_REQUEST, "file is required"));
    };

    let message_id = state
        .session
        .send_file(&to, &data, &mime_type, &filename, &caption)
        .await
        .map_err(|e| send_error(&e))?;

    Ok(Json(json!({ "status": "sent", "message_id": message_id })))
}

/// Query parameters for `GET /messages`
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub chat: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// Messages for a chat, newest first
pub async fn list(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    if query.chat.is_empty() {
        return Err(error_json(
            StatusCode::BAD_REQUEST,
            "chat query parameter is required",
        ));
    }

    let msgs = state
        .store
        .messages_for_chat(&query.chat, query.limit, query.offset)
        .map_err(|e| error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(msgs))
}

/// Query parameters for `GET /messages/search`
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

fn default_search_limit() -> u32 {
    20
}

/// Full-text search across message content and sender names
pub async fn search(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    if query.q.is_empty() {
        return Err(error_json(
            StatusCode::BAD_REQUEST,
            "q query parameter is required",
        ));
    }

    let msgs = state
        .store
        .search(&query.q, query.limit)
        .map_err(|e| error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(msgs))
}
