//! Health, status, and logout endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};

use super::{ApiState, error_json};

/// Liveness response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Connection status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub uptime: String,
    pub version: &'static str,
}

/// Liveness probe — is the process running?
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current connection status, paired phone, and uptime
pub async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let uptime = state.session.started_at().elapsed();
    Json(StatusResponse {
        status: state.session.status().as_str(),
        phone: state.session.device_id(),
        uptime: format!("{}s", uptime.as_secs()),
        version: state.version,
    })
}

/// Log out and clear the stored session
pub async fn logout(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .session
        .logout()
        .await
        .map_err(|e| error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "status": "logged_out" })))
}
