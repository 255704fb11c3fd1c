//! Webhook registration CRUD (§6, admin scope).
//!
//! - `POST /webhooks`     — subscribe a URL to one or more event patterns
//! - `GET /webhooks`      — list subscriptions
//! - `DELETE /webhooks/:id` — unsubscribe

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::state::AppState;

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": { "code": code, "message": message.into() } }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookBody {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    pub events: Vec<String>,
}

pub async fn create_webhook(State(state): State<AppState>, Json(body): Json<CreateWebhookBody>) -> impl IntoResponse {
    match state.webhooks.subscribe(body.url, body.secret, body.events) {
        Ok(sub) => (StatusCode::CREATED, Json(serde_json::to_value(sub).unwrap_or_default())).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}

pub async fn list_webhooks(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "webhooks": state.webhooks.list() }))
}

pub async fn delete_webhook(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.webhooks.unsubscribe(&id) {
        Ok(true) => Json(serde_json::json!({ "deleted": true, "id": id })).into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "not_found", format!("no such webhook: {id}")),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}
