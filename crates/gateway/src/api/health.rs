//! `GET /health` and `GET /` (§6) — public, unauthenticated endpoints.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": state.config.sessions.agent_id,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn catalog() -> impl IntoResponse {
    Json(serde_json::json!({
        "endpoints": [
            { "method": "GET", "path": "/health" },
            { "method": "POST", "path": "/chat" },
            { "method": "POST", "path": "/chat/stream" },
            { "method": "GET", "path": "/sessions" },
            { "method": "GET", "path": "/sessions/:key" },
            { "method": "DELETE", "path": "/sessions/:key" },
            { "method": "POST", "path": "/memory/search" },
            { "method": "POST", "path": "/marathon" },
            { "method": "GET", "path": "/marathon" },
            { "method": "GET", "path": "/marathon/:id" },
            { "method": "POST", "path": "/marathon/:id/pause" },
            { "method": "POST", "path": "/marathon/:id/resume" },
            { "method": "POST", "path": "/marathon/:id/abort" },
            { "method": "POST", "path": "/generate/image" },
            { "method": "GET", "path": "/skills" },
            { "method": "GET", "path": "/tools" },
            { "method": "GET", "path": "/usage" },
            { "method": "POST", "path": "/webhooks" },
            { "method": "GET", "path": "/webhooks" },
            { "method": "DELETE", "path": "/webhooks/:id" },
        ]
    }))
}
