//! Session management API endpoints (§6).
//!
//! - `GET /sessions`        — list active sessions
//! - `GET /sessions/:key`   — session detail + transcript
//! - `DELETE /sessions/:key` — forget a session

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<_> = state
        .sessions
        .list()
        .into_iter()
        .map(|entry| {
            let messages = state.transcripts.read(&entry.session_id).map(|l| l.len()).unwrap_or(0);
            serde_json::json!({
                "key": entry.session_key,
                "type": entry.kind,
                "channel": entry.origin.channel,
                "messages": messages,
                "last_active": entry.updated_at.to_rfc3339(),
            })
        })
        .collect();
    let total = sessions.len();

    Json(serde_json::json!({ "sessions": sessions, "total": total }))
}

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<TranscriptQuery>,
) -> impl IntoResponse {
    let Some(entry) = state.sessions.get(&key) else {
        return not_found(&key);
    };

    let mut lines = state.transcripts.read(&entry.session_id).unwrap_or_default();
    if let Some(limit) = q.limit {
        if lines.len() > limit {
            lines = lines.split_off(lines.len() - limit);
        }
    }

    let messages: Vec<_> = lines
        .iter()
        .map(|l| {
            serde_json::json!({
                "role": l.role,
                "content": l.content,
                "timestamp": l.timestamp,
            })
        })
        .collect();
    let total = messages.len();

    Json(serde_json::json!({
        "session": {
            "key": entry.session_key,
            "type": entry.kind,
            "channel": entry.origin.channel,
            "created_at": entry.created_at.to_rfc3339(),
            "last_active": entry.updated_at.to_rfc3339(),
            "tokens": {
                "input": entry.input_tokens,
                "output": entry.output_tokens,
                "total": entry.total_tokens,
            },
        },
        "messages": messages,
        "total": total,
    }))
    .into_response()
}

pub async fn delete_session(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    match state.sessions.remove(&key) {
        Some(entry) => Json(serde_json::json!({
            "deleted": true,
            "session": { "key": entry.session_key, "type": entry.kind },
        }))
        .into_response(),
        None => not_found(&key),
    }
}

fn not_found(key: &str) -> axum::response::Response {
    (
        axum::http::StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": { "code": "not_found", "message": format!("no such session: {key}") }
        })),
    )
        .into_response()
}
