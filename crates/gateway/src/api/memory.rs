//! `POST /memory/search` (§6) — full-text search over session transcripts.
//!
//! SerialAgent carries no embedding/vector memory store (out of scope);
//! this searches the in-memory reverse word index built over transcripts
//! by [`sa_sessions::search::TranscriptIndex`].

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn search(State(state): State<AppState>, Json(body): Json<SearchBody>) -> impl IntoResponse {
    let limit = body.limit.unwrap_or(10);
    let mut hits = state.transcript_index.search(&body.query);
    hits.truncate(limit);

    let results: Vec<_> = hits
        .into_iter()
        .map(|h| {
            serde_json::json!({
                "session_id": h.session_id,
                "match_count": h.match_count,
                "preview": h.preview,
            })
        })
        .collect();

    let total = results.len();
    Json(serde_json::json!({
        "query": body.query,
        "results": results,
        "total": total,
    }))
    .into_response()
}
