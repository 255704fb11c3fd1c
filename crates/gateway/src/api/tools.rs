//! `GET /tools` (§6, scope `tools`) — tool inventory.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    let tools = state.tools.list(false);
    let total = tools.len();
    Json(serde_json::json!({ "tools": tools, "total": total }))
}
