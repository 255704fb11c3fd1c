//! Generic approval-decision endpoints (§4.H, §9) for approvals raised
//! mid-turn (§4.E) by a tool call's side-effect class rather than by a
//! marathon milestone. Marathon milestone approvals have their own
//! `/marathon/:id/{approve,reject}` routes in `api::marathon`, since those
//! additionally validate marathon state; a turn-level approval has no such
//! owning resource, so this operates directly on the shared
//! [`crate::runtime::approval::ApprovalStore`].
//!
//! - `POST /approvals/:id/approve` — approve a pending tool-call approval
//! - `POST /approvals/:id/reject`  — reject a pending tool-call approval

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::state::AppState;

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": { "code": code, "message": message.into() } }))).into_response()
}

#[derive(Debug, Deserialize, Default)]
pub struct RejectBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn approve(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    if state.approvals.approve(&id, None) {
        Json(serde_json::json!({ "approval_id": id, "decision": "approved" })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "not_found", format!("no pending approval: {id}"))
    }
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> impl IntoResponse {
    if state.approvals.reject(&id, None, body.reason.clone()) {
        Json(serde_json::json!({ "approval_id": id, "decision": "rejected" })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "not_found", format!("no pending approval: {id}"))
    }
}
