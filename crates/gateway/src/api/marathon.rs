//! Marathon control-plane endpoints (§6).
//!
//! - `POST /marathon`               — kick off a new marathon (plans, then runs)
//! - `GET /marathon`                — list marathons
//! - `GET /marathon/:id`            — state summary incl. last 20 logs
//! - `POST /marathon/:id/pause`     — pause an executing marathon
//! - `POST /marathon/:id/resume`    — resume a paused marathon
//! - `POST /marathon/:id/abort`     — cancel a marathon outright
//! - `POST /marathon/:id/approve`   — decide a pending milestone approval: approved
//! - `POST /marathon/:id/reject`    — decide a pending milestone approval: rejected

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use sa_domain::marathon::MarathonStatus;
use serde::Deserialize;

use crate::runtime::marathon::{executor, planner};
use crate::state::AppState;

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": { "code": code, "message": message.into() } }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateMarathonBody {
    pub goal: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

pub async fn create_marathon(State(state): State<AppState>, Json(body): Json<CreateMarathonBody>) -> impl IntoResponse {
    let Some(provider) = state.llm.for_role("planner").or_else(|| state.llm.iter().next().map(|(_, p)| p.clone())) else {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "internal_error", "no LLM provider configured for planning");
    };

    let mut marathon_state =
        sa_domain::marathon::MarathonState::new(body.goal.clone(), body.working_directory, body.webhook_url);
    let id = marathon_state.id.clone();

    match planner::plan_goal(provider.as_ref(), &body.goal).await {
        Ok(plan) => {
            marathon_state.plan = plan;
            marathon_state.status = MarathonStatus::Executing;
            marathon_state.push_log("plan accepted, beginning execution");
        }
        Err(e) => {
            marathon_state.status = MarathonStatus::Failed;
            marathon_state.failure_reason = Some(e.to_string());
            marathon_state.push_log(format!("planning failed: {e}"));
        }
    }

    if let Err(e) = state.marathons.save(marathon_state.clone()) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string());
    }

    if marathon_state.status == MarathonStatus::Executing {
        tokio::spawn(executor::run_marathon(Arc::new(state.clone()), id.clone()));
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": id,
            "status": marathon_state.status,
            "goal": marathon_state.plan.goal,
            "created_at": marathon_state.started_at.to_rfc3339(),
            "message": "marathon created",
        })),
    )
        .into_response()
}

pub async fn list_marathons(State(state): State<AppState>) -> impl IntoResponse {
    let marathons: Vec<_> = state
        .marathons
        .list()
        .into_iter()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "status": m.status,
                "goal": m.plan.goal,
                "milestones_total": m.plan.milestones.len(),
                "milestones_done": m.plan.current_milestone_index,
                "started_at": m.started_at.to_rfc3339(),
                "completed_at": m.completed_at.map(|t| t.to_rfc3339()),
            })
        })
        .collect();
    Json(serde_json::json!({ "marathons": marathons }))
}

pub async fn get_marathon(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(m) = state.marathons.get(&id) else {
        return api_error(StatusCode::NOT_FOUND, "not_found", format!("no such marathon: {id}"));
    };

    let logs: Vec<_> = m
        .logs
        .iter()
        .rev()
        .take(20)
        .map(|l| serde_json::json!({ "timestamp": l.timestamp.to_rfc3339(), "message": l.message }))
        .collect();

    Json(serde_json::json!({
        "id": m.id,
        "status": m.status,
        "goal": m.plan.goal,
        "milestones": m.plan.milestones,
        "current_milestone_index": m.plan.current_milestone_index,
        "total_tokens_used": m.total_tokens_used,
        "total_cost_usd": m.total_cost_usd,
        "started_at": m.started_at.to_rfc3339(),
        "completed_at": m.completed_at.map(|t| t.to_rfc3339()),
        "failure_reason": m.failure_reason,
        "logs": logs,
    }))
    .into_response()
}

pub async fn pause_marathon(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.marathons.update(&id, |m| {
        m.status = MarathonStatus::Paused;
        m.push_log("paused via control plane");
    }) {
        Ok(Some(m)) => Json(serde_json::json!({ "id": id, "status": m.status })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", format!("no such marathon: {id}")),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}

pub async fn resume_marathon(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(current) = state.marathons.get(&id) else {
        return api_error(StatusCode::NOT_FOUND, "not_found", format!("no such marathon: {id}"));
    };
    if current.status != MarathonStatus::Paused {
        return api_error(StatusCode::BAD_REQUEST, "bad_request", "marathon is not paused");
    }
    match state.marathons.update(&id, |m| {
        m.status = MarathonStatus::Executing;
        m.heartbeat_at = chrono::Utc::now();
        m.push_log("resumed via control plane");
    }) {
        Ok(Some(m)) => {
            tokio::spawn(executor::run_marathon(Arc::new(state.clone()), id.clone()));
            Json(serde_json::json!({ "id": id, "status": m.status })).into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", format!("no such marathon: {id}")),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ApprovalDecisionBody {
    /// Which pending request to decide. Defaults to the marathon's current
    /// request -- §4.H guarantees at most one outstanding approval per
    /// marathon, so the common case never needs to name it explicitly.
    #[serde(default)]
    pub approval_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn approve_marathon(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApprovalDecisionBody>,
) -> impl IntoResponse {
    decide_approval(state, id, body, true).await
}

pub async fn reject_marathon(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApprovalDecisionBody>,
) -> impl IntoResponse {
    decide_approval(state, id, body, false).await
}

async fn decide_approval(state: AppState, id: String, body: ApprovalDecisionBody, approved: bool) -> Response {
    let Some(current) = state.marathons.get(&id) else {
        return api_error(StatusCode::NOT_FOUND, "not_found", format!("no such marathon: {id}"));
    };
    if current.status != MarathonStatus::AwaitingApproval {
        return api_error(StatusCode::BAD_REQUEST, "bad_request", "marathon has no pending approval");
    }
    let Some(approval_id) = body
        .approval_id
        .clone()
        .or_else(|| current.approval_requests.last().map(|r| r.id.clone()))
    else {
        return api_error(StatusCode::NOT_FOUND, "not_found", "no pending approval request");
    };

    let resolved = executor::resume_after_approval(Arc::new(state.clone()), id.clone(), &approval_id, approved, body.reason.clone());
    if !resolved {
        return api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no pending approval request: {approval_id}"),
        );
    }

    Json(serde_json::json!({
        "id": id,
        "approval_id": approval_id,
        "decision": if approved { "approved" } else { "rejected" },
    }))
    .into_response()
}

pub async fn abort_marathon(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    if state.marathons.get(&id).is_none() {
        return api_error(StatusCode::NOT_FOUND, "not_found", format!("no such marathon: {id}"));
    }
    state.cancel_map.cancel(&format!("marathon:{id}"));
    match state.marathons.update(&id, |m| {
        m.status = MarathonStatus::Aborted;
        m.completed_at = Some(chrono::Utc::now());
        m.push_log("aborted via control plane");
    }) {
        Ok(Some(m)) => Json(serde_json::json!({ "id": id, "status": m.status })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "not_found", format!("no such marathon: {id}")),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}
