//! Chat API endpoints (§6) — the primary interface for running agent turns.
//!
//! - `POST /chat`        — non-streaming: returns the full assistant reply
//! - `POST /chat/stream` — SSE: streams `chat.chunk` events, terminated by
//!   a literal `data: [DONE]` line

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;

use sa_domain::config::InboundMetadata;
use sa_sessions::compute_session_key;
use sa_sessions::store::SessionOrigin;

use crate::runtime::turn::{run_turn, TurnEvent, TurnInput, TurnMode};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Explicit session key. If absent, computed from `context`, falling
    /// back to the agent's main session.
    #[serde(default)]
    pub session: Option<String>,
    /// Inbound channel context, used to compute the session key when
    /// `session` is not given directly.
    #[serde(default)]
    pub context: Option<InboundMetadata>,
    /// Accepted for forward-compatibility; no distinct reasoning trace is
    /// currently emitted, so this has no effect on the response shape.
    #[serde(default)]
    pub thinking_level: Option<String>,
    /// `plan` restricts the turn to read-only tools; defaults to `execute`.
    #[serde(default)]
    pub mode: TurnMode,
}

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> impl IntoResponse {
    let _ = &body.thinking_level;

    let (session_key, session_id) = match resolve_session(&state, &body) {
        Ok(s) => s,
        Err(e) => return error_response(axum::http::StatusCode::BAD_REQUEST, "bad_request", &e),
    };

    let input = TurnInput {
        session_key,
        session_id: session_id.clone(),
        user_message: body.message,
        model: None,
        agent_id: None,
        mode: body.mode,
    };

    let mut rx = run_turn(Arc::new(state.clone()), input);

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut error = None;

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Final { content: c } | TurnEvent::Stopped { content: c } => content = c,
            TurnEvent::ToolCall { call_id, tool_name } => {
                tool_calls.push(serde_json::json!({ "call_id": call_id, "tool_name": tool_name }));
            }
            TurnEvent::AwaitingApproval { approval_id, tool_name, .. } => {
                // The turn's background task keeps running, blocked on the
                // decision; don't hold this connection open for it (§9).
                // The caller resolves it via `POST /approvals/:id/approve`
                // or `/reject` and polls `GET /sessions/:key` for the result.
                return Json(serde_json::json!({
                    "id": session_id,
                    "status": "awaiting_approval",
                    "approval_id": approval_id,
                    "tool_name": tool_name,
                }))
                .into_response();
            }
            TurnEvent::Error { message } => error = Some(message),
            TurnEvent::Token { .. } | TurnEvent::ToolResult { .. } | TurnEvent::Usage { .. } => {}
        }
    }

    if let Some(message) = error {
        return error_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "internal_error", &message);
    }

    Json(serde_json::json!({
        "id": session_id,
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "message": { "role": "assistant", "content": content },
        "tool_calls": tool_calls,
    }))
    .into_response()
}

pub async fn chat_stream(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> impl IntoResponse {
    let _ = &body.thinking_level;

    let (session_key, session_id) = match resolve_session(&state, &body) {
        Ok(s) => s,
        Err(e) => {
            let stream = futures_util::stream::once(async move {
                Ok::<_, std::convert::Infallible>(error_event(&e))
            });
            return Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
        }
    };

    let input = TurnInput {
        session_key,
        session_id,
        user_message: body.message,
        model: None,
        agent_id: None,
        mode: body.mode,
    };

    let rx = run_turn(Arc::new(state.clone()), input);
    let stream = make_sse_stream(rx);

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("chat.chunk")
        .data(serde_json::json!({ "type": "error", "message": message }).to_string())
}

fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            // `AwaitingApproval` ends the stream early: the turn's
            // background task stays alive waiting on the decision, but
            // this SSE connection isn't held open for it (§9). The client
            // resolves it via `POST /approvals/:id/{approve,reject}`.
            let is_awaiting_approval = matches!(event, TurnEvent::AwaitingApproval { .. });
            let chunk = match &event {
                TurnEvent::Token { text } => serde_json::json!({ "type": "token", "text": text }),
                TurnEvent::ToolCall { call_id, tool_name } => {
                    serde_json::json!({ "type": "tool_call", "call_id": call_id, "tool_name": tool_name })
                }
                TurnEvent::ToolResult { call_id, tool_name, success } => {
                    serde_json::json!({ "type": "tool_result", "call_id": call_id, "tool_name": tool_name, "success": success })
                }
                TurnEvent::AwaitingApproval { call_id, tool_name, approval_id } => serde_json::json!({
                    "type": "awaiting_approval", "call_id": call_id, "tool_name": tool_name, "approval_id": approval_id,
                }),
                TurnEvent::Usage { total_tokens } => serde_json::json!({ "type": "usage", "total_tokens": total_tokens }),
                TurnEvent::Final { content } => serde_json::json!({ "type": "final", "content": content }),
                TurnEvent::Stopped { content } => serde_json::json!({ "type": "stopped", "content": content }),
                TurnEvent::Error { message } => serde_json::json!({ "type": "error", "message": message }),
            };
            yield Ok(Event::default().event("chat.chunk").data(chunk.to_string()));
            if is_awaiting_approval {
                break;
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    }
}

fn error_response(status: axum::http::StatusCode, code: &str, message: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": { "code": code, "message": message } }))).into_response()
}

fn inbound_to_origin(meta: &InboundMetadata) -> SessionOrigin {
    SessionOrigin {
        channel: meta.channel.clone(),
        account: meta.account_id.clone(),
        peer: meta.peer_id.clone(),
        group: meta.group_id.clone(),
    }
}

fn resolve_session(state: &AppState, body: &ChatRequest) -> Result<(String, String), String> {
    let session_key = if let Some(ref explicit) = body.session {
        explicit.clone()
    } else if let Some(ref ctx) = body.context {
        let meta = if let Some(ref peer) = ctx.peer_id {
            let canonical = state.identity.resolve(peer);
            let mut resolved = ctx.clone();
            resolved.peer_id = Some(canonical);
            resolved
        } else {
            ctx.clone()
        };
        compute_session_key(&state.config.sessions.agent_id, state.config.sessions.dm_scope, &meta)
    } else {
        format!("agent:{}:main", state.config.sessions.agent_id)
    };

    if let Some(entry) = state.sessions.get(&session_key) {
        let meta = body.context.clone().unwrap_or_default();
        if let Some(reason) = state.lifecycle.should_reset(&entry, &meta, chrono::Utc::now()) {
            tracing::info!(session_key = %session_key, reason = %reason, "resetting session");
            state.sessions.reset_session(&session_key, &reason.to_string());
        }
    }

    let origin = body.context.as_ref().map(inbound_to_origin).unwrap_or_default();
    let (entry, is_new) = state.sessions.resolve_or_create(&session_key, origin);
    if is_new {
        tracing::info!(session_key = %session_key, session_id = %entry.session_id, "new session created");
    }
    state.sessions.touch(&session_key);

    Ok((session_key, entry.session_id))
}
