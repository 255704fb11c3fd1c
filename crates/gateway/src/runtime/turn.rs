//! The turn loop (§4.E) — the core agentic cycle: call the model, execute
//! any tool calls it requests, feed the results back, repeat until the
//! model stops calling tools or `MAX_TOOL_LOOPS` is reached.
//!
//! Simplified from the originating multi-agent runtime: there is no
//! run/node introspection tree here, only the turn itself. Progress is
//! reported to the caller as a stream of [`TurnEvent`]s over an `mpsc`
//! channel, and persisted to the session's transcript as it happens so a
//! crash mid-turn loses at most the in-flight model call.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::StreamExt;
use sa_domain::budget::TokenUsage;
use sa_domain::stream::StreamEvent;
use sa_domain::tool::{ContentPart, Message, MessageContent, ToolCall};
use sa_providers::traits::ChatRequest;
use sa_sessions::transcript::TranscriptLine;
use sa_tools::registry::{ChatContext, ToolCallArgs};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::runtime::approval::{requires_approval, ApprovalDecision};
use crate::runtime::cancel::CancelToken;
use crate::runtime::context;
use crate::state::AppState;

/// Hard ceiling on model<->tool round trips within a single turn (§4.E).
pub const MAX_TOOL_LOOPS: u32 = 200;

/// Hard ceiling on a single tool invocation (§4.C). Distinct from any
/// tool-internal timeout (e.g. the exec tool's own `timeout_sec`) — this
/// guards against a tool handler that never returns at all.
const TOOL_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_key: String,
    pub session_id: String,
    pub user_message: String,
    /// Explicit `"provider_id/model"` override; falls back to the
    /// session's configured role model when absent.
    pub model: Option<String>,
    /// Sub-agent identity, when this turn runs on behalf of a marathon
    /// milestone or a delegated sub-agent rather than the user directly.
    pub agent_id: Option<String>,
    /// `plan` restricts the visible tool set to read-only tools; `execute`
    /// (the default) exposes every registered tool.
    pub mode: TurnMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    #[default]
    Execute,
    Plan,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Token { text: String },
    ToolCall { call_id: String, tool_name: String },
    ToolResult { call_id: String, tool_name: String, success: bool },
    /// A tool call is parked behind the approval gate (§4.H). The turn's
    /// background task stays alive, blocked on the decision; the HTTP
    /// caller should treat this as a terminal event for the connection
    /// and poll the session or wait for a webhook instead of blocking on
    /// it (§9 design note).
    AwaitingApproval { call_id: String, tool_name: String, approval_id: String },
    Usage { total_tokens: u64 },
    Final { content: String },
    Stopped { content: String },
    Error { message: String },
}

fn transcript_line(role: &str, content: &str) -> TranscriptLine {
    sa_sessions::transcript::TranscriptWriter::line(role, content)
}

/// Spawn the turn as a background task and return the event receiver.
/// Dropping the receiver does not cancel the turn — use `CancelMap` for
/// that.
pub fn run_turn(state: Arc<AppState>, input: TurnInput) -> mpsc::Receiver<TurnEvent> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        run_turn_inner(state, input, tx).await;
    });
    rx
}

async fn run_turn_inner(state: Arc<AppState>, input: TurnInput, tx: mpsc::Sender<TurnEvent>) {
    let _permit = match state.session_locks.acquire(&input.session_key).await {
        Ok(p) => p,
        Err(busy) => {
            let _ = tx.send(TurnEvent::Error { message: busy.to_string() }).await;
            return;
        }
    };

    let cancel = state.cancel_map.register(&input.session_key);
    let agent_id = input.agent_id.clone().unwrap_or_else(|| "default".into());

    let read_only_mode = input.mode == TurnMode::Plan;
    let tool_defs = state.tools.list(read_only_mode);

    let estimate = state.token_accountant.estimate(
        &agent_id,
        input.model.as_deref().unwrap_or("default"),
        system_prompt(),
        &[Message::user(&input.user_message)],
        &tool_defs,
    );
    if let Err(exceeded) = state
        .token_accountant
        .check_quota(&agent_id, &input.session_key, &estimate)
    {
        let _ = tx
            .send(TurnEvent::Error { message: format!("budget exceeded: {exceeded}") })
            .await;
        state.cancel_map.remove(&input.session_key);
        return;
    }

    let Some(provider) = resolve_provider(&state, input.model.as_deref()) else {
        let _ = tx
            .send(TurnEvent::Error { message: "no LLM provider configured for this request".into() })
            .await;
        state.cancel_map.remove(&input.session_key);
        return;
    };

    state
        .transcripts
        .append(&input.session_id, &[transcript_line("user", &input.user_message)])
        .ok();
    state.transcript_index.index_content(&input.session_id, &input.user_message);

    maybe_compact(&state, &provider, &input).await;

    let history = state.transcripts.read(&input.session_id).unwrap_or_default();
    let active = context::active_lines(&history);
    let active_messages: Vec<Message> = active.iter().map(line_to_message).collect();

    let max_context_tokens = provider.capabilities().context_window_tokens.unwrap_or(0) as u64;
    let windowed = context::window(active_messages, max_context_tokens);

    let mut messages = vec![Message::system(system_prompt())];
    messages.extend(windowed);

    if max_context_tokens > 0 {
        let used: u64 = messages.iter().map(context::message_tokens_estimate).sum();
        if used + context::WINDOW_OUTPUT_RESERVE_TOKENS > max_context_tokens {
            let err = sa_domain::error::Error::ContextTooLarge(format!(
                "{used} tokens exceed the model's {max_context_tokens}-token context window even after windowing"
            ));
            let _ = tx.send(TurnEvent::Error { message: err.to_string() }).await;
            state.cancel_map.remove(&input.session_key);
            return;
        }
    }

    let mut total_tokens: u64 = 0;
    let mut loops = 0u32;

    loop {
        if cancel.is_cancelled() {
            let _ = tx.send(TurnEvent::Stopped { content: String::new() }).await;
            break;
        }
        if loops >= MAX_TOOL_LOOPS {
            let _ = tx
                .send(TurnEvent::Stopped { content: "stopped: tool-loop limit reached".into() })
                .await;
            break;
        }
        loops += 1;

        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: Some(0.7),
            max_tokens: Some(4096),
            json_mode: false,
            model: input.model.clone(),
        };

        let stream = match provider.chat_stream(req).await {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.send(TurnEvent::Error { message: e.to_string() }).await;
                state.cancel_map.remove(&input.session_key);
                return;
            }
        };
        tokio::pin!(stream);

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut stream_error: Option<String> = None;

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                break;
            }
            match event {
                Ok(StreamEvent::Token { text }) => {
                    content.push_str(&text);
                    let _ = tx.send(TurnEvent::Token { text }).await;
                }
                Ok(StreamEvent::ToolCallStarted { call_id, tool_name }) => {
                    let _ = tx.send(TurnEvent::ToolCall { call_id, tool_name }).await;
                }
                Ok(StreamEvent::ToolCallDelta { .. }) => {}
                Ok(StreamEvent::ToolCallFinished { call_id, tool_name, arguments }) => {
                    tool_calls.push(ToolCall { call_id, tool_name, arguments });
                }
                Ok(StreamEvent::Done { usage, .. }) => {
                    if let Some(u) = usage {
                        total_tokens += u.total_tokens as u64;
                    }
                }
                Ok(StreamEvent::Error { message }) => stream_error = Some(message),
                Err(e) => stream_error = Some(e.to_string()),
            }
        }

        if let Some(message) = stream_error {
            let _ = tx.send(TurnEvent::Error { message }).await;
            state.cancel_map.remove(&input.session_key);
            return;
        }

        if cancel.is_cancelled() {
            let _ = tx.send(TurnEvent::Stopped { content: content.clone() }).await;
            break;
        }

        if !content.is_empty() {
            messages.push(Message::assistant(&content));
            state
                .transcripts
                .append(&input.session_id, &[transcript_line("assistant", &content)])
                .ok();
            state.transcript_index.index_content(&input.session_id, &content);
        }

        if tool_calls.is_empty() {
            let _ = tx.send(TurnEvent::Final { content }).await;
            break;
        }

        let ctx = ChatContext {
            session_key: input.session_key.clone(),
            agent_id: input.agent_id.clone(),
            require_approval: true,
        };

        let results = dispatch_tool_calls(&state, &tool_calls, &ctx, &tx, &cancel).await;
        for (call, result) in tool_calls.iter().zip(results.iter()) {
            let payload = if result.success {
                result.output.clone()
            } else {
                result.error.clone().unwrap_or_default()
            };
            messages.push(Message::tool_result(&call.call_id, payload.clone()));
            state
                .transcripts
                .append(&input.session_id, &[transcript_line("tool", &payload)])
                .ok();
            let _ = tx
                .send(TurnEvent::ToolResult {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    success: result.success,
                })
                .await;
        }
    }

    let _ = tx.send(TurnEvent::Usage { total_tokens }).await;

    let usage = TokenUsage {
        session_key: input.session_key.clone(),
        model: input.model.clone().unwrap_or_else(|| "default".into()),
        input_tokens: estimate.input_tokens,
        output_tokens: total_tokens.saturating_sub(estimate.input_tokens),
        cost_usd: estimate.est_cost_usd,
        timestamp: chrono::Utc::now(),
    };
    state.token_accountant.record_usage(&agent_id, usage).ok();
    state
        .sessions
        .record_usage(&input.session_key, estimate.input_tokens, total_tokens);

    state.cancel_map.remove(&input.session_key);
}

/// Dispatch every tool call concurrently, except those requiring approval,
/// which wait on their own approval channel first. Returns results in the
/// same order as `calls`.
async fn dispatch_tool_calls(
    state: &Arc<AppState>,
    calls: &[ToolCall],
    ctx: &ChatContext,
    tx: &mpsc::Sender<TurnEvent>,
    cancel: &CancelToken,
) -> Vec<sa_tools::registry::ToolResult> {
    let futures = calls.iter().map(|call| {
        let state = state.clone();
        let ctx = ctx.clone();
        let tx = tx.clone();
        async move {
            if cancel.is_cancelled() {
                return sa_tools::registry::ToolResult::err("cancelled".into());
            }
            let Some(side_effect_class) = state.tools.get(&call.tool_name).map(|t| t.side_effect_class) else {
                return sa_tools::registry::ToolResult::err(format!("unknown tool: {}", call.tool_name));
            };

            if requires_approval(side_effect_class, ctx.require_approval) {
                let (request, rx) = state.approvals.request(
                    ctx.session_key.clone(),
                    call.tool_name.clone(),
                    format!("Run tool `{}` with args {}", call.tool_name, call.arguments),
                    sa_domain::marathon::ApprovalRisk::High,
                    call.arguments.clone(),
                );
                // This event, not `Final`, is this turn's terminal event as
                // far as an HTTP caller is concerned -- the decision is
                // made out of band via `POST /approvals/:id/{approve,reject}`
                // (§9 design note), not by holding the connection open.
                // The wait below still happens inline because the entity
                // blocked on it from here on is this background task, not
                // an HTTP connection.
                let _ = tx
                    .send(TurnEvent::AwaitingApproval {
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        approval_id: request.id.clone(),
                    })
                    .await;
                let approval_wait = Duration::from_secs(state.config.approval.default_timeout_secs.max(0) as u64);
                match timeout(approval_wait, rx).await {
                    Ok(Ok(ApprovalDecision::Approved)) => {}
                    Ok(Ok(ApprovalDecision::Denied { reason })) => {
                        return sa_tools::registry::ToolResult::err(
                            reason.unwrap_or_else(|| "tool call denied by approver".into()),
                        );
                    }
                    _ => {
                        return sa_tools::registry::ToolResult::err("approval timed out".into());
                    }
                }
            }

            let call_args = ToolCallArgs { name: call.tool_name.clone(), args: call.arguments.clone() };
            match timeout(TOOL_EXEC_TIMEOUT, state.tools.execute(&call_args, &ctx)).await {
                Ok(result) => result,
                Err(_) => sa_tools::registry::ToolResult::err(format!(
                    "tool `{}` timed out after {}s (ToolTimeout)",
                    call.tool_name,
                    TOOL_EXEC_TIMEOUT.as_secs()
                )),
            }
        }
    });

    join_all(futures).await
}

fn resolve_provider(state: &AppState, model_override: Option<&str>) -> Option<Arc<dyn sa_providers::LlmProvider>> {
    if let Some(spec) = model_override {
        if let Some((provider_id, _model)) = spec.split_once('/') {
            if let Some(p) = state.llm.get(provider_id) {
                return Some(p);
            }
        }
    }
    state
        .llm
        .for_role("executor")
        .or_else(|| state.llm.iter().next().map(|(_, p)| p.clone()))
}

fn system_prompt() -> &'static str {
    "You are a helpful, precise assistant with access to tools. Use them when they \
     help you answer accurately; otherwise respond directly."
}

async fn maybe_compact(state: &Arc<AppState>, provider: &Arc<dyn sa_providers::LlmProvider>, input: &TurnInput) {
    let history = state.transcripts.read(&input.session_id).unwrap_or_default();
    let max_context_tokens = provider.capabilities().context_window_tokens.unwrap_or(0) as u64;
    let config = &state.config.compaction;
    if context::should_compact(&history, max_context_tokens, config) {
        if let Err(e) = context::run_compaction(provider.as_ref(), &state.transcripts, &input.session_id, &history, config).await {
            tracing::warn!(session_id = %input.session_id, error = %e, "compaction failed, continuing without it");
        }
    }
}

fn line_to_message(line: &TranscriptLine) -> Message {
    match line.role.as_str() {
        "user" => Message::user(&line.content),
        "assistant" => Message::assistant(&line.content),
        "tool" => Message {
            role: sa_domain::tool::Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::Text { text: line.content.clone() }]),
        },
        _ => Message::system(&line.content),
    }
}
