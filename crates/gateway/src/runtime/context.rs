//! Context window management — auto-compaction of old conversation history
//! so long sessions don't overflow the model's context window (§4.B).
//!
//! Compaction appends a summary marker to the transcript (never rewrites
//! history in place). When history is loaded for a turn, only lines after
//! the last marker are replayed verbatim; the marker itself is surfaced as
//! a system message carrying the summary.
//!
//! Triggering is token-ratio based: compaction fires once
//! `(systemTokens + msgTokens) / maxContextTokens >= trigger_ratio` *and*
//! there are at least `min_messages` messages since the last marker. The
//! newest `max(keep_min, ceil(keep_ratio * n))` messages are always kept
//! verbatim.

use sa_domain::budget::chars_to_tokens;
use sa_domain::config::CompactionConfig;
use sa_domain::tool::{ContentPart, Message, MessageContent};
use sa_providers::traits::ChatRequest;
use sa_providers::LlmProvider;
use sa_sessions::transcript::{TranscriptLine, TranscriptWriter};

/// Output tokens reserved by [`window`] when trimming to `maxTokens` (§4.B).
pub const WINDOW_OUTPUT_RESERVE_TOKENS: u64 = 2000;

/// Find the index of the last compaction marker, or 0 if none exists.
/// The marker line itself is included (it becomes a system message).
pub fn compaction_boundary(lines: &[TranscriptLine]) -> usize {
    for i in (0..lines.len()).rev() {
        if is_compaction_marker(&lines[i]) {
            return i;
        }
    }
    0
}

/// Lines active since the last compaction marker (marker excluded).
pub fn active_lines(lines: &[TranscriptLine]) -> &[TranscriptLine] {
    let start = compaction_boundary(lines);
    if !lines.is_empty() && is_compaction_marker(&lines[start]) {
        &lines[start + 1..]
    } else {
        &lines[start..]
    }
}

fn line_tokens(line: &TranscriptLine) -> u64 {
    chars_to_tokens(line.content.len())
}

/// `(systemTokens + msgTokens)` for the active window — system-role lines
/// counted separately only to keep the naming aligned with the operation's
/// contract; both are summed from the same transcript.
pub fn active_token_count(lines: &[TranscriptLine]) -> u64 {
    active_lines(lines).iter().map(line_tokens).sum()
}

/// Whether auto-compaction should run given the active window and the
/// model's context window size.
pub fn should_compact(lines: &[TranscriptLine], max_context_tokens: u64, config: &CompactionConfig) -> bool {
    if !config.auto || max_context_tokens == 0 {
        return false;
    }
    let active = active_lines(lines);
    if active.len() < config.min_messages {
        return false;
    }
    let used = active_token_count(lines) as f64;
    used / max_context_tokens as f64 >= config.trigger_ratio
}

/// How many of the newest active messages to keep verbatim.
pub fn keep_count(active_len: usize, config: &CompactionConfig) -> usize {
    let ratio_based = (active_len as f64 * config.keep_ratio).ceil() as usize;
    config.keep_min.max(ratio_based).min(active_len)
}

/// Split the active window into (lines_to_compact, lines_to_keep).
pub fn split_for_compaction<'a>(
    lines: &'a [TranscriptLine],
    config: &CompactionConfig,
) -> (&'a [TranscriptLine], &'a [TranscriptLine]) {
    let active = active_lines(lines);
    let keep = keep_count(active.len(), config);
    let split_at = active.len() - keep;
    (&active[..split_at], &active[split_at..])
}

fn content_part_chars(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } => text.len(),
        ContentPart::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
        ContentPart::ToolResult { content, .. } => content.len(),
    }
}

fn message_chars(message: &Message) -> usize {
    match &message.content {
        MessageContent::Text(text) => text.len(),
        MessageContent::Parts(parts) => parts.iter().map(content_part_chars).sum(),
    }
}

/// Estimated token footprint of one message (role overhead not included;
/// see `token_accountant::estimate` for the per-message `+4` overhead used
/// when sizing an outbound request).
pub fn message_tokens_estimate(message: &Message) -> u64 {
    chars_to_tokens(message_chars(message))
}

/// The `window` operation (§4.B): trim `messages` to fit within
/// `max_context_tokens`, reserving [`WINDOW_OUTPUT_RESERVE_TOKENS`] for the
/// model's own output. Drops the oldest messages first; the most recent
/// message is always kept, even if it alone exceeds the remaining budget.
pub fn window(messages: Vec<Message>, max_context_tokens: u64) -> Vec<Message> {
    if max_context_tokens == 0 || messages.len() <= 1 {
        return messages;
    }

    let budget = max_context_tokens.saturating_sub(WINDOW_OUTPUT_RESERVE_TOKENS);
    let tokens: Vec<u64> = messages.iter().map(message_tokens_estimate).collect();
    let mut total: u64 = tokens.iter().sum();

    let mut start = 0;
    while start + 1 < messages.len() && total > budget {
        total -= tokens[start];
        start += 1;
    }

    if start == 0 {
        messages
    } else {
        messages[start..].to_vec()
    }
}

/// Generate a compaction summary using the LLM (non-streaming).
pub async fn generate_summary(
    provider: &dyn LlmProvider,
    lines_to_compact: &[TranscriptLine],
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let conversation = build_conversation_text(lines_to_compact);

    let prompt = format!(
        "You are a conversation summarizer. Summarize the following conversation \
         history into a concise summary that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned about the user or context\n\
         5. Tool state (running processes, active sessions, pending work)\n\n\
         Be concise but preserve all actionable context. Write in present tense.\n\
         Omit greetings and pleasantries. Focus on substance.\n\n\
         CONVERSATION:\n{conversation}"
    );

    let messages = vec![sa_domain::tool::Message::user(&prompt)];

    let req = ChatRequest {
        messages,
        tools: vec![],
        temperature: Some(0.1),
        max_tokens: Some(2000),
        json_mode: false,
        model: None,
    };

    let resp = provider.chat(req).await?;
    Ok(resp.content)
}

/// Create a transcript line that serves as the compaction marker.
pub fn compaction_line(summary: &str, messages_compacted: usize) -> TranscriptLine {
    let mut line = TranscriptWriter::line("system", summary);
    line.metadata = Some(serde_json::json!({
        "compaction": true,
        "messages_compacted": messages_compacted,
    }));
    line
}

/// Run the full compaction flow: split → summarize → persist marker.
/// Returns the generated summary, or an empty string if there was nothing
/// to compact.
pub async fn run_compaction(
    provider: &dyn LlmProvider,
    transcripts: &TranscriptWriter,
    session_id: &str,
    lines: &[TranscriptLine],
    config: &CompactionConfig,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let (to_compact, _to_keep) = split_for_compaction(lines, config);

    if to_compact.is_empty() {
        return Ok(String::new());
    }

    let messages_compacted = to_compact.len();
    let summary = generate_summary(provider, to_compact).await?;

    let marker = compaction_line(&summary, messages_compacted);
    transcripts.append(session_id, &[marker])?;

    tracing::info!(
        session_id = session_id,
        messages_compacted = messages_compacted,
        summary_len = summary.len(),
        "transcript compacted"
    );

    Ok(summary)
}

/// Resolve an LLM provider suitable for compaction (summarizer > executor > any).
pub fn resolve_compaction_provider(
    state: &crate::state::AppState,
) -> Option<std::sync::Arc<dyn LlmProvider>> {
    state
        .llm
        .for_role("summarizer")
        .or_else(|| state.llm.for_role("executor"))
        .or_else(|| state.llm.iter().next().map(|(_, p)| p.clone()))
}

fn is_compaction_marker(line: &TranscriptLine) -> bool {
    line.metadata
        .as_ref()
        .and_then(|m| m.get("compaction"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn build_conversation_text(lines: &[TranscriptLine]) -> String {
    let mut buf = String::new();
    for line in lines {
        let role_label = match line.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            "tool" => "Tool",
            "system" => "System",
            other => other,
        };
        buf.push_str(role_label);
        buf.push_str(": ");
        if line.content.len() > 2000 {
            buf.push_str(&line.content[..1000]);
            buf.push_str(" [...] ");
            buf.push_str(&line.content[line.content.len() - 500..]);
        } else {
            buf.push_str(&line.content);
        }
        buf.push('\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(role: &str, content: &str) -> TranscriptLine {
        TranscriptWriter::line(role, content)
    }

    fn compaction(summary: &str) -> TranscriptLine {
        compaction_line(summary, 5)
    }

    fn cfg() -> CompactionConfig {
        CompactionConfig {
            auto: true,
            trigger_ratio: 0.75,
            min_messages: 4,
            keep_min: 2,
            keep_ratio: 0.3,
        }
    }

    #[test]
    fn no_compaction_marker() {
        let lines = vec![line("user", "hello"), line("assistant", "hi")];
        assert_eq!(compaction_boundary(&lines), 0);
        assert_eq!(active_lines(&lines).len(), 2);
    }

    #[test]
    fn compaction_boundary_after_marker() {
        let lines = vec![
            line("user", "old"),
            line("assistant", "old reply"),
            compaction("summary of old conversation"),
            line("user", "new"),
            line("assistant", "new reply"),
        ];
        assert_eq!(compaction_boundary(&lines), 2);
        assert_eq!(active_lines(&lines).len(), 2);
    }

    #[test]
    fn should_compact_requires_min_messages() {
        let config = cfg();
        let lines = vec![line("user", &"x".repeat(4000)), line("assistant", "hi")];
        // Below min_messages (4) even though token ratio would trigger.
        assert!(!should_compact(&lines, 1000, &config));
    }

    #[test]
    fn should_compact_fires_past_ratio() {
        let config = cfg();
        let big = "x".repeat(4000); // ~1000 tokens
        let lines: Vec<_> = (0..5)
            .flat_map(|_| vec![line("user", &big), line("assistant", "ok")])
            .collect();
        assert!(should_compact(&lines, 1000, &config));
    }

    #[test]
    fn keep_count_respects_floor() {
        let config = cfg();
        assert_eq!(keep_count(3, &config), 2); // floor wins over ratio (0.9 -> 1 -> max(2,1)=2... clamp to 3)
        assert_eq!(keep_count(20, &config), 6); // ceil(20*0.3)=6 > keep_min
    }

    #[test]
    fn window_keeps_most_recent_message_when_it_alone_exceeds_budget() {
        let messages = vec![Message::user(&"x".repeat(40_000))];
        let windowed = window(messages.clone(), 100);
        assert_eq!(windowed.len(), 1);
    }

    #[test]
    fn window_drops_oldest_first_until_within_budget() {
        let messages: Vec<_> = (0..10).map(|i| Message::user(format!("msg {i}"))).collect();
        let windowed = window(messages.clone(), 10);
        assert!(windowed.len() < messages.len());
        assert_eq!(windowed.last().unwrap().content.text(), messages.last().unwrap().content.text());
    }

    #[test]
    fn window_is_noop_when_under_budget() {
        let messages: Vec<_> = (0..3).map(|i| Message::user(format!("msg {i}"))).collect();
        let windowed = window(messages.clone(), 1_000_000);
        assert_eq!(windowed.len(), messages.len());
    }

    #[test]
    fn split_keeps_newest_messages() {
        let config = cfg();
        let lines: Vec<_> = (0..10)
            .flat_map(|i| vec![line("user", &format!("msg {i}")), line("assistant", "ok")])
            .collect();
        let (to_compact, to_keep) = split_for_compaction(&lines, &config);
        assert!(to_compact.len() + to_keep.len() == lines.len());
        assert!(to_keep.last().unwrap().content == "ok");
    }
}
