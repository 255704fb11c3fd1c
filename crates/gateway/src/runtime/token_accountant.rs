//! Stateful per-session and per-day token/cost ledger (§4.A).
//!
//! Grounded on the quota tracker's date-rollover-plus-`RwLock<HashMap>`
//! shape: usage is kept in memory for fast budget checks and mirrored to
//! an append-only JSONL ledger at `{data_dir}/token/usage-{date}.jsonl`
//! (§3) so a restart can be reconciled from disk if ever needed, without
//! the gateway needing to replay it to serve a request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use sa_domain::budget::{
    chars_to_tokens, pricing_for, Budget, Estimate, SpendingCheck, SpendingLimitExceeded,
    SpendingLimitKind, TokenUsage,
};
use sa_domain::config::quota::QuotaConfig;
use sa_domain::error::{Error, Result};
use sa_domain::tool::{Message, ToolDefinition};

use crate::runtime::context::message_tokens_estimate;

/// Cap on `estOutputTokens` when `estimate` derives it from input size
/// (§4.A: `min(ceil(inputTokens * 0.25), 8192)`).
const MAX_EST_OUTPUT_TOKENS: u64 = 8192;
/// Fraction of input tokens assumed as a prospective reply's size.
const EST_OUTPUT_RATIO: f64 = 0.25;
/// Per-message overhead tokens added on top of its content (role framing,
/// message boundaries), mirroring what providers bill for chat-formatted
/// turns.
const PER_MESSAGE_OVERHEAD_TOKENS: u64 = 4;

#[derive(Debug, Clone, Default)]
struct DailyTotal {
    date: Option<NaiveDate>,
    tokens: u64,
    cost_usd: f64,
}

#[derive(Debug, Clone, Default)]
struct SessionTotal {
    tokens: u64,
    cost_usd: f64,
}

pub struct TokenAccountant {
    data_dir: PathBuf,
    quota: QuotaConfig,
    budget: RwLock<Budget>,
    daily: RwLock<HashMap<String, DailyTotal>>,
    sessions: RwLock<HashMap<String, SessionTotal>>,
}

impl TokenAccountant {
    pub fn new(data_dir: &Path, quota: QuotaConfig, budget: Budget) -> Result<Self> {
        std::fs::create_dir_all(data_dir.join("token")).map_err(Error::Io)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            quota,
            budget: RwLock::new(budget),
            daily: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn budget(&self) -> Budget {
        self.budget.read().clone()
    }

    pub fn update_budget(&self, f: impl FnOnce(&mut Budget)) {
        let mut b = self.budget.write();
        f(&mut b);
    }

    fn resolve_daily_limits(&self, agent_id: &str) -> (Option<u64>, Option<f64>) {
        if let Some(over) = self.quota.per_agent.get(agent_id) {
            (over.daily_tokens, over.daily_cost_usd)
        } else {
            (
                self.quota.default_daily_tokens,
                self.quota.default_daily_cost_usd,
            )
        }
    }

    fn daily_snapshot(&self, agent_id: &str) -> DailyTotal {
        let today = Utc::now().date_naive();
        let mut daily = self.daily.write();
        let entry = daily.entry(agent_id.to_string()).or_default();
        if entry.date != Some(today) {
            entry.date = Some(today);
            entry.tokens = 0;
            entry.cost_usd = 0.0;
        }
        entry.clone()
    }

    /// Pure-estimate a prospective call's footprint by summing the system
    /// prompt, every message in the active window (each with a
    /// [`PER_MESSAGE_OVERHEAD_TOKENS`] overhead), and the serialized tool
    /// schemas that will ride along in the request, before any of it
    /// leaves the gateway. `est_output_tokens` is derived internally per
    /// §4.A rather than supplied by the caller.
    pub fn estimate(
        &self,
        agent_id: &str,
        model: &str,
        system_prompt: &str,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
    ) -> Estimate {
        let mut input_tokens = chars_to_tokens(system_prompt.len());
        for message in messages {
            input_tokens += message_tokens_estimate(message) + PER_MESSAGE_OVERHEAD_TOKENS;
        }
        let tool_schema_chars: usize = tool_defs
            .iter()
            .map(|t| serde_json::to_string(t).map(|s| s.len()).unwrap_or(0))
            .sum();
        input_tokens += chars_to_tokens(tool_schema_chars);

        let est_output_tokens =
            ((input_tokens as f64 * EST_OUTPUT_RATIO).ceil() as u64).min(MAX_EST_OUTPUT_TOKENS);
        let total_tokens = input_tokens + est_output_tokens;
        let pricing = pricing_for(model);
        let est_cost_usd = (input_tokens as f64 / 1_000_000.0) * pricing.input_cost_per_1m
            + (est_output_tokens as f64 / 1_000_000.0) * pricing.output_cost_per_1m;

        let budget = self.budget.read();
        let mut within_budget = true;
        if let Some(max_req) = budget.max_tokens_per_request {
            within_budget &= total_tokens <= max_req;
        }
        if budget.enforce_hard_limits {
            let (daily_tokens_limit, daily_cost_limit) = self.resolve_daily_limits(agent_id);
            let today = self.daily_snapshot(agent_id);
            if let Some(limit) = daily_tokens_limit {
                within_budget &= today.tokens + total_tokens <= limit;
            }
            if let Some(limit) = daily_cost_limit {
                within_budget &= today.cost_usd + est_cost_usd <= limit;
            }
        }

        Estimate {
            input_tokens,
            est_output_tokens,
            total_tokens,
            est_cost_usd,
            within_budget,
        }
    }

    /// Pre-flight check run before a turn is allowed to start. Returns
    /// `Err` only when `enforce_hard_limits` is set and a configured
    /// ceiling would be crossed; otherwise returns a [`SpendingCheck`]
    /// that may still carry a `warn_at_pct` warning.
    pub fn check_quota(
        &self,
        agent_id: &str,
        session_key: &str,
        estimate: &Estimate,
    ) -> std::result::Result<SpendingCheck, SpendingLimitExceeded> {
        let budget = self.budget.read().clone();

        let session_total = {
            let sessions = self.sessions.read();
            sessions.get(session_key).cloned().unwrap_or_default()
        };
        let daily_total = self.daily_snapshot(agent_id);
        let (daily_tokens_limit, daily_cost_limit) = self.resolve_daily_limits(agent_id);

        let projected_session_tokens = session_total.tokens + estimate.total_tokens;
        let projected_session_cost = session_total.cost_usd + estimate.est_cost_usd;
        let projected_daily_tokens = daily_total.tokens + estimate.total_tokens;
        let projected_daily_cost = daily_total.cost_usd + estimate.est_cost_usd;

        if budget.enforce_hard_limits {
            if let Some(limit) = budget.max_cost_per_session_usd {
                if projected_session_cost > limit {
                    return Err(SpendingLimitExceeded {
                        kind: SpendingLimitKind::Session,
                        current: projected_session_cost,
                        limit,
                    });
                }
            }
            if let Some(limit) = budget.max_tokens_per_session {
                if projected_session_tokens > limit {
                    return Err(SpendingLimitExceeded {
                        kind: SpendingLimitKind::Session,
                        current: projected_session_tokens as f64,
                        limit: limit as f64,
                    });
                }
            }
            if let Some(limit) = daily_cost_limit.or(budget.max_cost_per_day_usd) {
                if projected_daily_cost > limit {
                    return Err(SpendingLimitExceeded {
                        kind: SpendingLimitKind::Daily,
                        current: projected_daily_cost,
                        limit,
                    });
                }
            }
            if let Some(limit) = daily_tokens_limit.or(budget.max_tokens_per_day) {
                if projected_daily_tokens > limit {
                    return Err(SpendingLimitExceeded {
                        kind: SpendingLimitKind::Daily,
                        current: projected_daily_tokens as f64,
                        limit: limit as f64,
                    });
                }
            }
        }

        let warn_ratio = |current: f64, limit: Option<f64>| {
            limit.is_some_and(|l| l > 0.0 && current / l >= budget.warn_at_pct)
        };
        let warning = if warn_ratio(projected_session_cost, budget.max_cost_per_session_usd)
            || warn_ratio(
                projected_daily_cost,
                daily_cost_limit.or(budget.max_cost_per_day_usd),
            )
        {
            Some(format!(
                "approaching spending limit ({:.0}% threshold)",
                budget.warn_at_pct * 100.0
            ))
        } else {
            None
        };

        Ok(SpendingCheck {
            can_proceed: true,
            warning,
        })
    }

    /// Record an actual usage event: updates in-memory session/day totals
    /// and appends a line to the day's JSONL ledger.
    pub fn record_usage(&self, agent_id: &str, usage: TokenUsage) -> Result<()> {
        let cost = usage.cost_usd;
        let tokens = usage.input_tokens + usage.output_tokens;

        {
            let mut sessions = self.sessions.write();
            let entry = sessions.entry(usage.session_key.clone()).or_default();
            entry.tokens += tokens;
            entry.cost_usd += cost;
        }
        {
            let today = self.daily_snapshot(agent_id);
            let mut daily = self.daily.write();
            let entry = daily.entry(agent_id.to_string()).or_insert(today);
            entry.tokens += tokens;
            entry.cost_usd += cost;
        }

        self.append_ledger(&usage)
    }

    fn ledger_path(&self, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join("token")
            .join(format!("usage-{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn append_ledger(&self, usage: &TokenUsage) -> Result<()> {
        use std::io::Write;
        let path = self.ledger_path(usage.timestamp.date_naive());
        let line = serde_json::to_string(usage)
            .map_err(|e| Error::Other(format!("serializing usage record: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        writeln!(file, "{line}").map_err(Error::Io)?;
        Ok(())
    }

    pub fn session_usage(&self, session_key: &str) -> (u64, f64) {
        let sessions = self.sessions.read();
        sessions
            .get(session_key)
            .map(|s| (s.tokens, s.cost_usd))
            .unwrap_or((0, 0.0))
    }

    pub fn daily_usage(&self, agent_id: &str) -> (u64, f64) {
        let d = self.daily_snapshot(agent_id);
        (d.tokens, d.cost_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn accountant() -> (tempfile::TempDir, TokenAccountant) {
        let dir = tempfile::tempdir().unwrap();
        let acc = TokenAccountant::new(dir.path(), QuotaConfig::default(), Budget::default()).unwrap();
        (dir, acc)
    }

    #[test]
    fn estimate_within_budget_when_unconfigured() {
        let (_dir, acc) = accountant();
        let messages = vec![Message::user(&"x".repeat(400))];
        let est = acc.estimate("default", "openai/gpt-4o", "", &messages, &[]);
        assert!(est.within_budget);
        assert_eq!(est.input_tokens, 100 + 4);
    }

    #[test]
    fn estimate_sums_system_prompt_messages_and_tool_schemas() {
        let (_dir, acc) = accountant();
        let messages = vec![Message::user("hi"), Message::assistant("hello there")];
        let tools = vec![sa_domain::tool::ToolDefinition {
            name: "exec".into(),
            description: "run a command".into(),
            parameters: serde_json::json!({ "type": "object" }),
        }];
        let bare = acc.estimate("default", "openai/gpt-4o", "", &[], &[]);
        let with_everything = acc.estimate("default", "openai/gpt-4o", "you are an assistant", &messages, &tools);
        assert!(with_everything.input_tokens > bare.input_tokens);
    }

    #[test]
    fn estimate_output_is_capped_and_ratio_based() {
        let (_dir, acc) = accountant();
        let small = acc.estimate("default", "openai/gpt-4o", "", &[Message::user("hi")], &[]);
        assert_eq!(small.est_output_tokens, ((small.input_tokens as f64 * EST_OUTPUT_RATIO).ceil() as u64));

        let messages = vec![Message::user(&"x".repeat(200_000))];
        let huge = acc.estimate("default", "openai/gpt-4o", "", &messages, &[]);
        assert_eq!(huge.est_output_tokens, MAX_EST_OUTPUT_TOKENS);
    }

    #[test]
    fn hard_limit_rejects_when_exceeded() {
        let (_dir, acc) = accountant();
        acc.update_budget(|b| {
            b.enforce_hard_limits = true;
            b.max_tokens_per_session = Some(10);
        });
        let messages = vec![Message::user(&"x".repeat(400))];
        let est = acc.estimate("default", "openai/gpt-4o", "", &messages, &[]);
        let result = acc.check_quota("default", "sess-1", &est);
        assert!(result.is_err());
    }

    #[test]
    fn record_usage_accumulates_and_writes_ledger() {
        let (dir, acc) = accountant();
        let usage = TokenUsage {
            session_key: "sess-1".into(),
            model: "openai/gpt-4o".into(),
            input_tokens: 100,
            output_tokens: 50,
            cost_usd: 0.01,
            timestamp: Utc::now(),
        };
        acc.record_usage("default", usage).unwrap();
        let (tokens, cost) = acc.session_usage("sess-1");
        assert_eq!(tokens, 150);
        assert!((cost - 0.01).abs() < 1e-9);

        let ledger = dir
            .path()
            .join("token")
            .join(format!("usage-{}.jsonl", Utc::now().format("%Y-%m-%d")));
        assert!(ledger.exists());
    }
}
