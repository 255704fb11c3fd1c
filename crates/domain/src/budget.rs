//! Token/cost budgets and the pricing table used by the Token Accountant
//! (§4.A). Pure data + pure pricing lookups; the stateful ledger lives in
//! the gateway's `runtime::token_accountant`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-model pricing, USD per 1M tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub context_window: u32,
    pub input_cost_per_1m: f64,
    pub output_cost_per_1m: f64,
}

/// Static pricing table. Unknown models resolve to [`fallback_pricing`].
pub fn pricing_table() -> HashMap<&'static str, ModelPricing> {
    HashMap::from([
        (
            "anthropic/claude-3-5-sonnet",
            ModelPricing {
                context_window: 200_000,
                input_cost_per_1m: 3.0,
                output_cost_per_1m: 15.0,
            },
        ),
        (
            "anthropic/claude-3-5-haiku",
            ModelPricing {
                context_window: 200_000,
                input_cost_per_1m: 0.8,
                output_cost_per_1m: 4.0,
            },
        ),
        (
            "openai/gpt-4o",
            ModelPricing {
                context_window: 128_000,
                input_cost_per_1m: 2.5,
                output_cost_per_1m: 10.0,
            },
        ),
        (
            "openai/gpt-4o-mini",
            ModelPricing {
                context_window: 128_000,
                input_cost_per_1m: 0.15,
                output_cost_per_1m: 0.6,
            },
        ),
        (
            "google/gemini-1.5-pro",
            ModelPricing {
                context_window: 2_000_000,
                input_cost_per_1m: 1.25,
                output_cost_per_1m: 5.0,
            },
        ),
    ])
}

/// Documented fallback entry for models absent from the pricing table.
pub fn fallback_pricing() -> ModelPricing {
    ModelPricing {
        context_window: 128_000,
        input_cost_per_1m: 3.0,
        output_cost_per_1m: 15.0,
    }
}

pub fn pricing_for(model: &str) -> ModelPricing {
    pricing_table().get(model).copied().unwrap_or_else(fallback_pricing)
}

/// Pure-function estimate of a prospective call's token/cost footprint.
/// Never blocks; never consults live state.
#[derive(Debug, Clone, Serialize)]
pub struct Estimate {
    pub input_tokens: u64,
    pub est_output_tokens: u64,
    pub total_tokens: u64,
    pub est_cost_usd: f64,
    pub within_budget: bool,
}

/// Append-only usage record, partitioned by session and calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub session_key: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Mutable spending policy. Changes apply to subsequent estimates only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default)]
    pub max_tokens_per_request: Option<u64>,
    #[serde(default)]
    pub max_tokens_per_session: Option<u64>,
    #[serde(default)]
    pub max_tokens_per_day: Option<u64>,
    #[serde(default)]
    pub max_cost_per_session_usd: Option<f64>,
    #[serde(default)]
    pub max_cost_per_day_usd: Option<f64>,
    #[serde(default = "d_warn_pct")]
    pub warn_at_pct: f64,
    #[serde(default)]
    pub enforce_hard_limits: bool,
}

fn d_warn_pct() -> f64 {
    0.8
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_tokens_per_request: None,
            max_tokens_per_session: None,
            max_tokens_per_day: None,
            max_cost_per_session_usd: None,
            max_cost_per_day_usd: None,
            warn_at_pct: d_warn_pct(),
            enforce_hard_limits: false,
        }
    }
}

/// Partial update merged into a live [`Budget`] by `updateBudget`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetPatch {
    pub max_tokens_per_request: Option<Option<u64>>,
    pub max_tokens_per_session: Option<Option<u64>>,
    pub max_tokens_per_day: Option<Option<u64>>,
    pub max_cost_per_session_usd: Option<Option<f64>>,
    pub max_cost_per_day_usd: Option<Option<f64>>,
    pub warn_at_pct: Option<f64>,
    pub enforce_hard_limits: Option<bool>,
}

impl Budget {
    pub fn apply(&mut self, patch: BudgetPatch) {
        if let Some(v) = patch.max_tokens_per_request {
            self.max_tokens_per_request = v;
        }
        if let Some(v) = patch.max_tokens_per_session {
            self.max_tokens_per_session = v;
        }
        if let Some(v) = patch.max_tokens_per_day {
            self.max_tokens_per_day = v;
        }
        if let Some(v) = patch.max_cost_per_session_usd {
            self.max_cost_per_session_usd = v;
        }
        if let Some(v) = patch.max_cost_per_day_usd {
            self.max_cost_per_day_usd = v;
        }
        if let Some(v) = patch.warn_at_pct {
            self.warn_at_pct = v;
        }
        if let Some(v) = patch.enforce_hard_limits {
            self.enforce_hard_limits = v;
        }
    }
}

/// Result of [`Budget`] enforcement against a prospective spend.
#[derive(Debug, Clone)]
pub struct SpendingCheck {
    pub can_proceed: bool,
    pub warning: Option<String>,
}

/// `kind` distinguishes which limit was crossed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("spending limit exceeded ({kind}): current {current}, limit {limit}")]
pub struct SpendingLimitExceeded {
    pub kind: SpendingLimitKind,
    pub current: f64,
    pub limit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendingLimitKind {
    Session,
    Daily,
}

impl std::fmt::Display for SpendingLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpendingLimitKind::Session => write!(f, "session"),
            SpendingLimitKind::Daily => write!(f, "daily"),
        }
    }
}

/// character count / 4 (ceiling), the documented token-estimation heuristic.
pub fn chars_to_tokens(chars: usize) -> u64 {
    ((chars + 3) / 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back() {
        let p = pricing_for("some/unheard-of-model");
        let fb = fallback_pricing();
        assert_eq!(p.input_cost_per_1m, fb.input_cost_per_1m);
    }

    #[test]
    fn chars_to_tokens_ceiling() {
        assert_eq!(chars_to_tokens(0), 0);
        assert_eq!(chars_to_tokens(1), 1);
        assert_eq!(chars_to_tokens(4), 1);
        assert_eq!(chars_to_tokens(5), 2);
    }

    #[test]
    fn budget_patch_merges_only_present_fields() {
        let mut b = Budget {
            enforce_hard_limits: true,
            ..Budget::default()
        };
        b.apply(BudgetPatch {
            warn_at_pct: Some(0.9),
            ..Default::default()
        });
        assert!(b.enforce_hard_limits);
        assert_eq!(b.warn_at_pct, 0.9);
    }
}
