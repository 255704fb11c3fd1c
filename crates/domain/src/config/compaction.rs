use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses old conversation history into a summary so the
/// context window doesn't overflow after many turns (§4.B). Triggering is
/// token-ratio based rather than turn-count based: it fires once
/// `(systemTokens + msgTokens) / maxContextTokens >= trigger_ratio` *and*
/// there are at least `min_messages` messages in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Enable auto-compaction.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Context-fill ratio at which auto-compaction triggers.
    #[serde(default = "d_trigger_ratio")]
    pub trigger_ratio: f64,
    /// Minimum message count before auto-compaction is even considered.
    #[serde(default = "d_min_messages")]
    pub min_messages: usize,
    /// Floor on how many newest messages are always kept verbatim,
    /// regardless of `keep_ratio` (`max(keep_min, ceil(keep_ratio * n))`).
    #[serde(default = "d_keep_min")]
    pub keep_min: usize,
    /// Fraction of the message log kept verbatim after compaction.
    #[serde(default = "d_keep_ratio")]
    pub keep_ratio: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            trigger_ratio: d_trigger_ratio(),
            min_messages: d_min_messages(),
            keep_min: d_keep_min(),
            keep_ratio: d_keep_ratio(),
        }
    }
}

fn d_trigger_ratio() -> f64 {
    0.75
}
fn d_min_messages() -> usize {
    10
}
fn d_keep_min() -> usize {
    4
}
fn d_keep_ratio() -> f64 {
    0.3
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls automatic memory capture — the always-on behaviour that
/// makes the agent feel alive across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLifecycleConfig {
    /// Automatically capture each turn to long-term memory.
    #[serde(default = "d_true")]
    pub auto_capture: bool,
    /// Ingest a session summary to memory when compaction runs.
    #[serde(default = "d_true")]
    pub capture_on_compaction: bool,
}

impl Default for MemoryLifecycleConfig {
    fn default() -> Self {
        Self {
            auto_capture: true,
            capture_on_compaction: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
