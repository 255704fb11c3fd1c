use serde::{Deserialize, Serialize};

/// Approval Gate policy (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Default timeout for a pending approval request, in seconds.
    #[serde(default = "d_timeout_secs")]
    pub default_timeout_secs: i64,
    /// Whether `destructive`/`external` tool calls require approval by
    /// default when the calling context doesn't say otherwise.
    #[serde(default = "d_true")]
    pub require_for_destructive: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: d_timeout_secs(),
            require_for_destructive: true,
        }
    }
}

fn d_timeout_secs() -> i64 {
    24 * 60 * 60
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_24h() {
        assert_eq!(ApprovalConfig::default().default_timeout_secs, 86_400);
    }
}
