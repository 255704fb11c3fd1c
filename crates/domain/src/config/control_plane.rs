use serde::{Deserialize, Serialize};

/// Control-plane (§4.J) policy: default rate limits and webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Default per-key requests-per-minute ceiling for newly-created keys
    /// that don't specify one explicitly.
    #[serde(default = "d_rpm")]
    pub default_rate_limit_rpm: u32,
    /// Per-call timeout (ms) for webhook delivery attempts.
    #[serde(default = "d_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            default_rate_limit_rpm: d_rpm(),
            webhook_timeout_ms: d_webhook_timeout_ms(),
        }
    }
}

fn d_rpm() -> u32 {
    60
}
fn d_webhook_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = ControlPlaneConfig::default();
        assert!(c.default_rate_limit_rpm > 0);
        assert!(c.webhook_timeout_ms > 0);
    }
}
