use serde::{Deserialize, Serialize};

/// Marathon orchestrator timing and durability policy (§4.G, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarathonConfig {
    /// Seconds between heartbeat updates while a marathon executes.
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    /// Snapshot a full checkpoint every N completed milestones.
    #[serde(default = "d_checkpoint_interval")]
    pub checkpoint_interval: u32,
    /// Per-milestone retry cap on turn exceptions before marking `failed`.
    #[serde(default = "d_milestone_retries")]
    pub milestone_retry_limit: u32,
    /// Watchdog tick period, seconds.
    #[serde(default = "d_watchdog_tick_secs")]
    pub watchdog_tick_secs: u64,
    /// Heartbeat age (seconds) beyond which a marathon is considered crashed.
    #[serde(default = "d_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    /// Maximum watchdog-driven restart attempts per marathon id.
    #[serde(default = "d_max_restarts")]
    pub max_restart_attempts: u32,
}

impl Default for MarathonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: d_heartbeat_secs(),
            checkpoint_interval: d_checkpoint_interval(),
            milestone_retry_limit: d_milestone_retries(),
            watchdog_tick_secs: d_watchdog_tick_secs(),
            stale_threshold_secs: d_stale_threshold_secs(),
            max_restart_attempts: d_max_restarts(),
        }
    }
}

fn d_heartbeat_secs() -> u64 {
    30
}
fn d_checkpoint_interval() -> u32 {
    5
}
fn d_milestone_retries() -> u32 {
    3
}
fn d_watchdog_tick_secs() -> u64 {
    60
}
fn d_stale_threshold_secs() -> u64 {
    300
}
fn d_max_restarts() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_recommendations() {
        let c = MarathonConfig::default();
        assert_eq!(c.heartbeat_interval_secs, 30);
        assert_eq!(c.checkpoint_interval, 5);
        assert_eq!(c.watchdog_tick_secs, 60);
        assert_eq!(c.stale_threshold_secs, 300);
        assert_eq!(c.max_restart_attempts, 5);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let c: MarathonConfig = toml::from_str("").unwrap();
        assert_eq!(c.milestone_retry_limit, 3);
    }
}
