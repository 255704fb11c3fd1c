//! Durable marathon state and approval requests (§3, §4.G, §4.H).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::milestone::MarathonPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarathonStatus {
    Planning,
    Executing,
    Paused,
    AwaitingApproval,
    Completed,
    Failed,
    Aborted,
}

impl MarathonStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MarathonStatus::Completed | MarathonStatus::Failed | MarathonStatus::Aborted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub marathon_id: String,
    pub action: String,
    pub description: String,
    pub risk: ApprovalRisk,
    pub params: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
    /// When this pending request expires to `Expired` if undecided.
    pub expires_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(
        marathon_id: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
        risk: ApprovalRisk,
        params: serde_json::Value,
        timeout: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            marathon_id: marathon_id.into(),
            action: action.into(),
            description: description.into(),
            risk,
            params,
            timestamp: now,
            status: ApprovalStatus::Pending,
            decided_by: None,
            decided_at: None,
            reason: None,
            expires_at: now + timeout,
        }
    }
}

/// One ring-buffer log line attached to a marathon for operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarathonLogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Durable, crash-safe marathon state (§3 invariant: never a torn write —
/// see the gateway's `runtime::marathon::store`, which persists this via
/// write-temp-then-rename on every transition named in §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarathonState {
    pub id: String,
    pub plan: MarathonPlan,
    pub status: MarathonStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: DateTime<Utc>,
    /// Bounded ring buffer of recent log lines (capacity enforced by the
    /// store, not this struct).
    pub logs: VecDeque<MarathonLogLine>,
    pub approval_requests: Vec<ApprovalRequest>,
    pub total_tokens_used: u64,
    pub total_cost_usd: f64,
    pub heartbeat_at: DateTime<Utc>,
    pub working_directory: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl MarathonState {
    pub fn new(goal: impl Into<String>, working_directory: Option<String>, webhook_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            plan: MarathonPlan {
                goal: goal.into(),
                milestones: Vec::new(),
                current_milestone_index: 0,
            },
            status: MarathonStatus::Planning,
            started_at: now,
            completed_at: None,
            last_checkpoint_at: now,
            logs: VecDeque::new(),
            approval_requests: Vec::new(),
            total_tokens_used: 0,
            total_cost_usd: 0.0,
            heartbeat_at: now,
            working_directory,
            webhook_url,
            restart_count: 0,
            failure_reason: None,
        }
    }

    const LOG_CAPACITY: usize = 200;

    pub fn push_log(&mut self, message: impl Into<String>) {
        if self.logs.len() >= Self::LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(MarathonLogLine {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// §3 invariant check used by the Watchdog before registering a
    /// recovered state: at most one milestone `in-progress`, and the
    /// cursor agrees with the plan.
    pub fn validate_invariants(&self) -> Result<(), String> {
        use crate::milestone::MilestoneStatus;
        let in_progress = self
            .plan
            .milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Err(format!(
                "{} milestones in-progress, expected at most 1",
                in_progress
            ));
        }
        let expected_cursor = self
            .plan
            .milestones
            .iter()
            .position(|m| !m.is_terminal())
            .unwrap_or(self.plan.milestones.len());
        if expected_cursor != self.plan.current_milestone_index {
            return Err(format!(
                "current_milestone_index {} does not match expected {}",
                self.plan.current_milestone_index, expected_cursor
            ));
        }
        self.plan
            .validate()
            .map_err(|e| e.to_string())
            .or_else(|e| {
                // A plan with zero milestones is only valid pre-planning.
                if self.status == MarathonStatus::Planning && self.plan.milestones.is_empty() {
                    Ok(())
                } else {
                    Err(e)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milestone::{Milestone, MilestoneStatus};

    #[test]
    fn new_state_is_planning_with_empty_plan() {
        let s = MarathonState::new("goal", None, None);
        assert_eq!(s.status, MarathonStatus::Planning);
        assert!(s.validate_invariants().is_ok());
    }

    #[test]
    fn two_in_progress_milestones_fails_validation() {
        let mut s = MarathonState::new("goal", None, None);
        s.plan.milestones.push(Milestone::new("a", "a", "", vec![]));
        s.plan.milestones.push(Milestone::new("b", "b", "", vec![]));
        s.plan.milestones[0].status = MilestoneStatus::InProgress;
        s.plan.milestones[1].status = MilestoneStatus::InProgress;
        s.plan.current_milestone_index = 0;
        assert!(s.validate_invariants().is_err());
    }

    #[test]
    fn log_ring_buffer_caps_capacity() {
        let mut s = MarathonState::new("goal", None, None);
        for i in 0..(MarathonState::LOG_CAPACITY + 10) {
            s.push_log(format!("line {i}"));
        }
        assert_eq!(s.logs.len(), MarathonState::LOG_CAPACITY);
        assert!(s.logs.back().unwrap().message.contains(&(MarathonState::LOG_CAPACITY + 9).to_string()));
    }
}
