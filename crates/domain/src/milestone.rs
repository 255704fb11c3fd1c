//! Milestones and marathon plans (§4.F Marathon Planner data model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: MilestoneStatus,
    /// Ids of milestones that must complete before this one may start.
    /// Always a subset of strictly-earlier ids (DAG property enforced
    /// by the planner at plan-creation time).
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default = "d_attempt")]
    pub attempt: u32,
}

fn d_attempt() -> u32 {
    1
}

impl Milestone {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>, depends_on: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: MilestoneStatus::Pending,
            depends_on,
            result: None,
            tokens_used: 0,
            started_at: None,
            completed_at: None,
            attempt: 1,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            MilestoneStatus::Completed | MilestoneStatus::Failed | MilestoneStatus::Skipped
        )
    }
}

/// Decomposition of a goal into an ordered, dependency-respecting milestone
/// list. `current_milestone_index` always points at the lowest-indexed
/// non-terminal milestone, or `milestones.len()` when the plan is finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarathonPlan {
    pub goal: String,
    pub milestones: Vec<Milestone>,
    pub current_milestone_index: usize,
}

/// A plan whose `dependsOn` graph is not a valid DAG over strictly-earlier
/// ids (forward or self reference). The planner rejects and re-requests
/// once; a second violation fails the marathon.
#[derive(Debug, Clone, thiserror::Error)]
#[error("plan invalid: milestone {milestone_id} depends on {depends_on}, which is not a strictly-earlier milestone")]
pub struct PlanInvalid {
    pub milestone_id: String,
    pub depends_on: String,
}

impl MarathonPlan {
    /// Validate the DAG property: every `dependsOn` entry must name a
    /// milestone appearing at a strictly smaller index than its dependent.
    pub fn validate(&self) -> Result<(), PlanInvalid> {
        if self.milestones.is_empty() {
            return Err(PlanInvalid {
                milestone_id: String::new(),
                depends_on: String::new(),
            });
        }
        for (idx, m) in self.milestones.iter().enumerate() {
            for dep in &m.depends_on {
                if dep == &m.id {
                    return Err(PlanInvalid {
                        milestone_id: m.id.clone(),
                        depends_on: dep.clone(),
                    });
                }
                let dep_idx = self.milestones.iter().position(|o| &o.id == dep);
                match dep_idx {
                    Some(d) if d < idx => {}
                    _ => {
                        return Err(PlanInvalid {
                            milestone_id: m.id.clone(),
                            depends_on: dep.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Recompute `current_milestone_index` after a status change.
    pub fn recompute_cursor(&mut self) {
        self.current_milestone_index = self
            .milestones
            .iter()
            .position(|m| !m.is_terminal())
            .unwrap_or(self.milestones.len());
    }

    pub fn is_finished(&self) -> bool {
        self.milestones.iter().all(|m| m.is_terminal())
    }

    pub fn has_failure(&self) -> bool {
        self.milestones
            .iter()
            .any(|m| m.status == MilestoneStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(deps: &[(&str, &[&str])]) -> MarathonPlan {
        MarathonPlan {
            goal: "test".into(),
            milestones: deps
                .iter()
                .map(|(id, d)| {
                    Milestone::new(*id, *id, "", d.iter().map(|s| s.to_string()).collect())
                })
                .collect(),
            current_milestone_index: 0,
        }
    }

    #[test]
    fn valid_dag_passes() {
        let p = plan(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn self_dependency_rejected() {
        let p = plan(&[("a", &["a"])]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn forward_dependency_rejected() {
        let p = plan(&[("a", &["b"]), ("b", &[])]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn empty_plan_rejected() {
        let p = plan(&[]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn cursor_points_at_first_nonterminal() {
        let mut p = plan(&[("a", &[]), ("b", &["a"])]);
        p.milestones[0].status = MilestoneStatus::Completed;
        p.recompute_cursor();
        assert_eq!(p.current_milestone_index, 1);
    }

    #[test]
    fn cursor_past_end_when_finished() {
        let mut p = plan(&[("a", &[])]);
        p.milestones[0].status = MilestoneStatus::Completed;
        p.recompute_cursor();
        assert_eq!(p.current_milestone_index, 1);
        assert!(p.is_finished());
    }
}
