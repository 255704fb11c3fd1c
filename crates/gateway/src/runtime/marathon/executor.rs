//! Marathon Executor (§4.G) — runs a plan's milestones one at a time, each
//! in a dedicated ephemeral sub-session so milestone work never pollutes
//! (or is polluted by) the user's main conversation. Grounded on the
//! multi-agent runtime's `run_agent` pattern: mint a child session key,
//! build a `TurnInput`, run a turn, and drain the event channel for the
//! final result.
//!
//! State is checkpointed to the durable [`super::store::MarathonStore`]
//! after every milestone transition, and additionally every 5 milestones
//! regardless of transition (§4.G durability requirement) so a crash never
//! loses more than a few milestones' progress.

use std::sync::Arc;

use sa_domain::marathon::{ApprovalRisk, MarathonStatus};
use sa_domain::milestone::MilestoneStatus;

use crate::runtime::approval::ApprovalDecision;
use crate::runtime::turn::{run_turn, TurnEvent, TurnInput, TurnMode};
use crate::state::AppState;

/// Risk classification for a milestone about to execute. Milestones whose
/// description mentions destructive or external actions are treated as
/// higher risk; anything else runs unattended.
fn classify_risk(description: &str) -> ApprovalRisk {
    let lower = description.to_lowercase();
    let destructive = ["delete", "drop table", "rm -rf", "force push", "revoke"];
    let external = ["deploy", "send email", "post to", "publish", "payment"];
    if destructive.iter().any(|k| lower.contains(k)) {
        ApprovalRisk::High
    } else if external.iter().any(|k| lower.contains(k)) {
        ApprovalRisk::Medium
    } else {
        ApprovalRisk::Low
    }
}

/// Run every pending milestone of `marathon_id` to completion, failure, or
/// cancellation. Returns once the marathon reaches a terminal status.
pub async fn run_marathon(state: Arc<AppState>, marathon_id: String) {
    loop {
        let Some(current) = state.marathons.get(&marathon_id) else {
            tracing::warn!(marathon_id, "marathon disappeared mid-execution");
            return;
        };
        if current.status.is_terminal() {
            return;
        }
        if current.status == MarathonStatus::Paused || current.status == MarathonStatus::AwaitingApproval {
            return;
        }

        let idx = current.plan.current_milestone_index;
        if idx >= current.plan.milestones.len() {
            finish(&state, &marathon_id, MarathonStatus::Completed, None);
            state.webhooks.dispatch(
                "marathon.completed",
                serde_json::json!({ "marathon_id": marathon_id }),
            );
            return;
        }

        if state
            .cancel_map
            .register(&marathon_format_key(&marathon_id))
            .is_cancelled()
        {
            finish(&state, &marathon_id, MarathonStatus::Aborted, Some("cancelled".into()));
            return;
        }

        let milestone = current.plan.milestones[idx].clone();
        let risk = classify_risk(&milestone.description);

        if risk != ApprovalRisk::Low {
            let (request, rx) = state.approvals.request(
                marathon_id.clone(),
                "run_milestone",
                format!("Execute milestone '{}': {}", milestone.title, milestone.description),
                risk,
                serde_json::json!({ "milestone_id": milestone.id }),
            );
            state.marathons.update(&marathon_id, |m| {
                m.status = MarathonStatus::AwaitingApproval;
                m.approval_requests.push(request.clone());
                m.push_log(format!("awaiting approval for milestone '{}'", milestone.title));
            }).ok();
            state.webhooks.dispatch(
                "marathon.approval_requested",
                serde_json::json!({ "marathon_id": marathon_id, "approval_id": request.id }),
            );

            match rx.await {
                Ok(ApprovalDecision::Approved) => {
                    state.marathons.update(&marathon_id, |m| {
                        m.status = MarathonStatus::Executing;
                        m.push_log(format!("milestone '{}' approved", milestone.title));
                    }).ok();
                }
                Ok(ApprovalDecision::Denied { reason }) => {
                    finish(
                        &state,
                        &marathon_id,
                        MarathonStatus::Aborted,
                        Some(reason.unwrap_or_else(|| "milestone approval denied".into())),
                    );
                    return;
                }
                Err(_) => {
                    finish(&state, &marathon_id, MarathonStatus::Aborted, Some("approval channel closed".into()));
                    return;
                }
            }
        }

        run_milestone(&state, &marathon_id, idx).await;

        // re-check terminal status set by run_milestone before looping
        if let Some(after) = state.marathons.get(&marathon_id) {
            if after.status.is_terminal() {
                return;
            }
        }
    }
}

async fn run_milestone(state: &Arc<AppState>, marathon_id: &str, idx: usize) {
    let Some(current) = state.marathons.get(marathon_id) else { return };
    let milestone = current.plan.milestones[idx].clone();

    state.marathons.update(marathon_id, |m| {
        m.plan.milestones[idx].status = MilestoneStatus::InProgress;
        m.plan.milestones[idx].started_at = Some(chrono::Utc::now());
        m.push_log(format!("starting milestone '{}'", milestone.title));
    }).ok();

    let task_id = uuid::Uuid::new_v4().to_string();
    let child_session_key = format!("marathon:{marathon_id}:milestone:{}:{task_id}", milestone.id);

    let input = TurnInput {
        session_key: child_session_key.clone(),
        session_id: task_id,
        user_message: format!(
            "Execute this milestone toward the overall goal \"{}\":\n\n{}: {}",
            current.plan.goal, milestone.title, milestone.description
        ),
        model: None,
        agent_id: None,
        mode: TurnMode::Execute,
    };

    let mut rx = run_turn(state.clone(), input);
    let mut result = String::new();
    let mut failed = false;
    let mut tokens_used = 0u64;

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Final { content } => result = content,
            TurnEvent::Stopped { content } => {
                result = content;
                failed = true;
            }
            TurnEvent::Error { message } => {
                result = message;
                failed = true;
            }
            TurnEvent::Usage { total_tokens } => tokens_used += total_tokens,
            _ => {}
        }
    }

    state.cancel_map.remove(&child_session_key);

    let final_status = if failed {
        MilestoneStatus::Failed
    } else {
        MilestoneStatus::Completed
    };

    let checkpoint_every = state.config.marathon.checkpoint_interval.max(1);
    let snapshot = state.marathons.update(marathon_id, |m| {
        m.plan.milestones[idx].status = final_status;
        m.plan.milestones[idx].completed_at = Some(chrono::Utc::now());
        m.plan.milestones[idx].result = Some(result.clone());
        m.plan.milestones[idx].tokens_used = tokens_used;
        m.total_tokens_used += tokens_used;
        m.heartbeat_at = chrono::Utc::now();
        m.plan.recompute_cursor();
        m.push_log(format!(
            "milestone '{}' finished with status {:?}",
            milestone.title, final_status
        ));
        if final_status == MilestoneStatus::Failed {
            m.status = MarathonStatus::Failed;
            m.failure_reason = Some(result.clone());
            m.completed_at = Some(chrono::Utc::now());
        }
        let checkpoint_due = (idx as u32 + 1) % checkpoint_every == 0;
        if checkpoint_due {
            m.last_checkpoint_at = chrono::Utc::now();
        }
    });

    if let Ok(Some(ref snap)) = snapshot {
        if (idx as u32 + 1) % checkpoint_every == 0 {
            if let Err(e) = state.marathons.save_checkpoint(snap, idx as u32 + 1) {
                tracing::warn!(marathon_id, error = %e, "failed to write marathon checkpoint");
            }
        }
    }

    if let Ok(Some(state_after)) = snapshot {
        state.webhooks.dispatch(
            "marathon.milestone_completed",
            serde_json::json!({
                "marathon_id": marathon_id,
                "milestone_id": milestone.id,
                "status": final_status,
            }),
        );
        if final_status == MilestoneStatus::Failed {
            state.webhooks.dispatch(
                "marathon.failed",
                serde_json::json!({ "marathon_id": marathon_id, "reason": state_after.failure_reason }),
            );
        }
    }
}

fn finish(state: &Arc<AppState>, marathon_id: &str, status: MarathonStatus, reason: Option<String>) {
    state.marathons.update(marathon_id, |m| {
        m.status = status;
        m.completed_at = Some(chrono::Utc::now());
        m.failure_reason = reason.clone();
        m.push_log(format!("marathon finished: {status:?}"));
    }).ok();
}

fn marathon_format_key(marathon_id: &str) -> String {
    format!("marathon:{marathon_id}")
}

/// Resolve a pending milestone approval by id. The [`run_marathon`] task
/// that requested this approval has been parked on the same oneshot
/// channel ever since, so deciding it here is enough to wake that task and
/// let it continue its own loop -- no new executor task is spawned. A
/// marathon whose original task is gone (process restart, panic) has no
/// pending approval left to resolve; reviving that case is the watchdog's
/// job (`super::watchdog::tick`), which re-spawns `run_marathon` directly.
pub fn resume_after_approval(state: Arc<AppState>, marathon_id: String, approval_id: &str, approved: bool, reason: Option<String>) -> bool {
    let resolved = if approved {
        state.approvals.approve(approval_id, None)
    } else {
        state.approvals.reject(approval_id, None, reason)
    };
    if resolved {
        tracing::info!(marathon_id, approval_id, approved, "approval decided, resuming blocked executor task");
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_risk_flags_destructive_keywords() {
        assert_eq!(classify_risk("delete the staging database"), ApprovalRisk::High);
        assert_eq!(classify_risk("deploy the new build to prod"), ApprovalRisk::Medium);
        assert_eq!(classify_risk("write the unit tests"), ApprovalRisk::Low);
    }
}
