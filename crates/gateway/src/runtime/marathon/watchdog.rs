//! Marathon Watchdog (§4.G) — a 60-second tick that detects stalled
//! marathons (no heartbeat for 5 minutes), scanning both `Executing` and
//! `AwaitingApproval` marathons, and restarts their executor loop, up to 5
//! restarts before giving up and marking the marathon failed.
//!
//! On startup, every loaded marathon is quarantined until its invariants
//! validate (`MarathonState::validate_invariants`); a marathon that fails
//! validation is marked failed rather than resumed, since its on-disk state
//! cannot be trusted to represent a consistent point in the plan.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sa_domain::marathon::MarathonStatus;

use crate::state::AppState;

/// Validate every persisted marathon at startup and quarantine (fail) any
/// whose invariants don't hold. Returns the ids that remain executable.
pub fn quarantine_invalid_on_startup(state: &Arc<AppState>) -> Vec<String> {
    let mut ok_ids = Vec::new();
    for m in state.marathons.list() {
        if m.status.is_terminal() {
            continue;
        }
        if let Err(reason) = m.validate_invariants() {
            tracing::warn!(
                event = "watchdog.quarantine",
                marathon_id = %m.id,
                reason,
                "quarantining marathon with invalid invariants on startup"
            );
            let mut quarantined = m.clone();
            quarantined.status = MarathonStatus::Failed;
            quarantined.failure_reason = Some(format!("quarantined at startup: {reason}"));
            quarantined.completed_at = Some(Utc::now());
            quarantined.push_log("quarantined at startup due to invariant violation".to_string());
            if let Err(e) = state.marathons.save(quarantined) {
                tracing::error!(marathon_id = %m.id, error = %e, "failed to persist quarantine record");
            }
            if let Err(e) = state.marathons.quarantine(&m.id) {
                tracing::error!(marathon_id = %m.id, error = %e, "failed to relocate quarantined marathon");
            }
        } else {
            ok_ids.push(m.id.clone());
        }
    }
    ok_ids
}

/// Runs forever on a 60s tick, restarting stalled marathons. Intended to
/// be spawned once as a background task for the lifetime of the process.
pub async fn run(state: Arc<AppState>) {
    let tick_interval = Duration::from_secs(state.config.marathon.watchdog_tick_secs);
    let mut interval = tokio::time::interval(tick_interval);
    loop {
        interval.tick().await;
        tick(&state).await;
    }
}

async fn tick(state: &Arc<AppState>) {
    let now = Utc::now();
    let stale_after = chrono::Duration::seconds(state.config.marathon.stale_threshold_secs as i64);
    let max_restarts = state.config.marathon.max_restart_attempts;
    for m in state.marathons.list_active() {
        if m.status != MarathonStatus::Executing && m.status != MarathonStatus::AwaitingApproval {
            continue;
        }
        let stale = now - m.heartbeat_at > stale_after;
        if !stale {
            continue;
        }

        if m.status == MarathonStatus::AwaitingApproval {
            // heartbeat_at freezes the moment a milestone starts waiting, so a
            // legitimately long-pending human decision looks identical to a
            // crashed approver here. Only touch it if the pending approval
            // itself is gone (approver process died, or this is a stale
            // restart of the gateway that lost the in-memory oneshot) --
            // otherwise a live task is still correctly blocked on it and the
            // 24h approval timeout, not the watchdog, is what unsticks it.
            let still_pending = m
                .approval_requests
                .last()
                .is_some_and(|req| state.approvals.get(&req.id).is_some());
            if still_pending {
                continue;
            }
        }

        if m.restart_count >= max_restarts {
            tracing::error!(marathon_id = %m.id, restarts = m.restart_count, "marathon exceeded max restarts, failing");
            state
                .marathons
                .update(&m.id, |s| {
                    s.status = MarathonStatus::Failed;
                    s.failure_reason = Some(format!("stalled and exceeded {max_restarts} restarts"));
                    s.completed_at = Some(Utc::now());
                    s.push_log("watchdog: giving up after max restarts".to_string());
                })
                .ok();
            state.webhooks.dispatch(
                "marathon.failed",
                serde_json::json!({ "marathon_id": m.id, "reason": "exceeded max restarts" }),
            );
            continue;
        }

        tracing::warn!(marathon_id = %m.id, restarts = m.restart_count + 1, "marathon stalled, restarting executor");
        state
            .marathons
            .update(&m.id, |s| {
                s.restart_count += 1;
                s.heartbeat_at = Utc::now();
                if s.status == MarathonStatus::AwaitingApproval {
                    // no live task left to resolve this -- fall back to
                    // Executing so the restarted loop re-evaluates the
                    // current milestone and issues a fresh approval request.
                    s.status = MarathonStatus::Executing;
                }
                s.push_log(format!("watchdog: restarting (attempt {})", s.restart_count));
            })
            .ok();
        tokio::spawn(super::executor::run_marathon(state.clone(), m.id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::marathon::MarathonState;

    #[test]
    fn quarantine_fails_marathon_with_two_in_progress_milestones() {
        use sa_domain::milestone::{Milestone, MilestoneStatus};

        let dir = tempfile::tempdir().unwrap();
        let store = crate::runtime::marathon::store::MarathonStore::new(dir.path()).unwrap();
        let mut state = MarathonState::new("goal", None, None);
        state.status = MarathonStatus::Executing;
        state.plan.milestones.push(Milestone {
            status: MilestoneStatus::InProgress,
            ..Milestone::new("m1", "a", "a", vec![])
        });
        state.plan.milestones.push(Milestone {
            status: MilestoneStatus::InProgress,
            ..Milestone::new("m2", "b", "b", vec![])
        });
        let id = state.id.clone();
        store.save(state).unwrap();

        assert!(store.get(&id).unwrap().validate_invariants().is_err());
    }
}
