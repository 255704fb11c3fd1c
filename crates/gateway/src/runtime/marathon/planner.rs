//! Marathon Planner (§4.F) — decomposes a goal into a milestone DAG via the
//! LLM, then hard-rejects anything that isn't a valid DAG over
//! strictly-earlier ids. A first violation gets one re-request carrying the
//! validation error back to the model; a second violation fails the
//! marathon outright rather than looping indefinitely.

use sa_domain::milestone::{MarathonPlan, Milestone, MilestoneStatus, PlanInvalid};
use sa_domain::tool::Message;
use sa_providers::traits::ChatRequest;
use sa_providers::LlmProvider;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("planner returned invalid JSON: {0}")]
    InvalidJson(String),
    #[error("plan rejected twice: {0}")]
    RejectedTwice(PlanInvalid),
}

#[derive(Debug, Deserialize)]
struct RawMilestone {
    id: String,
    title: String,
    description: String,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    milestones: Vec<RawMilestone>,
}

fn system_prompt(goal: &str) -> String {
    format!(
        "You are a planning assistant decomposing a long-running goal into an \
         ordered sequence of milestones. Respond with JSON only, of the exact \
         shape: {{\"milestones\": [{{\"id\": string, \"title\": string, \
         \"description\": string, \"depends_on\": string[]}}]}}. Each \
         milestone's `depends_on` may only name ids of milestones that appear \
         earlier in the array — never itself, never a later milestone. Keep \
         milestones concrete and independently verifiable.\n\nGOAL: {goal}"
    )
}

fn to_plan(goal: &str, raw: RawPlan) -> MarathonPlan {
    let milestones = raw
        .milestones
        .into_iter()
        .map(|m| Milestone {
            id: m.id,
            title: m.title,
            description: m.description,
            status: MilestoneStatus::Pending,
            depends_on: m.depends_on,
            result: None,
            tokens_used: 0,
            started_at: None,
            completed_at: None,
            attempt: 1,
        })
        .collect();
    MarathonPlan {
        goal: goal.to_string(),
        milestones,
        current_milestone_index: 0,
    }
}

async fn request_plan(
    provider: &dyn LlmProvider,
    goal: &str,
    correction: Option<&str>,
) -> Result<MarathonPlan, PlanError> {
    let mut prompt = system_prompt(goal);
    if let Some(err) = correction {
        prompt.push_str(&format!(
            "\n\nYour previous plan was rejected: {err}. Produce a corrected plan."
        ));
    }

    let req = ChatRequest {
        messages: vec![Message::user(&prompt)],
        tools: vec![],
        temperature: Some(0.2),
        max_tokens: Some(4000),
        json_mode: true,
        model: None,
    };

    let resp = provider
        .chat(req)
        .await
        .map_err(|e| PlanError::Provider(e.to_string()))?;

    let raw: RawPlan =
        serde_json::from_str(&resp.content).map_err(|e| PlanError::InvalidJson(e.to_string()))?;

    Ok(to_plan(goal, raw))
}

/// Produce a validated plan for `goal`, re-requesting once on a DAG
/// violation before giving up.
pub async fn plan_goal(provider: &dyn LlmProvider, goal: &str) -> Result<MarathonPlan, PlanError> {
    let first = request_plan(provider, goal, None).await?;
    match first.validate() {
        Ok(()) => Ok(first),
        Err(violation) => {
            tracing::warn!(error = %violation, "planner produced an invalid DAG, requesting correction");
            let second = request_plan(provider, goal, Some(&violation.to_string())).await?;
            second.validate().map_err(PlanError::RejectedTwice)?;
            Ok(second)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_plan_preserves_fields() {
        let raw = RawPlan {
            milestones: vec![RawMilestone {
                id: "m1".into(),
                title: "Step one".into(),
                description: "do the first thing".into(),
                depends_on: vec![],
            }],
        };
        let plan = to_plan("ship the feature", raw);
        assert_eq!(plan.goal, "ship the feature");
        assert_eq!(plan.milestones.len(), 1);
        assert_eq!(plan.milestones[0].status, MilestoneStatus::Pending);
    }

    #[test]
    fn rejects_forward_dependency() {
        let raw = RawPlan {
            milestones: vec![
                RawMilestone {
                    id: "m1".into(),
                    title: "a".into(),
                    description: "a".into(),
                    depends_on: vec!["m2".into()],
                },
                RawMilestone {
                    id: "m2".into(),
                    title: "b".into(),
                    description: "b".into(),
                    depends_on: vec![],
                },
            ],
        };
        let plan = to_plan("goal", raw);
        assert!(plan.validate().is_err());
    }
}
