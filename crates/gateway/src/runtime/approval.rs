//! Approval gate (§4.H) — pauses a turn or marathon milestone behind human
//! review whenever a tool's side-effect class or a milestone's risk level
//! requires it. Generalizes the exec-approval workflow: instead of a bare
//! command string, a pending approval now carries the full
//! [`sa_domain::marathon::ApprovalRequest`] record (risk, structured params,
//! expiry) so the same store serves both ad-hoc tool approvals and marathon
//! milestone approvals.
//!
//! A timeout (24h default per §5) ensures the system never blocks
//! indefinitely: an unresolved request is swept to `Expired` and its
//! waiter is released with a denial.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use sa_domain::marathon::{ApprovalRequest, ApprovalRisk, ApprovalStatus};
use tokio::sync::oneshot;

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// The decision made by a human reviewer.
#[derive(Debug)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: Option<String> },
}

struct Pending {
    request: ApprovalRequest,
    respond: oneshot::Sender<ApprovalDecision>,
}

/// Thread-safe store for pending approvals, keyed by `ApprovalRequest::id`.
pub struct ApprovalStore {
    pending: RwLock<HashMap<String, Pending>>,
    default_timeout: chrono::Duration,
}

impl ApprovalStore {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            default_timeout: chrono::Duration::from_std(default_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    /// Register a new approval request and return it alongside a receiver
    /// that resolves when a human decides (or the request expires).
    pub fn request(
        &self,
        marathon_id: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
        risk: ApprovalRisk,
        params: serde_json::Value,
    ) -> (ApprovalRequest, oneshot::Receiver<ApprovalDecision>) {
        let request = ApprovalRequest::new(marathon_id, action, description, risk, params, self.default_timeout);
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(
            request.id.clone(),
            Pending {
                request: request.clone(),
                respond: tx,
            },
        );
        (request, rx)
    }

    pub fn approve(&self, id: &str, decided_by: Option<String>) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(ApprovalDecision::Approved);
            let _ = decided_by;
            return true;
        }
        false
    }

    pub fn reject(&self, id: &str, decided_by: Option<String>, reason: Option<String>) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(ApprovalDecision::Denied { reason: reason.clone() });
            let _ = decided_by;
            return true;
        }
        false
    }

    /// Sweep requests whose `expires_at` has passed, resolving each waiter
    /// with a denial so callers never block forever.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired_ids: Vec<String> = self
            .pending
            .read()
            .values()
            .filter(|p| p.request.expires_at <= now)
            .map(|p| p.request.id.clone())
            .collect();
        for id in &expired_ids {
            if let Some(pending) = self.pending.write().remove(id) {
                let _ = pending.respond.send(ApprovalDecision::Denied {
                    reason: Some("approval request expired".into()),
                });
            }
        }
        expired_ids.len()
    }

    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let mut v: Vec<ApprovalRequest> = self
            .pending
            .read()
            .values()
            .map(|p| p.request.clone())
            .collect();
        v.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        v
    }

    pub fn get(&self, id: &str) -> Option<ApprovalRequest> {
        self.pending.read().get(id).map(|p| p.request.clone())
    }
}

/// Whether a tool's side-effect class requires approval under the current
/// session's mode. Destructive and external tools always require approval
/// unless the caller has explicitly marked the session as pre-approved.
pub fn requires_approval(class: sa_tools::registry::SideEffectClass, require_approval: bool) -> bool {
    use sa_tools::registry::SideEffectClass::*;
    match class {
        ReadOnly | Write => false,
        Destructive | External => require_approval,
    }
}

/// Convenience: map a decision to the terminal [`ApprovalStatus`] it implies.
pub fn decision_status(decision: &ApprovalDecision) -> ApprovalStatus {
    match decision {
        ApprovalDecision::Approved => ApprovalStatus::Approved,
        ApprovalDecision::Denied { .. } => ApprovalStatus::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ApprovalStore {
        ApprovalStore::new(Duration::from_secs(300))
    }

    #[test]
    fn request_and_list() {
        let store = store();
        let (req, _rx) = store.request("m1", "delete_file", "rm important.txt", ApprovalRisk::High, serde_json::json!({}));
        let list = store.list_pending();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, req.id);
    }

    #[tokio::test]
    async fn approve_resolves_channel() {
        let store = store();
        let (req, rx) = store.request("m1", "delete_file", "rm important.txt", ApprovalRisk::High, serde_json::json!({}));
        assert!(store.approve(&req.id, Some("alice".into())));
        let decision = rx.await.unwrap();
        assert!(matches!(decision, ApprovalDecision::Approved));
        assert!(store.list_pending().is_empty());
    }

    #[tokio::test]
    async fn reject_resolves_channel_with_reason() {
        let store = store();
        let (req, rx) = store.request("m1", "delete_file", "rm important.txt", ApprovalRisk::High, serde_json::json!({}));
        assert!(store.reject(&req.id, None, Some("too risky".into())));
        match rx.await.unwrap() {
            ApprovalDecision::Denied { reason } => assert_eq!(reason.as_deref(), Some("too risky")),
            _ => panic!("expected Denied"),
        }
    }

    #[test]
    fn approve_nonexistent_returns_false() {
        let store = store();
        assert!(!store.approve("missing", None));
    }

    #[tokio::test]
    async fn sweep_expired_resolves_with_denial() {
        let store = ApprovalStore::new(Duration::from_secs(0));
        let (_req, rx) = store.request("m1", "a", "b", ApprovalRisk::Low, serde_json::json!({}));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let swept = store.sweep_expired();
        assert_eq!(swept, 1);
        assert!(matches!(rx.await.unwrap(), ApprovalDecision::Denied { .. }));
    }

    #[test]
    fn requires_approval_matches_side_effect_class() {
        use sa_tools::registry::SideEffectClass;
        assert!(!requires_approval(SideEffectClass::ReadOnly, true));
        assert!(!requires_approval(SideEffectClass::Write, true));
        assert!(requires_approval(SideEffectClass::Destructive, true));
        assert!(!requires_approval(SideEffectClass::Destructive, false));
        assert!(requires_approval(SideEffectClass::External, true));
    }
}
