//! Outbound webhook dispatch (§4.J).
//!
//! Subscriptions match events by dot-prefixed namespace: a subscription to
//! `"marathon"` receives every `marathon.*` event, one to `"marathon.completed"`
//! matches only that exact event, and `"*"` receives everything. Delivery is
//! fire-and-forget — a failed POST is logged and dropped, never retried,
//! matching the control plane's at-most-once delivery contract. Payloads are
//! signed the same way the inbound schedule-trigger endpoint verifies
//! requests: HMAC-SHA256 over the raw JSON body, hex-encoded, carried in the
//! `X-Signature` header as `sha256=<hex>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    /// Dot-prefixed event patterns, e.g. `["marathon", "session.reset"]`.
    pub events: Vec<String>,
    #[serde(default = "d_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

fn d_true() -> bool {
    true
}

fn event_matches(pattern: &str, event: &str) -> bool {
    pattern == "*" || event == pattern || event.starts_with(&format!("{pattern}."))
}

pub struct WebhookDispatcher {
    path: std::path::PathBuf,
    subscriptions: RwLock<HashMap<String, WebhookSubscription>>,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(state_path: &std::path::Path, timeout: Duration) -> sa_domain::error::Result<Self> {
        let dir = state_path.join("webhooks");
        std::fs::create_dir_all(&dir).map_err(sa_domain::error::Error::Io)?;
        let path = dir.join("subscriptions.json");
        let subs: Vec<WebhookSubscription> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(sa_domain::error::Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Vec::new()
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| sa_domain::error::Error::Other(format!("building webhook client: {e}")))?;
        Ok(Self {
            path,
            subscriptions: RwLock::new(subs.into_iter().map(|s| (s.id.clone(), s)).collect()),
            client,
        })
    }

    fn persist(&self) -> sa_domain::error::Result<()> {
        let subs: Vec<WebhookSubscription> = self.subscriptions.read().values().cloned().collect();
        let json = serde_json::to_string_pretty(&subs)
            .map_err(|e| sa_domain::error::Error::Other(format!("serializing webhook subs: {e}")))?;
        std::fs::write(&self.path, json).map_err(sa_domain::error::Error::Io)
    }

    pub fn subscribe(&self, url: String, secret: Option<String>, events: Vec<String>) -> sa_domain::error::Result<WebhookSubscription> {
        let sub = WebhookSubscription {
            id: Uuid::new_v4().to_string(),
            url,
            secret,
            events,
            active: true,
            created_at: Utc::now(),
        };
        self.subscriptions.write().insert(sub.id.clone(), sub.clone());
        self.persist()?;
        Ok(sub)
    }

    pub fn unsubscribe(&self, id: &str) -> sa_domain::error::Result<bool> {
        let removed = self.subscriptions.write().remove(id).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<WebhookSubscription> {
        let mut v: Vec<_> = self.subscriptions.read().values().cloned().collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        v
    }

    /// Fan out `event` to every matching active subscription. Each delivery
    /// is spawned independently so a slow or unreachable endpoint never
    /// blocks the caller or other subscribers.
    pub fn dispatch(self: &Arc<Self>, event: &str, payload: serde_json::Value) {
        let matching: Vec<WebhookSubscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.active && s.events.iter().any(|p| event_matches(p, event)))
            .cloned()
            .collect();

        if matching.is_empty() {
            return;
        }

        let body = serde_json::json!({
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
            "data": payload,
        });
        let body_bytes = match serde_json::to_vec(&body) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize webhook payload");
                return;
            }
        };

        for sub in matching {
            let client = self.client.clone();
            let body_bytes = body_bytes.clone();
            let event = event.to_string();
            tokio::spawn(async move {
                let mut req = client
                    .post(&sub.url)
                    .header("content-type", "application/json");
                if let Some(secret) = &sub.secret {
                    if let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) {
                        mac.update(&body_bytes);
                        let sig = hex::encode(mac.finalize().into_bytes());
                        req = req.header("X-Signature", format!("sha256={sig}"));
                    }
                }
                match req.body(body_bytes).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        tracing::debug!(webhook_id = %sub.id, event = %event, "webhook delivered");
                    }
                    Ok(resp) => {
                        tracing::warn!(webhook_id = %sub.id, event = %event, status = %resp.status(), "webhook delivery failed, not retrying");
                    }
                    Err(e) => {
                        tracing::warn!(webhook_id = %sub.id, event = %event, error = %e, "webhook delivery error, not retrying");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_prefixed_matching() {
        assert!(event_matches("marathon", "marathon.completed"));
        assert!(event_matches("marathon.completed", "marathon.completed"));
        assert!(!event_matches("marathon.completed", "marathon.failed"));
        assert!(event_matches("*", "anything.at.all"));
        assert!(!event_matches("session", "sessions.reset"));
    }

    #[test]
    fn subscribe_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = WebhookDispatcher::new(dir.path(), Duration::from_secs(5)).unwrap();
        let sub = dispatcher
            .subscribe("https://example.test/hook".into(), Some("s3cr3t".into()), vec!["marathon".into()])
            .unwrap();
        let list = dispatcher.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, sub.id);
    }

    #[test]
    fn unsubscribe_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = WebhookDispatcher::new(dir.path(), Duration::from_secs(5)).unwrap();
        let sub = dispatcher.subscribe("https://example.test/hook".into(), None, vec!["*".into()]).unwrap();
        assert!(dispatcher.unsubscribe(&sub.id).unwrap());
        assert!(dispatcher.list().is_empty());
    }
}
