//! API keys and scopes for the control plane (§4.J).
//!
//! A key's secret is never persisted — only a SHA-256 hash, compared in
//! constant time at validation (see `sa-domain::apikey::hash_secret` and
//! the gateway's auth middleware which consumes it).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a secret, hex-encoded. Used both when provisioning a
/// key (to store only the hash) and at request time (to compare against
/// the presented bearer token).
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(digest)
}

/// A capability tag attached to an API key. Routes declare the scope they
/// require; `Admin` and `Wildcard` satisfy any requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Chat,
    ChatStream,
    Sessions,
    Memory,
    Marathon,
    MarathonRead,
    Skills,
    Generate,
    Tools,
    Admin,
    #[serde(rename = "*")]
    Wildcard,
}

impl Scope {
    /// Whether a key holding `self` satisfies a route requiring `required`.
    pub fn satisfies(&self, required: Scope) -> bool {
        matches!(self, Scope::Admin | Scope::Wildcard) || *self == required
    }
}

/// Running usage counters for an API key, reset only by explicit action
/// (unlike the per-day quota tracker, this is a lifetime total).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyUsage {
    pub total_requests: u64,
    pub total_tokens: u64,
}

/// A provisioned API key. The bearer secret is presented by callers and
/// hashed for comparison; this struct never carries the plaintext secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Public, non-secret prefix shown in listings (e.g. `sk_live_ab12`).
    pub id: String,
    /// SHA-256 digest of the secret, hex-encoded.
    pub hash: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: HashSet<Scope>,
    /// Requests-per-minute ceiling enforced by the control plane.
    pub rate_limit_rpm: u32,
    #[serde(default)]
    pub usage: ApiKeyUsage,
    #[serde(default = "d_true")]
    pub active: bool,
}

fn d_true() -> bool {
    true
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn has_scope(&self, required: Scope) -> bool {
        self.scopes.iter().any(|s| s.satisfies(required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_secret_is_deterministic_and_hex() {
        let a = hash_secret("sk_live_abc123");
        let b = hash_secret("sk_live_abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_secret_differs_for_different_input() {
        assert_ne!(hash_secret("a"), hash_secret("b"));
    }

    #[test]
    fn admin_satisfies_any_scope() {
        assert!(Scope::Admin.satisfies(Scope::Marathon));
        assert!(Scope::Wildcard.satisfies(Scope::Tools));
    }

    #[test]
    fn plain_scope_only_satisfies_itself() {
        assert!(Scope::Chat.satisfies(Scope::Chat));
        assert!(!Scope::Chat.satisfies(Scope::Marathon));
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let mut key = ApiKey {
            id: "sk_test".into(),
            hash: "deadbeef".into(),
            name: "test".into(),
            created_at: now,
            last_used_at: None,
            expires_at: Some(now - chrono::Duration::seconds(1)),
            scopes: HashSet::from([Scope::Chat]),
            rate_limit_rpm: 60,
            usage: ApiKeyUsage::default(),
            active: true,
        };
        assert!(key.is_expired(now));
        key.expires_at = Some(now + chrono::Duration::days(1));
        assert!(!key.is_expired(now));
    }
}
