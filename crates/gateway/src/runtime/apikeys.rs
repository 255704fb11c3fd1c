//! Control-plane API key store (§4.J).
//!
//! Keys are presented as `"{id}.{secret}"`. Only a SHA-256 hash of the
//! secret is ever persisted; validation re-hashes the presented secret and
//! compares in constant time (the same pattern the auth middleware uses
//! for the single-bearer-token case, generalized to many keys).
//!
//! The six-step validation sequence from §4.J — parse, hash-compare,
//! expiry, scope, sliding 60s rate limit, set headers — is split across
//! [`ApiKeyStore::authenticate`] (parse/hash/expiry/scope) and
//! [`ApiKeyStore::check_rate_limit`] (the sliding window), with header
//! construction left to the axum middleware that calls both.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sa_domain::apikey::{hash_secret, ApiKey, ApiKeyUsage, Scope};
use sa_domain::error::{Error, Result};
use subtle::ConstantTimeEq;

/// Outcome of a successful rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// Reason an API key failed authentication. Maps 1:1 to the §4.J status
/// codes at the control-plane edge (401/403 vs. 429 handled separately).
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed API key")]
    Malformed,
    #[error("unknown or revoked API key")]
    Unknown,
    #[error("API key expired")]
    Expired,
    #[error("API key lacks required scope")]
    MissingScope,
}

pub struct ApiKeyStore {
    path: PathBuf,
    keys: RwLock<HashMap<String, ApiKey>>,
    windows: RwLock<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

const WINDOW_SECS: i64 = 60;

impl ApiKeyStore {
    /// Load `api/keys.json` under `state_path`, creating an empty store if
    /// absent.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("api");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        let path = dir.join("keys.json");
        let keys: Vec<ApiKey> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Vec::new()
        };
        let keys = keys.into_iter().map(|k| (k.id.clone(), k)).collect();
        Ok(Self {
            path,
            keys: RwLock::new(keys),
            windows: RwLock::new(HashMap::new()),
        })
    }

    fn persist(&self) -> Result<()> {
        let keys = self.keys.read();
        let list: Vec<&ApiKey> = keys.values().collect();
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| Error::Other(format!("serializing api keys: {e}")))?;
        std::fs::write(&self.path, json).map_err(Error::Io)
    }

    /// Provision a new key. Returns the stored record plus the one-time
    /// plaintext bearer token (`"{id}.{secret}"`) — never recoverable
    /// afterwards.
    pub fn create(
        &self,
        name: impl Into<String>,
        scopes: std::collections::HashSet<Scope>,
        rate_limit_rpm: u32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(ApiKey, String)> {
        let id = format!("sk_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let secret: String = rand_like_hex(32);
        let key = ApiKey {
            id: id.clone(),
            hash: hash_secret(&secret),
            name: name.into(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
            scopes,
            rate_limit_rpm,
            usage: ApiKeyUsage::default(),
            active: true,
        };
        self.keys.write().insert(id.clone(), key.clone());
        self.persist()?;
        Ok((key, format!("{id}.{secret}")))
    }

    pub fn revoke(&self, id: &str) -> Result<bool> {
        let found = {
            let mut keys = self.keys.write();
            if let Some(k) = keys.get_mut(id) {
                k.active = false;
                true
            } else {
                false
            }
        };
        if found {
            self.persist()?;
        }
        Ok(found)
    }

    pub fn list(&self) -> Vec<ApiKey> {
        let mut v: Vec<ApiKey> = self.keys.read().values().cloned().collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        v
    }

    /// Steps 1-4 of the §4.J sequence: parse `"{id}.{secret}"`, hash-compare,
    /// expiry, then (if `required` is given) scope.
    pub fn authenticate(
        &self,
        presented: &str,
        required: Option<Scope>,
    ) -> std::result::Result<ApiKey, AuthError> {
        let (id, secret) = presented.split_once('.').ok_or(AuthError::Malformed)?;
        if secret.is_empty() {
            return Err(AuthError::Malformed);
        }

        let candidate = {
            let keys = self.keys.read();
            keys.get(id).cloned()
        }
        .ok_or(AuthError::Unknown)?;

        if !candidate.active {
            return Err(AuthError::Unknown);
        }

        let presented_hash = hash_secret(secret);
        let matches = presented_hash.as_bytes().ct_eq(candidate.hash.as_bytes()).unwrap_u8() == 1;
        if !matches {
            return Err(AuthError::Unknown);
        }

        let now = Utc::now();
        if candidate.is_expired(now) {
            return Err(AuthError::Expired);
        }

        if let Some(req) = required {
            if !candidate.has_scope(req) {
                return Err(AuthError::MissingScope);
            }
        }

        {
            let mut keys = self.keys.write();
            if let Some(k) = keys.get_mut(id) {
                k.last_used_at = Some(now);
                k.usage.total_requests += 1;
            }
        }

        Ok(candidate)
    }

    /// Step 5: sliding 60-second request-rate window.
    /// Read the current rate-limit window without consuming a slot from it.
    /// Used by `/usage` to report status without penalizing the caller for
    /// asking.
    pub fn rate_limit_status(&self, key: &ApiKey) -> RateLimitStatus {
        let now = Utc::now();
        let mut windows = self.windows.write();
        let window = windows.entry(key.id.clone()).or_default();
        while let Some(front) = window.front() {
            if (now - *front).num_seconds() >= WINDOW_SECS {
                window.pop_front();
            } else {
                break;
            }
        }
        let used = window.len() as u32;
        let limit = key.rate_limit_rpm;
        let reset_secs = window
            .front()
            .map(|front| (WINDOW_SECS - (now - *front).num_seconds()).max(0) as u64)
            .unwrap_or(WINDOW_SECS as u64);
        RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(used),
            reset_secs,
        }
    }

    pub fn check_rate_limit(&self, key: &ApiKey) -> std::result::Result<RateLimitStatus, RateLimitStatus> {
        let now = Utc::now();
        let mut windows = self.windows.write();
        let window = windows.entry(key.id.clone()).or_default();
        while let Some(front) = window.front() {
            if (now - *front).num_seconds() >= WINDOW_SECS {
                window.pop_front();
            } else {
                break;
            }
        }

        let used = window.len() as u32;
        let limit = key.rate_limit_rpm;
        let reset_secs = window
            .front()
            .map(|front| (WINDOW_SECS - (now - *front).num_seconds()).max(0) as u64)
            .unwrap_or(WINDOW_SECS as u64);

        if used >= limit {
            return Err(RateLimitStatus {
                limit,
                remaining: 0,
                reset_secs,
            });
        }

        window.push_back(now);
        Ok(RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(used + 1),
            reset_secs,
        })
    }

    pub fn record_tokens(&self, key_id: &str, tokens: u64) {
        let mut keys = self.keys.write();
        if let Some(k) = keys.get_mut(key_id) {
            k.usage.total_tokens += tokens;
        }
    }
}

/// Generates a hex string of `bytes` random bytes without pulling in the
/// `rand` crate — UUIDv4 is already an audited source of OS randomness.
fn rand_like_hex(bytes: usize) -> String {
    let mut out = String::with_capacity(bytes * 2);
    while out.len() < bytes * 2 {
        out.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    out.truncate(bytes * 2);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ApiKeyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_then_authenticate_succeeds() {
        let (_dir, store) = store();
        let (key, token) = store
            .create("test", [Scope::Chat].into_iter().collect(), 60, None)
            .unwrap();
        let authed = store.authenticate(&token, Some(Scope::Chat)).unwrap();
        assert_eq!(authed.id, key.id);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (_dir, store) = store();
        let (key, _token) = store
            .create("test", [Scope::Chat].into_iter().collect(), 60, None)
            .unwrap();
        let forged = format!("{}.wrongsecret", key.id);
        assert!(matches!(
            store.authenticate(&forged, None),
            Err(AuthError::Unknown)
        ));
    }

    #[test]
    fn revoked_key_is_rejected() {
        let (_dir, store) = store();
        let (key, token) = store
            .create("test", [Scope::Chat].into_iter().collect(), 60, None)
            .unwrap();
        store.revoke(&key.id).unwrap();
        assert!(matches!(
            store.authenticate(&token, None),
            Err(AuthError::Unknown)
        ));
    }

    #[test]
    fn missing_required_scope_is_rejected() {
        let (_dir, store) = store();
        let (_key, token) = store
            .create("test", [Scope::Chat].into_iter().collect(), 60, None)
            .unwrap();
        assert!(matches!(
            store.authenticate(&token, Some(Scope::Marathon)),
            Err(AuthError::MissingScope)
        ));
    }

    #[test]
    fn rate_limit_blocks_after_limit_reached() {
        let (_dir, store) = store();
        let (key, _token) = store
            .create("test", [Scope::Chat].into_iter().collect(), 2, None)
            .unwrap();
        assert!(store.check_rate_limit(&key).is_ok());
        assert!(store.check_rate_limit(&key).is_ok());
        assert!(store.check_rate_limit(&key).is_err());
    }
}
