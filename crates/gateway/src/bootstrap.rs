//! `AppState` construction and background-task spawning, extracted from
//! `main.rs` so `serve`, `run`, and `chat` can all boot the same runtime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use sa_domain::budget::Budget;
use sa_domain::config::{Config, ConfigSeverity};
use sa_providers::registry::ProviderRegistry;
use sa_sessions::search::TranscriptIndex;
use sa_sessions::{IdentityResolver, LifecycleManager, SessionStore, TranscriptWriter};
use sa_tools::manager::ProcessManager;
use sa_tools::registry::ToolRegistry;

use crate::runtime::apikeys::ApiKeyStore;
use crate::runtime::approval::ApprovalStore;
use crate::runtime::cancel::CancelMap;
use crate::runtime::marathon::MarathonStore;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::token_accountant::TokenAccountant;
use crate::runtime::webhook::WebhookDispatcher;
use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`]. Shared boot path for `serve`, `run`, and `chat`.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state_path = &config.workspace.state_path;
    std::fs::create_dir_all(&config.workspace.path)
        .with_context(|| format!("creating workspace dir {}", config.workspace.path.display()))?;
    std::fs::create_dir_all(state_path)
        .with_context(|| format!("creating state dir {}", state_path.display()))?;

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized — configure API keys to enable chat");
    } else {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }

    // ── Session management ───────────────────────────────────────────
    let sessions = Arc::new(
        SessionStore::new(state_path).context("initializing session store")?,
    );
    let identity = Arc::new(IdentityResolver::from_config(&config.sessions.identity_links));
    let lifecycle = Arc::new(LifecycleManager::new(config.sessions.lifecycle.clone()));
    let transcript_dir = sessions.transcript_dir();
    let transcripts = Arc::new(TranscriptWriter::new(&transcript_dir));
    tracing::info!(
        agent_id = %config.sessions.agent_id,
        dm_scope = ?config.sessions.dm_scope,
        identity_links = identity.len(),
        "session management ready"
    );

    // ── Transcript search index, built from whatever is already on disk ──
    let transcript_index = Arc::new(TranscriptIndex::build_from_dir(&transcript_dir));

    // ── Session locks + cancellation ─────────────────────────────────
    let session_locks = Arc::new(SessionLockMap::new());
    let cancel_map = Arc::new(CancelMap::new());

    // ── Tool registry (exec/process/file-ops) ────────────────────────
    let processes = Arc::new(ProcessManager::new(config.tools.exec.clone()));
    let mut tool_registry = ToolRegistry::new();
    sa_tools::builtin::register_default(
        &mut tool_registry,
        config.workspace.path.clone(),
        processes.clone(),
    )
    .context("registering default tools")?;
    let tools = Arc::new(tool_registry);
    tracing::info!("tool registry ready");

    // ── Token accountant ──────────────────────────────────────────────
    let token_accountant = Arc::new(
        TokenAccountant::new(state_path, config.quota.clone(), Budget::default())
            .context("initializing token accountant")?,
    );

    // ── Approval gate ──────────────────────────────────────────────────
    let approvals = Arc::new(ApprovalStore::new(Duration::from_secs(
        config.approval.default_timeout_secs as u64,
    )));

    // ── Marathon store ───────────────────────────────────────────────
    let marathons = Arc::new(
        MarathonStore::new(state_path).context("initializing marathon store")?,
    );

    // ── Control plane: API keys + webhooks ───────────────────────────
    let api_keys = Arc::new(
        ApiKeyStore::new(state_path).context("initializing API key store")?,
    );
    if api_keys.list().is_empty() {
        let (key, secret) = api_keys
            .create(
                "bootstrap",
                std::iter::once(sa_domain::apikey::Scope::Wildcard).collect(),
                config.control_plane.default_rate_limit_rpm,
                None,
            )
            .context("creating bootstrap API key")?;
        tracing::warn!(
            key_id = %key.id,
            "no API keys found — created a bootstrap key with full scope; \
             this secret is shown once: {secret}"
        );
    }

    let webhooks = Arc::new(
        WebhookDispatcher::new(
            state_path,
            Duration::from_millis(config.control_plane.webhook_timeout_ms),
        )
        .context("initializing webhook dispatcher")?,
    );

    // ── Admin token (hashed once for constant-time comparison) ───────
    let admin_token_hash = {
        let env_var = &config.admin.token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!(env = %env_var, "admin bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!(
                    env = %env_var,
                    "admin bearer-token auth DISABLED — set the env var to enable /webhooks*"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        llm,
        sessions,
        identity,
        lifecycle,
        transcripts,
        session_locks,
        cancel_map,
        transcript_index,
        tools,
        token_accountant,
        approvals,
        marathons,
        api_keys,
        webhooks,
        admin_token_hash,
    })
}

/// Spawn long-running background tasks (session flush, marathon watchdog,
/// expired-approval sweep). Call after [`build_app_state`] when serving
/// HTTP; one-shot CLI commands (`run`) skip this.
pub fn spawn_background_tasks(state: &Arc<AppState>) {
    // ── Quarantine marathons left mid-step by a prior crash ───────────
    {
        let quarantined = crate::runtime::marathon::watchdog::quarantine_invalid_on_startup(state);
        if !quarantined.is_empty() {
            tracing::warn!(ids = ?quarantined, "quarantined invalid marathons on startup");
        }
    }

    // ── Marathon watchdog (heartbeat/restart loop) ───────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            crate::runtime::marathon::watchdog::run(state).await;
        });
    }

    // ── Periodic session flush ───────────────────────────────────────
    {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                if let Err(e) = sessions.flush() {
                    tracing::warn!(error = %e, "session store flush failed");
                }
            }
        });
    }

    // ── Periodic expired-approval sweep ──────────────────────────────
    {
        let approvals = state.approvals.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let expired = approvals.sweep_expired();
                if expired > 0 {
                    tracing::info!(count = expired, "swept expired approvals");
                }
            }
        });
    }

    tracing::info!("background tasks spawned");
}
