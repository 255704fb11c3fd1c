use std::sync::Arc;

use sa_domain::budget::Budget;
use sa_domain::config::Config;
use sa_providers::registry::ProviderRegistry;
use sa_sessions::search::TranscriptIndex;
use sa_sessions::{IdentityResolver, LifecycleManager, SessionStore, TranscriptWriter};
use sa_tools::registry::ToolRegistry;

use crate::runtime::apikeys::ApiKeyStore;
use crate::runtime::approval::ApprovalStore;
use crate::runtime::cancel::CancelMap;
use crate::runtime::marathon::MarathonStore;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::token_accountant::TokenAccountant;
use crate::runtime::webhook::WebhookDispatcher;

/// Shared application state passed to every API handler and runtime task.
///
/// Fields are grouped by concern:
/// - **Core services** — config, LLM providers
/// - **Session management** — sessions, identity, lifecycle, transcripts, locks, cancellation
/// - **Tools** — the tool registry turns are dispatched against
/// - **Accounting & gating** — token accountant, approval gate
/// - **Marathon** — durable long-running goal state
/// - **Control plane** — API keys, outbound webhooks
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,

    // ── Session management ────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub identity: Arc<IdentityResolver>,
    pub lifecycle: Arc<LifecycleManager>,
    pub transcripts: Arc<TranscriptWriter>,
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,
    /// Full-text transcript search index backing `/memory/search`. SerialAgent
    /// carries no vector/embedding store; this is a reverse word index over
    /// session transcripts, built at startup and kept live as turns append.
    pub transcript_index: Arc<TranscriptIndex>,

    // ── Tools ─────────────────────────────────────────────────────────
    pub tools: Arc<ToolRegistry>,

    // ── Accounting & gating ───────────────────────────────────────────
    pub token_accountant: Arc<TokenAccountant>,
    pub approvals: Arc<ApprovalStore>,

    // ── Marathon ──────────────────────────────────────────────────────
    pub marathons: Arc<MarathonStore>,

    // ── Control plane ─────────────────────────────────────────────────
    pub api_keys: Arc<ApiKeyStore>,
    pub webhooks: Arc<WebhookDispatcher>,
    /// SHA-256 hash of the admin bearer token (`RUNTIME_ADMIN_TOKEN`).
    /// `None` disables admin-scoped routes entirely (403), never defaults open.
    pub admin_token_hash: Option<Vec<u8>>,
}

impl AppState {
    /// Assemble the default runtime [`Budget`] from config. Budget is
    /// otherwise a pure in-memory object mutated at runtime via
    /// `TokenAccountant::update_budget` (§4.A `updateBudget`), not itself
    /// read back from TOML on every request.
    pub fn default_budget() -> Budget {
        Budget::default()
    }
}
