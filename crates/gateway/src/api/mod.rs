pub mod approvals;
pub mod auth;
pub mod chat;
pub mod generate;
pub mod health;
pub mod marathon;
pub mod memory;
pub mod sessions;
pub mod skills;
pub mod tools;
pub mod usage;
pub mod webhooks;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Extension, Router};

use sa_domain::apikey::Scope;

use crate::state::AppState;

/// Wrap `router` with `require_api_key` guarding `scope` (§4.J step 4). The
/// `Extension(scope)` layer is applied outermost so it runs before the
/// auth middleware it feeds.
fn scoped(state: &AppState, scope: Scope, router: Router<AppState>) -> Router<AppState> {
    router
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .layer(Extension(scope))
}

/// Build the full API router (§6).
///
/// `/health` and `/` are public. Everything else requires a valid,
/// scope-satisfying API key via [`auth::require_api_key`]; `/webhooks*`
/// additionally requires the control-plane admin token via
/// [`auth::require_admin_token`].
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/", get(health::catalog));

    let webhooks = Router::new()
        .route("/webhooks", post(webhooks::create_webhook))
        .route("/webhooks", get(webhooks::list_webhooks))
        .route("/webhooks/:id", delete(webhooks::delete_webhook))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_token,
        ));

    let chat_routes = scoped(&state, Scope::Chat, Router::new().route("/chat", post(chat::chat)));
    let chat_stream_routes = scoped(
        &state,
        Scope::ChatStream,
        Router::new().route("/chat/stream", post(chat::chat_stream)),
    );
    let session_routes = scoped(
        &state,
        Scope::Sessions,
        Router::new()
            .route("/sessions", get(sessions::list_sessions))
            .route("/sessions/:key", get(sessions::get_session))
            .route("/sessions/:key", delete(sessions::delete_session)),
    );
    let memory_routes = scoped(&state, Scope::Memory, Router::new().route("/memory/search", post(memory::search)));
    let marathon_write_routes = scoped(
        &state,
        Scope::Marathon,
        Router::new()
            .route("/marathon", post(marathon::create_marathon))
            .route("/marathon/:id/pause", post(marathon::pause_marathon))
            .route("/marathon/:id/resume", post(marathon::resume_marathon))
            .route("/marathon/:id/abort", post(marathon::abort_marathon))
            .route("/marathon/:id/approve", post(marathon::approve_marathon))
            .route("/marathon/:id/reject", post(marathon::reject_marathon)),
    );
    let marathon_read_routes = scoped(
        &state,
        Scope::MarathonRead,
        Router::new()
            .route("/marathon", get(marathon::list_marathons))
            .route("/marathon/:id", get(marathon::get_marathon)),
    );
    let generate_routes = scoped(&state, Scope::Generate, Router::new().route("/generate/image", post(generate::generate_image)));
    let skills_routes = scoped(&state, Scope::Skills, Router::new().route("/skills", get(skills::list_skills)));
    let tools_routes = scoped(&state, Scope::Tools, Router::new().route("/tools", get(tools::list_tools)));
    let usage_routes = scoped(&state, Scope::Chat, Router::new().route("/usage", get(usage::get_usage)));
    let approval_routes = scoped(
        &state,
        Scope::Chat,
        Router::new()
            .route("/approvals/:id/approve", post(approvals::approve))
            .route("/approvals/:id/reject", post(approvals::reject)),
    );

    let protected = chat_routes
        .merge(chat_stream_routes)
        .merge(session_routes)
        .merge(memory_routes)
        .merge(marathon_write_routes)
        .merge(marathon_read_routes)
        .merge(generate_routes)
        .merge(skills_routes)
        .merge(tools_routes)
        .merge(usage_routes)
        .merge(approval_routes)
        .merge(webhooks);

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
