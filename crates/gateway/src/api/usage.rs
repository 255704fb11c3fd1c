//! `GET /usage` (§6, scope `chat`) — the calling key's current usage and
//! rate-limit status.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::Extension;

use sa_domain::apikey::ApiKey;

use crate::state::AppState;

pub async fn get_usage(State(state): State<AppState>, Extension(key): Extension<ApiKey>) -> impl IntoResponse {
    let (daily_tokens, daily_cost_usd) = state.token_accountant.daily_usage(&key.id);
    let rate = state.api_keys.rate_limit_status(&key);

    Json(serde_json::json!({
        "key_id": key.id,
        "key_name": key.name,
        "requests_total": key.usage.total_requests,
        "tokens_total": key.usage.total_tokens,
        "daily_tokens": daily_tokens,
        "daily_cost_usd": daily_cost_usd,
        "rate_limit": {
            "limit": rate.limit,
            "remaining": rate.remaining,
            "reset": rate.reset_secs,
        },
    }))
}
