//! Control-plane authentication + rate-limit middleware (§4.J, §6).
//!
//! A key may be presented as `Authorization: Bearer <id>.<secret>`, an
//! `X-Api-Key: <id>.<secret>` header, or an `?api_key=<id>.<secret>` query
//! parameter (checked in that order). Every protected response carries
//! `X-RateLimit-{Limit,Remaining,Reset}` and an `X-Request-Id` echoing or
//! minting a request id, per §6.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;

use sa_domain::apikey::Scope;

use crate::runtime::apikeys::AuthError;
use crate::state::AppState;

fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

fn extract_presented(req: &Request<Body>) -> Option<String> {
    if let Some(v) = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(v.to_string());
    }
    if let Some(v) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    req.uri().query().and_then(|q| query_param(q, "api_key"))
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({ "error": { "code": code, "message": message } })
}

fn auth_error_response(err: AuthError) -> Response {
    let (status, code) = match err {
        AuthError::Malformed | AuthError::Unknown => (StatusCode::UNAUTHORIZED, "unauthorized"),
        AuthError::Expired => (StatusCode::UNAUTHORIZED, "unauthorized"),
        AuthError::MissingScope => (StatusCode::FORBIDDEN, "forbidden"),
    };
    (status, axum::Json(error_body(code, &err.to_string()))).into_response()
}

/// Require a valid, unexpired, scope-satisfying, rate-limit-respecting API
/// key on every request this middleware guards. The required [`Scope`] is
/// read from an `Extension<Scope>` inserted by an outer per-route-group
/// layer (see `api::mod::router`) — there is no global default, every
/// protected route group must carry one.
pub async fn require_api_key(
    State(state): State<AppState>,
    Extension(required_scope): Extension<Scope>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let Some(presented) = extract_presented(&req) else {
        return auth_error_response(AuthError::Malformed);
    };

    let key = match state.api_keys.authenticate(&presented, Some(required_scope)) {
        Ok(k) => k,
        Err(e) => return auth_error_response(e),
    };

    let rate = match state.api_keys.check_rate_limit(&key) {
        Ok(r) => r,
        Err(r) => {
            let mut resp = (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(error_body("rate_limit_exceeded", "too many requests")),
            )
                .into_response();
            set_rate_headers(&mut resp, r.limit, r.remaining, r.reset_secs);
            return resp;
        }
    };

    req.extensions_mut().insert(key);

    let mut resp = next.run(req).await;
    set_rate_headers(&mut resp, rate.limit, rate.remaining, rate.reset_secs);
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert("x-request-id", v);
    }
    resp
}

fn set_rate_headers(resp: &mut Response, limit: u32, remaining: u32, reset_secs: u64) {
    let headers = resp.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&reset_secs.to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }
}

/// Admin-scoped routes additionally require `RUNTIME_ADMIN_TOKEN` to be
/// configured and presented — unset means unreachable (403), never open.
pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    use sha2::{Digest, Sha256};
    use subtle::ConstantTimeEq;

    let Some(expected) = &state.admin_token_hash else {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(error_body("forbidden", "admin routes are disabled (RUNTIME_ADMIN_TOKEN unset)")),
        )
            .into_response();
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected.as_slice())) {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(error_body("forbidden", "invalid admin token")),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_shape() {
        let v = error_body("not_found", "no such session");
        assert_eq!(v["error"]["code"], "not_found");
        assert_eq!(v["error"]["message"], "no such session");
    }
}
