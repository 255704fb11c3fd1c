//! `POST /generate/image` (§6, scope `generate`).
//!
//! Image generation backends are out of scope; this returns a stable
//! `not_implemented` error rather than a bare 404 so clients that probe the
//! full §6 surface get a documented response instead of a routing failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

pub async fn generate_image() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({
            "error": {
                "code": "not_implemented",
                "message": "image generation is not supported by this deployment",
            }
        })),
    )
}
