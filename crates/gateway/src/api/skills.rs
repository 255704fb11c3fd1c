//! `GET /skills` (§6, scope `skills`) — skill inventory.
//!
//! Concrete skill-pack implementations are out of scope; this reports an
//! empty inventory so clients that poll it degrade gracefully rather than
//! 404ing.

use axum::response::{IntoResponse, Json};

pub async fn list_skills() -> impl IntoResponse {
    Json(serde_json::json!({ "skills": [], "total": 0 }))
}
