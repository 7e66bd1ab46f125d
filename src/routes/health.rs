//! Liveness probe. Grounded on this codebase's former `routes/health.rs`
//! shape (a single `Json` response built off shared state) but reporting
//! the Shamir key ring's current key id instead of database/Redis
//! connectivity, since this service's only always-on dependency is the
//! in-process key material, not an external datastore.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    #[serde(rename = "currentKeyId")]
    current_key_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    metrics::counter!("http_requests_total", "endpoint" => "healthz").increment(1);
    Json(HealthResponse {
        ok: true,
        current_key_id: state.shamir.current_key_id(),
    })
}
