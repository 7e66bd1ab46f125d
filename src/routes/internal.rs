//! Internal coordinator↔cosigner endpoints, authenticated by the embedded
//! `coordinatorGrant` rather than by transport-level auth. `/cosign/*` is an
//! alias of `/sign/*` for the N-party fleet fan-out path (same handler,
//! different URL cosigners are configured with).

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use crate::error::AppResult;
use crate::mpc::signer::{Round1Request, Round1Response, Round2Request, Round2Response};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/threshold-ed25519/internal/sign/init", post(sign_init))
        .route(
            "/threshold-ed25519/internal/sign/finalize",
            post(sign_finalize),
        )
        .route("/threshold-ed25519/internal/cosign/init", post(sign_init))
        .route(
            "/threshold-ed25519/internal/cosign/finalize",
            post(sign_finalize),
        )
}

async fn sign_init(
    State(state): State<AppState>,
    Json(req): Json<Round1Request>,
) -> AppResult<Json<Round1Response>> {
    metrics::counter!("http_requests_total", "endpoint" => "internal_sign_init").increment(1);
    let now_ms = chrono::Utc::now().timestamp_millis();
    Ok(Json(state.cosigner.handle_round1(req, now_ms).await?))
}

async fn sign_finalize(
    State(state): State<AppState>,
    Json(req): Json<Round2Request>,
) -> AppResult<Json<Round2Response>> {
    metrics::counter!("http_requests_total", "endpoint" => "internal_sign_finalize").increment(1);
    let now_ms = chrono::Utc::now().timestamp_millis();
    Ok(Json(state.cosigner.handle_round2(req, now_ms).await?))
}
