//! Public threshold-Ed25519 signing endpoints: `preauthorize` → `sign/init`
//! → `sign/finalize`. Grounded on this codebase's former `routes/orders.rs`
//! request/response schema style, delegating all orchestration to
//! `ThresholdSigningService`.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::CommitmentPair;
use crate::threshold::service::PreauthorizeRequest;
use crate::webauthn::IntentClaim;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/threshold-ed25519/preauthorize", post(preauthorize))
        .route("/threshold-ed25519/sign/init", post(sign_init))
        .route("/threshold-ed25519/sign/finalize", post(sign_finalize))
}

#[derive(Debug, Deserialize)]
struct PreauthorizeBody {
    #[serde(flatten)]
    claim: IntentClaim,
    #[serde(rename = "clientVerifyingShareB64u")]
    client_verifying_share_b64u: String,
    credential: Option<serde_json::Value>,
    #[serde(rename = "reuseAuthSessionToken")]
    reuse_auth_session_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct PreauthorizeHttpResponse {
    #[serde(rename = "mpcSessionId")]
    mpc_session_id: String,
    #[serde(rename = "signingDigestB64u")]
    signing_digest_b64u: String,
    #[serde(rename = "expiresAtMs")]
    expires_at_ms: i64,
    #[serde(rename = "authSessionToken", skip_serializing_if = "Option::is_none")]
    auth_session_token: Option<String>,
}

async fn preauthorize(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<PreauthorizeBody>,
) -> AppResult<Json<PreauthorizeHttpResponse>> {
    let allowed = state
        .rate_limiter
        .is_allowed_with(
            &addr.ip().to_string(),
            "preauthorize",
            state.config.rate_limit_signing_per_min,
            60,
        )
        .await?;
    if !allowed {
        return Err(AppError::RateLimited("preauthorize".into()));
    }
    metrics::counter!("http_requests_total", "endpoint" => "preauthorize").increment(1);

    let now_ms = chrono::Utc::now().timestamp_millis();
    let response = state
        .threshold
        .preauthorize(
            PreauthorizeRequest {
                claim: body.claim,
                client_verifying_share_b64u: body.client_verifying_share_b64u,
                credential: body.credential,
                reuse_auth_session_token: body.reuse_auth_session_token,
            },
            now_ms,
        )
        .await?;

    Ok(Json(PreauthorizeHttpResponse {
        mpc_session_id: response.mpc_session_id,
        signing_digest_b64u: response.signing_digest_b64u,
        expires_at_ms: response.expires_at_ms,
        auth_session_token: response.auth_session_token,
    }))
}

#[derive(Debug, Deserialize)]
struct SignInitBody {
    #[serde(rename = "mpcSessionId")]
    mpc_session_id: String,
    #[serde(rename = "clientCommitments")]
    client_commitments: CommitmentPair,
}

#[derive(Debug, Serialize)]
struct SignInitHttpResponse {
    #[serde(rename = "signingSessionId")]
    signing_session_id: String,
    #[serde(rename = "participantIds")]
    participant_ids: Vec<u16>,
    #[serde(rename = "commitmentsById")]
    commitments_by_id: BTreeMap<String, CommitmentPair>,
    #[serde(rename = "relayerVerifyingSharesById")]
    relayer_verifying_shares_by_id: BTreeMap<String, String>,
}

async fn sign_init(
    State(state): State<AppState>,
    Json(body): Json<SignInitBody>,
) -> AppResult<Json<SignInitHttpResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "sign_init").increment(1);
    let now_ms = chrono::Utc::now().timestamp_millis();
    let response = state
        .threshold
        .sign_init(&body.mpc_session_id, body.client_commitments, now_ms)
        .await?;

    Ok(Json(SignInitHttpResponse {
        signing_session_id: response.signing_session_id,
        participant_ids: response.participant_ids,
        commitments_by_id: response.commitments_by_id,
        relayer_verifying_shares_by_id: response.relayer_verifying_shares_by_id,
    }))
}

#[derive(Debug, Deserialize)]
struct SignFinalizeBody {
    #[serde(rename = "signingSessionId")]
    signing_session_id: String,
    #[serde(rename = "clientSignatureShareB64u")]
    client_signature_share_b64u: String,
}

#[derive(Debug, Serialize)]
struct SignFinalizeHttpResponse {
    signature: String,
    #[serde(rename = "relayerSignatureSharesById")]
    relayer_signature_shares_by_id: BTreeMap<String, String>,
}

async fn sign_finalize(
    State(state): State<AppState>,
    Json(body): Json<SignFinalizeBody>,
) -> AppResult<Json<SignFinalizeHttpResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "sign_finalize").increment(1);
    let now_ms = chrono::Utc::now().timestamp_millis();
    let response = state
        .threshold
        .sign_finalize(
            &body.signing_session_id,
            &body.client_signature_share_b64u,
            now_ms,
        )
        .await?;

    Ok(Json(SignFinalizeHttpResponse {
        signature: response.signature,
        relayer_signature_shares_by_id: response.relayer_signature_shares_by_id,
    }))
}
