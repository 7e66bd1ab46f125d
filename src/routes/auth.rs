//! Public account-creation/registration and Shamir-bridge endpoints.
//! Grounded on this codebase's former `routes/orders.rs` (typed
//! request/response structs, rate limiting by caller IP, `metrics::counter!`
//! per endpoint) reworked onto `AuthService`.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::service::{
    ApplyServerLockRequest, ApplyServerLockResponse, CreateAccountAndRegisterUserRequest,
    CreateAccountAndRegisterUserResponse, KeyInfoResponse, RemoveServerLockRequest,
    RemoveServerLockResponse, VerifyAuthenticationResponseRequest,
    VerifyAuthenticationResponseResponse,
};
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/create_account_and_register_user",
            post(create_account_and_register_user),
        )
        .route(
            "/verify_authentication_response",
            post(verify_authentication_response),
        )
        .route("/vrf/apply-server-lock", post(apply_server_lock))
        .route("/vrf/remove-server-lock", post(remove_server_lock))
        .route("/shamir/key-info", get(key_info))
}

async fn create_account_and_register_user(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<CreateAccountAndRegisterUserRequest>,
) -> AppResult<Json<CreateAccountAndRegisterUserResponse>> {
    check_rate_limit(
        &state,
        &addr,
        "create_account_and_register_user",
        state.config.rate_limit_register_per_min,
    )
    .await?;
    metrics::counter!("http_requests_total", "endpoint" => "create_account_and_register_user")
        .increment(1);
    let response = state.auth.create_account_and_register_user(req).await?;
    Ok(Json(response))
}

async fn verify_authentication_response(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<VerifyAuthenticationResponseRequest>,
) -> AppResult<Json<VerifyAuthenticationResponseResponse>> {
    check_rate_limit(
        &state,
        &addr,
        "verify_authentication_response",
        state.config.rate_limit_signing_per_min,
    )
    .await?;
    metrics::counter!("http_requests_total", "endpoint" => "verify_authentication_response")
        .increment(1);
    let now_ms = chrono::Utc::now().timestamp_millis();
    let response = state
        .auth
        .verify_authentication_response(req, now_ms)
        .await?;
    Ok(Json(response))
}

async fn apply_server_lock(
    State(state): State<AppState>,
    Json(req): Json<ApplyServerLockRequest>,
) -> AppResult<Json<ApplyServerLockResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "vrf_apply_server_lock").increment(1);
    Ok(Json(state.auth.handle_apply_server_lock(req)?))
}

async fn remove_server_lock(
    State(state): State<AppState>,
    Json(req): Json<RemoveServerLockRequest>,
) -> AppResult<Json<RemoveServerLockResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "vrf_remove_server_lock").increment(1);
    Ok(Json(state.auth.handle_remove_server_lock(req)?))
}

async fn key_info(State(state): State<AppState>) -> Json<KeyInfoResponse> {
    metrics::counter!("http_requests_total", "endpoint" => "shamir_key_info").increment(1);
    Json(state.auth.key_info())
}

async fn check_rate_limit(
    state: &AppState,
    addr: &SocketAddr,
    endpoint: &str,
    limit_per_min: u32,
) -> AppResult<()> {
    let allowed = state
        .rate_limiter
        .is_allowed_with(&addr.ip().to_string(), endpoint, limit_per_min, 60)
        .await?;
    if !allowed {
        return Err(AppError::RateLimited(endpoint.to_string()));
    }
    Ok(())
}
