use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// The full error-code taxonomy surfaced to clients. Every variant carries
/// a stable `code()` string; the `message` shown to callers never includes
/// cryptographic intermediates or secret material.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // -- Validation ------------------------------------------------------
    #[error("{0}")]
    InvalidBody(String),
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    // -- Auth --------------------------------------------------------------
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("session already consumed")]
    SessionConsumed,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    #[error("grant expired")]
    GrantExpired,

    // -- State ---------------------------------------------------------------
    #[error("missing key: {0}")]
    MissingKey(String),
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),
    #[error("mismatch: {0}")]
    Mismatch(String),
    #[error("account {0} already exists")]
    AccountExists(String),
    #[error("referenced account does not exist: {0}")]
    RefAccountMissing(String),

    // -- Policy ------------------------------------------------------------
    #[error("multi-party signing not supported by this code path")]
    MultiPartyNotSupported,
    #[error("threshold not met: needed {needed}, got {got}")]
    ThresholdNotMet { needed: usize, got: usize },
    #[error("shamir engine disabled")]
    ShamirDisabled,
    #[error("duplicate cosigner response: {0}")]
    DuplicateCosigner(String),

    // -- Transport -------------------------------------------------------
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("rate limit exceeded for {0}")]
    RateLimited(String),
    #[error("cosigner round-1 failed: {0}")]
    PeerInitFailed(String),
    #[error("cosigner round-2 failed: {0}")]
    PeerFinalizeFailed(String),
    #[error("timeout")]
    Timeout,

    // -- Cryptographic ----------------------------------------------------
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid commitment: {0}")]
    CommitmentInvalid(String),
    #[error("scalar out of range")]
    ScalarOutOfRange,

    // -- Chain -------------------------------------------------------------
    #[error("contract error: {0}")]
    ContractError(String),
    #[error("insufficient stake")]
    InsufficientStake,
    #[error("insufficient balance")]
    InsufficientBalance,

    // -- Fallback / transparent ---------------------------------------------
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl AppError {
    /// The stable string code returned in the `{ ok: false, code, ... }`
    /// response body, usable for programmatic matching by callers.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidBody(_) => "invalid_body",
            AppError::InvalidAccountId(_) => "invalid_account_id",
            AppError::InvalidKeyFormat(_) => "invalid_key_format",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::SessionConsumed => "session_consumed",
            AppError::SessionExpired => "session_expired",
            AppError::InvalidGrant(_) => "invalid_grant",
            AppError::GrantExpired => "grant_expired",
            AppError::MissingKey(_) => "missing_key",
            AppError::UnknownKeyId(_) => "unknown_key_id",
            AppError::Mismatch(_) => "mismatch",
            AppError::AccountExists(_) => "account_exists",
            AppError::RefAccountMissing(_) => "ref_account_missing",
            AppError::MultiPartyNotSupported => "multi_party_not_supported",
            AppError::ThresholdNotMet { .. } => "threshold_not_met",
            AppError::ShamirDisabled => "shamir_disabled",
            AppError::DuplicateCosigner(_) => "duplicate_cosigner",
            AppError::BackendUnavailable(_) => "backend_unavailable",
            AppError::RateLimited(_) => "rate_limited",
            AppError::PeerInitFailed(_) => "peer_init_failed",
            AppError::PeerFinalizeFailed(_) => "peer_finalize_failed",
            AppError::Timeout => "timeout",
            AppError::InvalidSignature => "invalid_signature",
            AppError::CommitmentInvalid(_) => "commitment_invalid",
            AppError::ScalarOutOfRange => "scalar_out_of_range",
            AppError::ContractError(_) => "contract_error",
            AppError::InsufficientStake => "insufficient_stake",
            AppError::InsufficientBalance => "insufficient_balance",
            AppError::Internal(_) => "internal",
            AppError::Reqwest(_) => "backend_unavailable",
            AppError::SerdeJson(_) => "invalid_body",
            AppError::Redis(_) => "backend_unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            InvalidBody(_) | InvalidAccountId(_) | InvalidKeyFormat(_) => StatusCode::BAD_REQUEST,
            Unauthorized(_) | SessionConsumed | SessionExpired | InvalidGrant(_)
            | GrantExpired => StatusCode::UNAUTHORIZED,
            MissingKey(_) | UnknownKeyId(_) | Mismatch(_) => StatusCode::BAD_REQUEST,
            AccountExists(_) => StatusCode::CONFLICT,
            RefAccountMissing(_) => StatusCode::BAD_REQUEST,
            MultiPartyNotSupported | ShamirDisabled => StatusCode::BAD_REQUEST,
            ThresholdNotMet { .. } => StatusCode::BAD_GATEWAY,
            DuplicateCosigner(_) => StatusCode::BAD_REQUEST,
            BackendUnavailable(_) | Redis(_) | Reqwest(_) => StatusCode::BAD_GATEWAY,
            RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            PeerInitFailed(_) | PeerFinalizeFailed(_) => StatusCode::BAD_GATEWAY,
            Timeout => StatusCode::GATEWAY_TIMEOUT,
            // Malformed-client-input crypto errors are 4xx; cosigner-caused
            // ones arrive via PeerInitFailed/PeerFinalizeFailed instead.
            InvalidSignature => StatusCode::BAD_REQUEST,
            CommitmentInvalid(_) | ScalarOutOfRange => StatusCode::BAD_REQUEST,
            ContractError(_) => StatusCode::BAD_GATEWAY,
            InsufficientStake | InsufficientBalance => StatusCode::BAD_REQUEST,
            Internal(_) | SerdeJson(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        match &self {
            AppError::Internal(msg) => tracing::error!(error = %msg, "internal error"),
            AppError::Reqwest(e) => tracing::error!(error = %e, "upstream http error"),
            AppError::Redis(e) => tracing::error!(error = %e, "kv backend error"),
            _ => tracing::debug!(code = code, error = %self, "request failed"),
        }

        let body = json!({
            "ok": false,
            "code": code,
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
