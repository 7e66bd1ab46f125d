//! `AuthService`: the atomic account-creation-and-registration pipeline plus
//! the Shamir bridge handlers. Grounded on this codebase's former
//! `services/order_service.rs` (external-RPC-backed service wrapping a
//! queue, returning typed request/response structs) and `tasks/
//! withdrawal_processor.rs` (one broadcast-and-wait RPC per queued job).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::chain::{
    self, Action, AccountId, FunctionCallAction, NearRpcClient, RelayerSigner, Transaction,
};
use crate::auth::queue::{QueueStats, TransactionQueue};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::shamir::ShamirKeyRing;
use crate::utils::crypto::{JwtSigner, SessionClaims};
use crate::utils::validation::is_valid_account_id;
use crate::webauthn::WebAuthnVerifier;

const JWT_ISSUER: &str = "passkey-wallet";

#[derive(Debug, Deserialize)]
pub struct CreateAccountAndRegisterUserRequest {
    #[serde(rename = "newAccountId")]
    pub new_account_id: String,
    #[serde(rename = "newPublicKey")]
    pub new_public_key: String,
    #[serde(rename = "vrfData")]
    pub vrf_data: Value,
    #[serde(rename = "webauthnRegistration")]
    pub webauthn_registration: Value,
    #[serde(rename = "deterministicVrfPublicKey")]
    pub deterministic_vrf_public_key: String,
    #[serde(rename = "authenticatorOptions")]
    pub authenticator_options: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateAccountAndRegisterUserResponse {
    pub success: bool,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyAuthenticationResponseRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "vrfData")]
    pub vrf_data: Value,
    #[serde(rename = "webauthnAuthentication")]
    pub webauthn_authentication: Value,
}

#[derive(Debug, Serialize)]
pub struct VerifyAuthenticationResponseResponse {
    pub verified: bool,
    #[serde(rename = "sessionCredential", skip_serializing_if = "Option::is_none")]
    pub session_credential: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyServerLockRequest {
    #[serde(rename = "kekCB64u")]
    pub kek_c_b64u: String,
}

#[derive(Debug, Serialize)]
pub struct ApplyServerLockResponse {
    #[serde(rename = "kekCsB64u")]
    pub kek_cs_b64u: String,
    #[serde(rename = "keyId")]
    pub key_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveServerLockRequest {
    #[serde(rename = "kekCsB64u")]
    pub kek_cs_b64u: String,
    #[serde(rename = "keyId")]
    pub key_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RemoveServerLockResponse {
    #[serde(rename = "kekCB64u")]
    pub kek_c_b64u: String,
}

#[derive(Debug, Serialize)]
pub struct KeyInfoResponse {
    #[serde(rename = "currentKeyId")]
    pub current_key_id: String,
    #[serde(rename = "graceKeyIds")]
    pub grace_key_ids: Vec<String>,
}

pub struct AuthService {
    rpc: Arc<NearRpcClient>,
    signer: Arc<RelayerSigner>,
    queue: TransactionQueue<chain::BroadcastOutcome>,
    webauthn: Arc<dyn WebAuthnVerifier>,
    jwt_signer: Arc<dyn JwtSigner>,
    shamir: Arc<ShamirKeyRing>,
    webauthn_contract_id: String,
    deposit_yocto: u128,
    gas: u64,
}

impl AuthService {
    pub fn new(
        config: &Config,
        http: reqwest::Client,
        webauthn: Arc<dyn WebAuthnVerifier>,
        jwt_signer: Arc<dyn JwtSigner>,
        shamir: Arc<ShamirKeyRing>,
    ) -> AppResult<Self> {
        let signer = RelayerSigner::from_config(config)?;
        let rpc = NearRpcClient::new(http, config.near_rpc_url.clone());
        let deposit_yocto = config
            .account_initial_balance
            .parse::<u128>()
            .map_err(|e| AppError::Internal(format!("ACCOUNT_INITIAL_BALANCE: {e}")))?;
        let gas_tera = config
            .create_account_and_register_gas
            .parse::<u64>()
            .map_err(|e| AppError::Internal(format!("CREATE_ACCOUNT_AND_REGISTER_GAS: {e}")))?;
        Ok(Self {
            rpc: Arc::new(rpc),
            signer: Arc::new(signer),
            queue: TransactionQueue::spawn(),
            webauthn,
            jwt_signer,
            shamir,
            webauthn_contract_id: config.webauthn_contract_id.clone(),
            deposit_yocto,
            gas: gas_tera * 1_000_000_000_000,
        })
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub async fn create_account_and_register_user(
        &self,
        req: CreateAccountAndRegisterUserRequest,
    ) -> AppResult<CreateAccountAndRegisterUserResponse> {
        if !is_valid_account_id(&req.new_account_id) {
            return Err(AppError::InvalidAccountId(req.new_account_id));
        }

        let registered = self
            .webauthn
            .verify_registration(&req.new_account_id, "", &req.webauthn_registration)
            .await?;
        if !registered {
            return Err(AppError::Unauthorized(
                "webauthn registration not verified".into(),
            ));
        }

        let args = serde_json::json!({
            "new_account_id": req.new_account_id,
            "new_public_key": req.new_public_key,
            "vrf_data": req.vrf_data,
            "webauthn_registration": req.webauthn_registration,
            "deterministic_vrf_public_key": req.deterministic_vrf_public_key,
            "authenticator_options": req.authenticator_options,
        });

        let outcome = self
            .run_function_call("create_account_and_register_user", args, self.deposit_yocto)
            .await?;

        metrics::counter!("auth_account_created_total").increment(1);

        Ok(CreateAccountAndRegisterUserResponse {
            success: true,
            transaction_hash: outcome.transaction_hash,
            message: format!("account {} created and registered", req.new_account_id),
        })
    }

    pub async fn verify_authentication_response(
        &self,
        req: VerifyAuthenticationResponseRequest,
        now_ms: i64,
    ) -> AppResult<VerifyAuthenticationResponseResponse> {
        let args = serde_json::json!({
            "user_id": req.user_id,
            "vrf_data": req.vrf_data,
            "webauthn_authentication": req.webauthn_authentication,
        });

        let outcome = self
            .run_function_call("verify_authentication_response", args, 0)
            .await?;

        let contract_result = chain::decode_success_json(&outcome)?;
        let verified = contract_result
            .as_ref()
            .and_then(|v| v.get("verified"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !verified {
            metrics::counter!("auth_verify_total", "outcome" => "rejected").increment(1);
            return Ok(VerifyAuthenticationResponseResponse {
                verified: false,
                session_credential: None,
                jwt: None,
            });
        }

        let claims = SessionClaims::new(&req.user_id, JWT_ISSUER, now_ms);
        let jwt = self.jwt_signer.sign(&claims)?;

        metrics::counter!("auth_verify_total", "outcome" => "accepted").increment(1);

        Ok(VerifyAuthenticationResponseResponse {
            verified: true,
            session_credential: contract_result,
            jwt: Some(jwt),
        })
    }

    pub fn handle_apply_server_lock(
        &self,
        req: ApplyServerLockRequest,
    ) -> AppResult<ApplyServerLockResponse> {
        let (kek_cs_b64u, key_id) = self.shamir.apply_server_lock(&req.kek_c_b64u)?;
        Ok(ApplyServerLockResponse {
            kek_cs_b64u,
            key_id,
        })
    }

    pub fn handle_remove_server_lock(
        &self,
        req: RemoveServerLockRequest,
    ) -> AppResult<RemoveServerLockResponse> {
        let kek_c_b64u = self
            .shamir
            .remove_server_lock(&req.kek_cs_b64u, req.key_id.as_deref())?;
        Ok(RemoveServerLockResponse { kek_c_b64u })
    }

    pub fn key_info(&self) -> KeyInfoResponse {
        KeyInfoResponse {
            current_key_id: self.shamir.current_key_id(),
            grace_key_ids: self.shamir.grace_key_ids(),
        }
    }

    /// Enqueues one function-call transaction on the shared nonce-ordered
    /// queue. The nonce and block hash are fetched inside the closure, at
    /// the moment the queue worker actually runs it, never at enqueue time.
    async fn run_function_call(
        &self,
        method_name: &str,
        args: Value,
        deposit: u128,
    ) -> AppResult<chain::BroadcastOutcome> {
        let rpc = self.rpc.clone();
        let signer = self.signer.clone();
        let receiver_id = self.webauthn_contract_id.clone();
        let method_name = method_name.to_string();
        let gas = self.gas;

        self.queue
            .enqueue(move || {
                Box::pin(async move {
                    let access_key = rpc
                        .view_access_key(signer.account_id(), &signer.public_key_b58())
                        .await?;

                    let transaction = Transaction {
                        signer_id: AccountId(signer.account_id().to_string()),
                        public_key: signer.public_key(),
                        nonce: access_key.nonce + 1,
                        receiver_id: AccountId(receiver_id),
                        block_hash: access_key.block_hash,
                        actions: vec![Action::FunctionCall(Box::new(FunctionCallAction {
                            method_name,
                            args: chain::json_args(&args),
                            gas,
                            deposit,
                        }))],
                    };

                    let signed = signer.sign_transaction(transaction)?;
                    let bytes = signed.to_borsh_bytes()?;
                    rpc.broadcast_tx_commit(&bytes).await
                })
            })
            .await
    }
}
