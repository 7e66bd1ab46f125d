//! Narrow NEAR JSON-RPC client: access-key view, transaction signing, and
//! `broadcast_tx_commit` outcome parsing. Grounded on this codebase's former
//! `blockchain/evm.rs` (`rpc_call` JSON-RPC helper, typed request/response
//! structs, error surfacing) but speaking NEAR's nonce/borsh transaction
//! model instead of an EVM one. Transaction encoding follows the borsh
//! layout and hash-then-sign flow used by NEAR light clients (`Transaction`,
//! `SignedTransaction`, `Action::FunctionCall`), truncated to the variants
//! this service ever constructs, but keeping the real enum's discriminant
//! order so the bytes stay wire-compatible.

use crate::config::Config;
use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::{STANDARD as B64, URL_SAFE_NO_PAD as B64U};
use base64::Engine;
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct AccountId(pub String);

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct PublicKey {
    pub key_type: u8,
    pub key_data: [u8; 32],
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct Signature {
    pub key_type: u8,
    pub signature_data: [u8; 64],
}

#[derive(Debug, Clone, Copy, BorshSerialize, BorshDeserialize)]
pub struct CryptoHash(pub [u8; 32]);

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct FunctionCallAction {
    pub method_name: String,
    pub args: Vec<u8>,
    pub gas: u64,
    pub deposit: u128,
}

/// Narrowed to the variants this relayer ever constructs. Declaration order
/// mirrors NEAR's real `Action` enum so the borsh discriminant for
/// `FunctionCall` (2) matches the wire protocol even though `CreateAccount`
/// and `DeployContract` are never built here.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub enum Action {
    CreateAccount,
    DeployContract { code: Vec<u8> },
    FunctionCall(Box<FunctionCallAction>),
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub signer_id: AccountId,
    pub public_key: PublicKey,
    pub nonce: u64,
    pub receiver_id: AccountId,
    pub block_hash: CryptoHash,
    pub actions: Vec<Action>,
}

impl Transaction {
    /// SHA-256 over the borsh-serialized transaction, the message NEAR
    /// signs and verifies against.
    pub fn hash(&self) -> AppResult<CryptoHash> {
        let bytes = borsh::to_vec(self)
            .map_err(|e| AppError::Internal(format!("transaction borsh encode: {e}")))?;
        let digest = Sha256::digest(&bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(CryptoHash(out))
    }
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}

impl SignedTransaction {
    pub fn to_borsh_bytes(&self) -> AppResult<Vec<u8>> {
        borsh::to_vec(self).map_err(|e| AppError::Internal(format!("signed tx borsh encode: {e}")))
    }
}

/// Holds the relayer's NEAR account id and Ed25519 signing key, parsed from
/// `RELAYER_PRIVATE_KEY` (`ed25519:<base58 64-byte secret+public>`).
pub struct RelayerSigner {
    account_id: String,
    signing_key: SigningKey,
}

impl RelayerSigner {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let raw = config
            .relayer_private_key
            .strip_prefix("ed25519:")
            .ok_or_else(|| {
                AppError::InvalidKeyFormat("RELAYER_PRIVATE_KEY must start with ed25519:".into())
            })?;
        let bytes = bs58::decode(raw)
            .into_vec()
            .map_err(|e| AppError::InvalidKeyFormat(format!("RELAYER_PRIVATE_KEY base58: {e}")))?;
        if bytes.len() != 64 {
            return Err(AppError::InvalidKeyFormat(
                "RELAYER_PRIVATE_KEY must decode to 64 bytes (seed || public key)".into(),
            ));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        Ok(Self {
            account_id: config.relayer_account_id.clone(),
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key_type: 0,
            key_data: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Base58, `ed25519:`-prefixed public key, the form NEAR RPC's
    /// `view_access_key` expects.
    pub fn public_key_b58(&self) -> String {
        format!(
            "ed25519:{}",
            bs58::encode(self.signing_key.verifying_key().to_bytes()).into_string()
        )
    }

    pub fn sign_transaction(&self, transaction: Transaction) -> AppResult<SignedTransaction> {
        let hash = transaction.hash()?;
        let signature_data = self.signing_key.sign(&hash.0).to_bytes();
        Ok(SignedTransaction {
            transaction,
            signature: Signature {
                key_type: 0,
                signature_data,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct AccessKeyView {
    pub nonce: u64,
    pub block_hash: CryptoHash,
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastOutcome {
    pub transaction_hash: String,
    pub logs: Vec<String>,
    pub success_value: Option<Vec<u8>>,
}

/// Thin JSON-RPC client against a single NEAR RPC endpoint. No retries: the
/// enqueuing side (`auth::queue`) owns the only retry-relevant ordering
/// guarantee this service makes.
pub struct NearRpcClient {
    http: reqwest::Client,
    rpc_url: String,
}

impl NearRpcClient {
    pub fn new(http: reqwest::Client, rpc_url: String) -> Self {
        Self { http, rpc_url }
    }

    async fn call(&self, body: &Value) -> AppResult<Value> {
        let response = self
            .http
            .post(&self.rpc_url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::BackendUnavailable(format!("near rpc: {e}")))?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| AppError::BackendUnavailable(format!("near rpc response: {e}")))?;
        if let Some(error) = parsed.get("error") {
            return Err(classify_failure_value(error).unwrap_or_else(|| {
                AppError::BackendUnavailable(format!("near rpc error: {error}"))
            }));
        }
        Ok(parsed)
    }

    pub async fn view_access_key(
        &self,
        account_id: &str,
        public_key_b58: &str,
    ) -> AppResult<AccessKeyView> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "dontcare",
            "method": "query",
            "params": {
                "request_type": "view_access_key",
                "finality": "final",
                "account_id": account_id,
                "public_key": public_key_b58,
            }
        });
        let response = self.call(&body).await?;
        let result = response.get("result").ok_or_else(|| {
            AppError::BackendUnavailable("near rpc: missing result".into())
        })?;
        let nonce = result
            .get("nonce")
            .and_then(Value::as_u64)
            .ok_or_else(|| AppError::BackendUnavailable("near rpc: missing nonce".into()))?;
        let block_hash_b58 = result
            .get("block_hash")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BackendUnavailable("near rpc: missing block_hash".into()))?;
        let block_hash_bytes = bs58::decode(block_hash_b58)
            .into_vec()
            .map_err(|e| AppError::BackendUnavailable(format!("near rpc: bad block_hash: {e}")))?;
        if block_hash_bytes.len() != 32 {
            return Err(AppError::BackendUnavailable(
                "near rpc: block_hash is not 32 bytes".into(),
            ));
        }
        let mut block_hash = [0u8; 32];
        block_hash.copy_from_slice(&block_hash_bytes);
        Ok(AccessKeyView {
            nonce,
            block_hash: CryptoHash(block_hash),
        })
    }

    pub async fn broadcast_tx_commit(&self, signed_tx_bytes: &[u8]) -> AppResult<BroadcastOutcome> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "dontcare",
            "method": "broadcast_tx_commit",
            "params": [B64.encode(signed_tx_bytes)],
        });
        let response = self.call(&body).await?;
        let result = response.get("result").ok_or_else(|| {
            AppError::BackendUnavailable("near rpc: missing result".into())
        })?;
        parse_outcome(result)
    }
}

/// Walks a `broadcast_tx_commit` result: surfaces a top-level or
/// receipt-level `Failure`, classified against the recognized markers;
/// otherwise collects logs and the `SuccessValue`.
fn parse_outcome(result: &Value) -> AppResult<BroadcastOutcome> {
    if let Some(failure) = result
        .pointer("/status/Failure")
        .or_else(|| result.pointer("/transaction_outcome/outcome/status/Failure"))
    {
        return Err(classify_failure_value(failure)
            .unwrap_or_else(|| AppError::ContractError(failure.to_string())));
    }

    let mut logs = Vec::new();
    if let Some(tx_logs) = result.pointer("/transaction_outcome/outcome/logs").and_then(Value::as_array) {
        logs.extend(tx_logs.iter().filter_map(Value::as_str).map(str::to_string));
    }
    if let Some(receipts) = result.get("receipts_outcome").and_then(Value::as_array) {
        for receipt in receipts {
            if let Some(failure) = receipt.pointer("/outcome/status/Failure") {
                return Err(classify_failure_value(failure)
                    .unwrap_or_else(|| AppError::ContractError(failure.to_string())));
            }
            if let Some(receipt_logs) = receipt.pointer("/outcome/logs").and_then(Value::as_array) {
                logs.extend(receipt_logs.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }
    }

    if let Some(marker) = logs.iter().find_map(|log| classify_failure_text(log)) {
        return Err(marker);
    }

    let transaction_hash = result
        .pointer("/transaction_outcome/id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let success_value = result
        .pointer("/status/SuccessValue")
        .and_then(Value::as_str)
        .map(|b64| B64.decode(b64))
        .transpose()
        .map_err(|e| AppError::BackendUnavailable(format!("near rpc: bad SuccessValue: {e}")))?;

    Ok(BroadcastOutcome {
        transaction_hash,
        logs,
        success_value,
    })
}

/// Maps a structured `Failure` JSON value against the recognized markers in
/// spec §4.7's error taxonomy.
fn classify_failure_value(failure: &Value) -> Option<AppError> {
    classify_failure_text(&failure.to_string())
}

fn classify_failure_text(text: &str) -> Option<AppError> {
    if text.contains("AccountAlreadyExists") {
        Some(AppError::AccountExists(text.to_string()))
    } else if text.contains("AccountDoesNotExist") {
        Some(AppError::RefAccountMissing(text.to_string()))
    } else if text.contains("InsufficientStake") {
        Some(AppError::InsufficientStake)
    } else if text.contains("LackBalanceForState") {
        Some(AppError::InsufficientBalance)
    } else if text.contains("GuestPanic") || text.contains("Cannot deserialize the contract state") {
        Some(AppError::ContractError(text.to_string()))
    } else {
        None
    }
}

/// Base64url-decodes a signing digest embedded in an intent, used by
/// `auth::service` when it needs the raw bytes of a contract call's JSON
/// return value.
pub fn decode_success_json(outcome: &BroadcastOutcome) -> AppResult<Option<Value>> {
    match &outcome.success_value {
        Some(bytes) => {
            let value: Value = serde_json::from_slice(bytes)
                .map_err(|e| AppError::ContractError(format!("contract return value: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Encodes function-call `args` the way this service always calls contracts:
/// a single JSON object, UTF-8 bytes.
pub fn json_args(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("serde_json::Value always serializes")
}

pub fn b64u_encode(bytes: impl AsRef<[u8]>) -> String {
    B64U.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> RelayerSigner {
        let signing_key = SigningKey::from_bytes(&[3u8; 32]);
        let mut combined = signing_key.to_bytes().to_vec();
        combined.extend_from_slice(&signing_key.verifying_key().to_bytes());
        let config = Config {
            relayer_private_key: format!("ed25519:{}", bs58::encode(&combined).into_string()),
            relayer_account_id: "relayer.testnet".into(),
            ..test_config()
        };
        RelayerSigner::from_config(&config).unwrap()
    }

    fn test_config() -> Config {
        Config {
            host: "0.0.0.0".into(),
            port: 8000,
            relayer_account_id: String::new(),
            relayer_private_key: String::new(),
            webauthn_contract_id: "webauthn.testnet".into(),
            near_rpc_url: "https://rpc.testnet.near.org".into(),
            network_id: "testnet".into(),
            account_initial_balance: "0".into(),
            create_account_and_register_gas: "100".into(),
            shamir_p_b64u: String::new(),
            shamir_e_s_b64u: String::new(),
            shamir_d_s_b64u: String::new(),
            shamir_grace_ttl_secs: None,
            node_role: crate::config::NodeRole::Coordinator,
            share_mode: crate::config::ShareMode::Derived,
            master_secret_b64u: None,
            coordinator_shared_secret_b64u: String::new(),
            cosigners: vec![],
            cosigner_threshold: 1,
            client_participant_id: 1,
            relayer_participant_id: 2,
            kv_backend: crate::config::KvBackendKind::InMemory,
            keystore_prefix: "key:".into(),
            session_prefix: "session:".into(),
            auth_prefix: "auth:".into(),
            mpc_session_ttl_ms: 60_000,
            signing_session_ttl_ms: 60_000,
            auth_session_ttl_ms: 300_000,
            auth_session_max_uses: 5,
            rate_limit_signing_per_min: 30,
            rate_limit_register_per_min: 10,
            jwt_secret: "test-secret-at-least-32-bytes!!".into(),
            jwt_expiry_hours: 24,
            cors_origins: vec![],
        }
    }

    #[test]
    fn rejects_non_ed25519_prefix() {
        let config = Config {
            relayer_private_key: "secp256k1:abc".into(),
            ..test_config()
        };
        assert!(matches!(
            RelayerSigner::from_config(&config),
            Err(AppError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn signing_a_transaction_produces_a_verifiable_signature() {
        let signer = signer();
        let tx = Transaction {
            signer_id: AccountId(signer.account_id().to_string()),
            public_key: signer.public_key(),
            nonce: 1,
            receiver_id: AccountId("webauthn.testnet".into()),
            block_hash: CryptoHash([9u8; 32]),
            actions: vec![Action::FunctionCall(Box::new(FunctionCallAction {
                method_name: "create_account_and_register_user".into(),
                args: json_args(&json!({"new_account_id": "alice.testnet"})),
                gas: 100_000_000_000_000,
                deposit: 0,
            }))],
        };
        let hash = tx.hash().unwrap();
        let signed = signer.sign_transaction(tx).unwrap();
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&signed.transaction.public_key.key_data).unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&signed.signature.signature_data);
        assert!(verifying_key.verify_strict(&hash.0, &signature).is_ok());
    }

    #[test]
    fn classifies_recognized_failure_markers() {
        assert!(matches!(
            classify_failure_text("Action #0: AccountAlreadyExists { account_id: \"a\" }"),
            Some(AppError::AccountExists(_))
        ));
        assert!(matches!(
            classify_failure_text("AccountDoesNotExist"),
            Some(AppError::RefAccountMissing(_))
        ));
        assert!(matches!(
            classify_failure_text("InsufficientStake"),
            Some(AppError::InsufficientStake)
        ));
        assert!(matches!(
            classify_failure_text("LackBalanceForState"),
            Some(AppError::InsufficientBalance)
        ));
        assert!(matches!(
            classify_failure_text("Smart contract panicked: GuestPanic"),
            Some(AppError::ContractError(_))
        ));
        assert!(classify_failure_text("nothing recognized here").is_none());
    }

    #[test]
    fn parse_outcome_extracts_success_value_and_logs() {
        let result = json!({
            "status": { "SuccessValue": B64.encode(b"{\"verified\":true}") },
            "transaction_outcome": {
                "id": "abc123",
                "outcome": { "logs": ["log one"] }
            },
            "receipts_outcome": [
                { "outcome": { "logs": ["log two"], "status": { "SuccessValue": "" } } }
            ]
        });
        let outcome = parse_outcome(&result).unwrap();
        assert_eq!(outcome.transaction_hash, "abc123");
        assert_eq!(outcome.logs, vec!["log one", "log two"]);
        let value = decode_success_json(&outcome).unwrap().unwrap();
        assert_eq!(value["verified"], true);
    }

    #[test]
    fn parse_outcome_surfaces_receipt_failure() {
        let result = json!({
            "status": {},
            "transaction_outcome": { "id": "x", "outcome": { "logs": [] } },
            "receipts_outcome": [
                { "outcome": { "logs": [], "status": { "Failure": { "ActionError": { "kind": "AccountAlreadyExists" } } } } }
            ]
        });
        assert!(matches!(parse_outcome(&result), Err(AppError::AccountExists(_))));
    }
}
