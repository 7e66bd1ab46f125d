//! Persisted record shapes for the threshold-signing and key-unlock
//! service. Every record round-trips through `serde_json` with a fixed
//! field order and is validated on read: an unknown or missing required
//! field is treated as an absent record rather than a partial one.

use serde::{Deserialize, Serialize};

/// Per-`relayerKeyId` signing/verifying share record. The private share is
/// never serialized into a response body or a log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerKeyRecord {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "relayerSigningShareB64u")]
    pub relayer_signing_share_b64u: String,
    #[serde(rename = "relayerVerifyingShareB64u")]
    pub relayer_verifying_share_b64u: String,
}

/// A WebAuthn-verified intent, waiting to be consumed by `sign/init`.
/// Take-once: the session store deletes this record atomically on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpcSession {
    #[serde(rename = "expiresAtMs")]
    pub expires_at_ms: i64,
    #[serde(rename = "relayerKeyId")]
    pub relayer_key_id: String,
    pub purpose: String,
    #[serde(rename = "intentDigestB64u")]
    pub intent_digest_b64u: String,
    #[serde(rename = "signingDigestB64u")]
    pub signing_digest_b64u: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "clientVerifyingShareB64u")]
    pub client_verifying_share_b64u: String,
    #[serde(rename = "participantIds")]
    pub participant_ids: Vec<u16>,
}

impl MpcSession {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// A single round-1 commitment pair (hiding, binding), little-endian
/// 32-byte Ed25519 scalars/points encoded as base64url.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentPair {
    pub hiding: String,
    pub binding: String,
}

/// Round-1 transcript, waiting to be consumed by `sign/finalize`.
/// Take-once, same semantics as `MpcSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSession {
    #[serde(rename = "expiresAtMs")]
    pub expires_at_ms: i64,
    #[serde(rename = "mpcSessionId")]
    pub mpc_session_id: String,
    #[serde(rename = "relayerKeyId")]
    pub relayer_key_id: String,
    #[serde(rename = "signingDigestB64u")]
    pub signing_digest_b64u: String,
    #[serde(rename = "participantIds")]
    pub participant_ids: Vec<u16>,
    #[serde(rename = "commitmentsById")]
    pub commitments_by_id: std::collections::BTreeMap<String, CommitmentPair>,
    #[serde(rename = "relayerVerifyingSharesById")]
    pub relayer_verifying_shares_by_id: std::collections::BTreeMap<String, String>,
    #[serde(rename = "coordinatorTranscript")]
    pub coordinator_transcript: Vec<String>,
    /// `clientVerifyingShare + Σ relayerVerifyingShare` — the point the
    /// final aggregated signature verifies against.
    #[serde(rename = "groupPublicKeyB64u")]
    pub group_public_key_b64u: String,
    /// The `MpcSession` this signing session was created from, retained so
    /// round-2 `coordinatorGrant`s can re-embed it after round-1 already
    /// consumed the original record.
    #[serde(rename = "mpcSessionSnapshot")]
    pub mpc_session_snapshot: MpcSession,
    /// Cosigner ids selected (and accepted) during round-1; round-2 is
    /// fanned out to exactly this set, never recomputed.
    #[serde(rename = "selectedCosignerIds")]
    pub selected_cosigner_ids: Vec<String>,
}

impl SigningSession {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// A warm auth session: bounded reuse of one WebAuthn verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSessionRecord {
    #[serde(rename = "tokenId")]
    pub token_id: String,
    #[serde(rename = "relayerKeyId")]
    pub relayer_key_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "intentDigestB64u")]
    pub intent_digest_b64u: String,
    #[serde(rename = "usesRemaining")]
    pub uses_remaining: u32,
    #[serde(rename = "expiresAtMs")]
    pub expires_at_ms: i64,
}

impl AuthSessionRecord {
    pub fn is_usable(&self, now_ms: i64) -> bool {
        self.uses_remaining > 0 && now_ms < self.expires_at_ms
    }
}

/// Payload embedded in a `coordinatorGrant` token (before HMAC framing).
/// `typ` strictly selects the RPC kind the receiving cosigner will perform;
/// a mismatched `typ` is rejected even if the MAC is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "typ")]
pub enum GrantPayload {
    #[serde(rename = "cosigner_grant_v1")]
    CosignerGrantV1 {
        #[serde(rename = "cosignerId")]
        cosigner_id: String,
        #[serde(rename = "mpcSessionId")]
        mpc_session_id: String,
        #[serde(rename = "mpcSession")]
        mpc_session: MpcSession,
        #[serde(rename = "signingSessionId")]
        signing_session_id: Option<String>,
        #[serde(rename = "expiresAtMs")]
        expires_at_ms: i64,
    },
    /// 2-party legacy grant, predating the cosigner-fleet fan-out.
    #[serde(rename = "coordinator_grant_v1")]
    CoordinatorGrantV1 {
        #[serde(rename = "mpcSessionId")]
        mpc_session_id: String,
        #[serde(rename = "mpcSession")]
        mpc_session: MpcSession,
        #[serde(rename = "signingSessionId")]
        signing_session_id: Option<String>,
        #[serde(rename = "expiresAtMs")]
        expires_at_ms: i64,
    },
}

impl GrantPayload {
    pub fn expires_at_ms(&self) -> i64 {
        match self {
            GrantPayload::CosignerGrantV1 { expires_at_ms, .. } => *expires_at_ms,
            GrantPayload::CoordinatorGrantV1 { expires_at_ms, .. } => *expires_at_ms,
        }
    }
}

/// An opaque unit of work in the nonce-ordered transaction queue.
#[derive(Debug, Clone)]
pub struct TransactionJob {
    pub description: String,
}
