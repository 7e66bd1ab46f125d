//! The cosigner-role handler: what a cosigner process does with a verified
//! `coordinatorGrant` plus a round-1 or round-2 request. Grounded on this
//! codebase's former `MpcSigner` (anti-replay via a hash set of signed
//! payloads) — here the anti-replay property instead falls naturally out of
//! `signingSessionId` take-once removal from the pending-round cache, since
//! a cosigner that has already answered round-2 for a session has nothing
//! left to answer with.

use crate::coordinator::{grant, transport};
use crate::error::{AppError, AppResult};
use crate::keygen::Keygen;
use crate::models::{CommitmentPair, GrantPayload};
use crate::mpc::frost_bridge::{self, KeyPackage, SigningNonces};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64U;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Deserialize)]
pub struct Round1Request {
    #[serde(rename = "signingSessionId")]
    pub signing_session_id: String,
    #[serde(rename = "coordinatorGrant")]
    pub coordinator_grant: String,
    #[serde(rename = "clientCommitments")]
    pub client_commitments: CommitmentPair,
}

#[derive(Debug, Serialize)]
pub struct Round1Response {
    #[serde(rename = "relayerCommitments")]
    pub relayer_commitments: CommitmentPair,
    #[serde(rename = "relayerVerifyingShareB64u")]
    pub relayer_verifying_share_b64u: String,
}

#[derive(Debug, Deserialize)]
pub struct Round2Request {
    #[serde(rename = "signingSessionId")]
    pub signing_session_id: String,
    #[serde(rename = "coordinatorGrant")]
    pub coordinator_grant: String,
    #[serde(rename = "relayerCommitments")]
    pub relayer_commitments: CommitmentPair,
    #[allow(dead_code)]
    #[serde(rename = "groupPublicKey")]
    pub group_public_key: String,
}

#[derive(Debug, Serialize)]
pub struct Round2Response {
    #[serde(rename = "relayerSignatureShareB64u")]
    pub relayer_signature_share_b64u: String,
}

/// Everything this process needs to remember between round-1 and round-2
/// for one `signingSessionId`, kept in process memory only — nonces must
/// never be persisted or reused. Removed (take-once) on round-2.
struct PendingRound {
    nonces: SigningNonces,
    client_commitments: CommitmentPair,
    key_package: KeyPackage,
    message: Vec<u8>,
}

pub struct CosignerHandler {
    cosigner_id: String,
    keygen: Keygen,
    shared_secret: Vec<u8>,
    client_participant_id: u16,
    relayer_participant_id: u16,
    pending: Mutex<HashMap<String, PendingRound>>,
}

impl CosignerHandler {
    pub fn new(
        cosigner_id: impl Into<String>,
        keygen: Keygen,
        shared_secret: Vec<u8>,
        client_participant_id: u16,
        relayer_participant_id: u16,
    ) -> Self {
        Self {
            cosigner_id: cosigner_id.into(),
            keygen,
            shared_secret,
            client_participant_id,
            relayer_participant_id,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Handles `/internal/sign/init` and `/internal/cosign/init`: verifies
    /// the grant, resolves this cosigner's own share of the relayer key for
    /// the session's account via `Keygen`, commits fresh FROST nonces, and
    /// stashes them for round-2.
    pub async fn handle_round1(
        &self,
        req: Round1Request,
        now_ms: i64,
    ) -> AppResult<Round1Response> {
        // A single grant is minted once per round and shared across every
        // cosigner probed in that round (see `coordinator::transport`'s
        // `round1_fleet`/`round2_fleet`, which pass one grant string to
        // every peer) — `cosignerId` inside the payload is informational,
        // not a per-recipient binding, so it is not enforced here.
        let payload = grant::verify(&req.coordinator_grant, &self.shared_secret, now_ms)?;
        let mpc_session = match &payload {
            GrantPayload::CosignerGrantV1 { mpc_session, .. } => mpc_session,
            GrantPayload::CoordinatorGrantV1 { mpc_session, .. } => mpc_session,
        };

        if mpc_session.is_expired(now_ms) {
            return Err(AppError::SessionExpired);
        }

        let record = self
            .keygen
            .resolve(
                &mpc_session.relayer_key_id,
                &mpc_session.user_id,
                &mpc_session.rp_id,
                &mpc_session.client_verifying_share_b64u,
            )
            .await?;

        let group_verifying_key_b64u = transport::combine_points_b64u(
            &mpc_session.client_verifying_share_b64u,
            &record.relayer_verifying_share_b64u,
        )?;

        let key_package = frost_bridge::key_package(
            self.relayer_participant_id,
            &record.relayer_signing_share_b64u,
            &group_verifying_key_b64u,
        )?;

        let round1 = frost_bridge::commit(&key_package)?;
        let message = B64U
            .decode(&mpc_session.signing_digest_b64u)
            .map_err(|e| AppError::InvalidBody(format!("bad signingDigestB64u: {e}")))?;

        tracing::debug!(
            cosigner_id = %self.cosigner_id,
            signing_session_id = %req.signing_session_id,
            "round-1 commit"
        );

        let response = Round1Response {
            relayer_commitments: round1.commitments.clone(),
            relayer_verifying_share_b64u: record.relayer_verifying_share_b64u,
        };

        self.pending.lock().expect("pending lock poisoned").insert(
            req.signing_session_id,
            PendingRound {
                nonces: round1.nonces,
                client_commitments: req.client_commitments,
                key_package,
                message,
            },
        );

        Ok(response)
    }

    /// Handles `/internal/sign/finalize` and `/internal/cosign/finalize`:
    /// verifies the grant, recovers the nonces stashed in round-1 (removing
    /// them so a session can never be answered twice), and produces this
    /// cosigner's Ed25519 signature share. `relayerCommitments` here is
    /// already the combined point across the whole accepted cosigner set
    /// (summed by the coordinator after round-1), not this cosigner's own.
    pub async fn handle_round2(
        &self,
        req: Round2Request,
        now_ms: i64,
    ) -> AppResult<Round2Response> {
        let payload = grant::verify(&req.coordinator_grant, &self.shared_secret, now_ms)?;
        if let GrantPayload::CosignerGrantV1 {
            signing_session_id: Some(expected),
            ..
        } = &payload
        {
            if expected != &req.signing_session_id {
                return Err(AppError::InvalidGrant(
                    "grant signingSessionId does not match request".into(),
                ));
            }
        }

        let pending = {
            let mut guard = self.pending.lock().expect("pending lock poisoned");
            guard.remove(&req.signing_session_id)
        };
        let pending = pending.ok_or(AppError::SessionConsumed)?;

        let signing_package = frost_bridge::signing_package(
            &[
                (self.client_participant_id, pending.client_commitments),
                (self.relayer_participant_id, req.relayer_commitments),
            ],
            &pending.message,
        )?;

        let share_b64u =
            frost_bridge::sign_share(&signing_package, &pending.nonces, &pending.key_package)?;

        Ok(Round2Response {
            relayer_signature_share_b64u: share_b64u,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShareMode;
    use crate::coordinator::grant as grant_mod;
    use crate::kv::mem::InMemoryKv;
    use crate::models::MpcSession;
    use crate::store::KeyStore;
    use std::sync::Arc;

    fn keygen() -> Keygen {
        Keygen::new(
            ShareMode::Derived,
            KeyStore::new(Arc::new(InMemoryKv::new()), "threshold-ed25519:key:"),
            Some([9u8; 32]),
        )
    }

    fn client_point_b64u(scalar_seed: u64) -> String {
        use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
        use curve25519_dalek::scalar::Scalar;
        B64U.encode((&ED25519_BASEPOINT_TABLE * &Scalar::from(scalar_seed)).compress().to_bytes())
    }

    fn expected_relayer_key_id(secret: &[u8; 32], salt: &str) -> String {
        use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
        use curve25519_dalek::scalar::Scalar;
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), secret);
        let mut okm = [0u8; 32];
        hk.expand(b"threshold-ed25519-relayer-share", &mut okm).unwrap();
        let scalar = Scalar::from_bytes_mod_order(okm);
        B64U.encode((&ED25519_BASEPOINT_TABLE * &scalar).compress().to_bytes())
    }

    fn sample_session(relayer_key_id: String, client_verifying_share_b64u: String) -> MpcSession {
        MpcSession {
            expires_at_ms: i64::MAX,
            relayer_key_id,
            purpose: "near_tx".into(),
            intent_digest_b64u: B64U.encode(b"intent"),
            signing_digest_b64u: B64U.encode([7u8; 32]),
            user_id: "alice.near".into(),
            rp_id: "example.com".into(),
            client_verifying_share_b64u,
            participant_ids: vec![1, 2],
        }
    }

    #[tokio::test]
    async fn round1_resolves_key_material_and_stashes_nonces() {
        let secret = [9u8; 32];
        let client_verifying_share_b64u = client_point_b64u(5);
        let salt = format!("alice.near:example.com:{client_verifying_share_b64u}");
        let relayer_key_id = expected_relayer_key_id(&secret, &salt);
        let session = sample_session(relayer_key_id, client_verifying_share_b64u);

        let handler = CosignerHandler::new(
            "2",
            keygen(),
            b"shared-secret-bytes-123456789012".to_vec(),
            1,
            2,
        );

        let grant_payload = GrantPayload::CosignerGrantV1 {
            cosigner_id: "2".into(),
            mpc_session_id: "mpc-1".into(),
            mpc_session: session,
            signing_session_id: None,
            expires_at_ms: i64::MAX,
        };
        let token = grant_mod::mint(&grant_payload, b"shared-secret-bytes-123456789012").unwrap();

        let round1_req = Round1Request {
            signing_session_id: "sess-1".into(),
            coordinator_grant: token,
            client_commitments: CommitmentPair {
                hiding: client_point_b64u(11),
                binding: client_point_b64u(13),
            },
        };

        let response = handler.handle_round1(round1_req, 0).await.unwrap();
        assert!(!response.relayer_verifying_share_b64u.is_empty());
        assert_eq!(handler.pending.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn round2_without_prior_round1_is_session_consumed() {
        let handler = CosignerHandler::new(
            "2",
            keygen(),
            b"shared-secret-bytes-123456789012".to_vec(),
            1,
            2,
        );
        let session = sample_session(
            expected_relayer_key_id(&[9u8; 32], "salt"),
            client_point_b64u(5),
        );
        let grant_payload = GrantPayload::CosignerGrantV1 {
            cosigner_id: "2".into(),
            mpc_session_id: "mpc-1".into(),
            mpc_session: session,
            signing_session_id: Some("sess-never-started".into()),
            expires_at_ms: i64::MAX,
        };
        let token = grant_mod::mint(&grant_payload, b"shared-secret-bytes-123456789012").unwrap();

        let result = handler
            .handle_round2(
                Round2Request {
                    signing_session_id: "sess-never-started".into(),
                    coordinator_grant: token,
                    relayer_commitments: CommitmentPair {
                        hiding: client_point_b64u(1),
                        binding: client_point_b64u(2),
                    },
                    group_public_key: client_point_b64u(3),
                },
                0,
            )
            .await;
        assert!(matches!(result, Err(AppError::SessionConsumed)));
    }
}
