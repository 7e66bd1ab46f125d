//! Orchestrates the full signing flow: `preauthorize` → `sign_init` →
//! `sign_finalize`. Grounded on this codebase's former `MpcCoordinator`
//! session-lifecycle methods, generalized from raw byte-share bookkeeping to
//! FROST commitment/signature-share aggregation over
//! [`crate::coordinator::transport`] and [`crate::mpc::frost_bridge`].

use crate::config::ShareMode;
use crate::coordinator::{grant, transport::CoordinatorTransport};
use crate::error::{AppError, AppResult};
use crate::keygen::Keygen;
use crate::models::{AuthSessionRecord, CommitmentPair, GrantPayload, MpcSession, SigningSession};
use crate::mpc::frost_bridge;
use crate::store::{AuthSessionStore, SessionStore};
use crate::utils::crypto::{b64u_decode, b64u_encode};
use crate::webauthn::{IntentClaim, WebAuthnVerifier};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Either a fresh WebAuthn credential to verify, or a warm auth-session
/// token to consume a bounded-reuse verification instead.
pub struct PreauthorizeRequest {
    pub claim: IntentClaim,
    pub client_verifying_share_b64u: String,
    pub credential: Option<serde_json::Value>,
    pub reuse_auth_session_token: Option<String>,
}

pub struct PreauthorizeResponse {
    pub mpc_session_id: String,
    pub signing_digest_b64u: String,
    pub expires_at_ms: i64,
    /// Warm auth-session token minted on a fresh verification, letting the
    /// caller skip re-verification for subsequent signing sessions within
    /// the window. `None` when this call itself consumed one.
    pub auth_session_token: Option<String>,
}

pub struct SignInitResponse {
    pub signing_session_id: String,
    pub participant_ids: Vec<u16>,
    pub commitments_by_id: BTreeMap<String, CommitmentPair>,
    pub relayer_verifying_shares_by_id: BTreeMap<String, String>,
}

pub struct SignFinalizeResponse {
    pub signature: String,
    pub relayer_signature_shares_by_id: BTreeMap<String, String>,
}

pub struct ThresholdSigningService {
    session_store: SessionStore,
    auth_session_store: AuthSessionStore,
    keygen: Keygen,
    transport: CoordinatorTransport,
    webauthn: Arc<dyn WebAuthnVerifier>,
    shared_secret: Vec<u8>,
    client_participant_id: u16,
    relayer_participant_id: u16,
    mpc_session_ttl_ms: i64,
    signing_session_ttl_ms: i64,
    auth_session_ttl_ms: i64,
    auth_session_max_uses: u32,
}

impl ThresholdSigningService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_store: SessionStore,
        auth_session_store: AuthSessionStore,
        keygen: Keygen,
        transport: CoordinatorTransport,
        webauthn: Arc<dyn WebAuthnVerifier>,
        shared_secret: Vec<u8>,
        client_participant_id: u16,
        relayer_participant_id: u16,
        mpc_session_ttl_ms: i64,
        signing_session_ttl_ms: i64,
        auth_session_ttl_ms: i64,
        auth_session_max_uses: u32,
    ) -> Self {
        Self {
            session_store,
            auth_session_store,
            keygen,
            transport,
            webauthn,
            shared_secret,
            client_participant_id,
            relayer_participant_id,
            mpc_session_ttl_ms,
            signing_session_ttl_ms,
            auth_session_ttl_ms,
            auth_session_max_uses,
        }
    }

    pub async fn preauthorize(
        &self,
        req: PreauthorizeRequest,
        now_ms: i64,
    ) -> AppResult<PreauthorizeResponse> {
        let mut auth_session_token = None;

        if let Some(token) = &req.reuse_auth_session_token {
            let consumed = self.auth_session_store.consume_use(token, now_ms).await?;
            let consumed = consumed.record;
            if consumed.relayer_key_id != req.claim.relayer_key_id
                || consumed.user_id != req.claim.user_id
                || consumed.rp_id != req.claim.rp_id
                || consumed.intent_digest_b64u != req.claim.intent_digest_b64u
            {
                return Err(AppError::Mismatch(
                    "warm auth session does not match intent".into(),
                ));
            }
        } else {
            let credential = req.credential.as_ref().ok_or_else(|| {
                AppError::InvalidBody("missing webauthn credential".into())
            })?;
            self.webauthn.verify_assertion(&req.claim, credential).await?;

            let token_id = Uuid::new_v4().to_string();
            let record = AuthSessionRecord {
                token_id: token_id.clone(),
                relayer_key_id: req.claim.relayer_key_id.clone(),
                user_id: req.claim.user_id.clone(),
                rp_id: req.claim.rp_id.clone(),
                intent_digest_b64u: req.claim.intent_digest_b64u.clone(),
                uses_remaining: self.auth_session_max_uses,
                expires_at_ms: now_ms + self.auth_session_ttl_ms as i64,
            };
            self.auth_session_store
                .put(&record, self.auth_session_ttl_ms)
                .await?;
            auth_session_token = Some(token_id);
        }

        let mpc_session_id = Uuid::new_v4().to_string();
        let mpc_session = MpcSession {
            expires_at_ms: now_ms + self.mpc_session_ttl_ms,
            relayer_key_id: req.claim.relayer_key_id.clone(),
            purpose: req.claim.purpose.clone(),
            intent_digest_b64u: req.claim.intent_digest_b64u.clone(),
            signing_digest_b64u: req.claim.signing_digest_b64u.clone(),
            user_id: req.claim.user_id.clone(),
            rp_id: req.claim.rp_id.clone(),
            client_verifying_share_b64u: req.client_verifying_share_b64u.clone(),
            participant_ids: vec![self.client_participant_id, self.relayer_participant_id],
        };

        self.session_store
            .put_mpc_session(&mpc_session_id, &mpc_session, self.mpc_session_ttl_ms)
            .await?;

        Ok(PreauthorizeResponse {
            mpc_session_id,
            signing_digest_b64u: mpc_session.signing_digest_b64u,
            expires_at_ms: mpc_session.expires_at_ms,
            auth_session_token,
        })
    }

    pub async fn sign_init(
        &self,
        mpc_session_id: &str,
        client_commitments: CommitmentPair,
        now_ms: i64,
    ) -> AppResult<SignInitResponse> {
        let mpc_session = self
            .session_store
            .take_mpc_session(mpc_session_id)
            .await?
            .ok_or(AppError::SessionConsumed)?;

        if mpc_session.is_expired(now_ms) {
            return Err(AppError::SessionExpired);
        }

        // Resolving here only confirms (and, for kv/auto, lazily creates) the
        // relayer's own key material exists; the actual signing share never
        // leaves the cosigner that holds it.
        match self
            .keygen
            .resolve(
                &mpc_session.relayer_key_id,
                &mpc_session.user_id,
                &mpc_session.rp_id,
                &mpc_session.client_verifying_share_b64u,
            )
            .await
        {
            Ok(_) => {}
            Err(AppError::MissingKey(_))
                if matches!(self.keygen.strategy, ShareMode::Kv | ShareMode::Auto) =>
            {
                self.keygen
                    .generate_and_store(&mpc_session.relayer_key_id)
                    .await?;
            }
            Err(e) => return Err(e),
        }

        let signing_session_id = Uuid::new_v4().to_string();
        let round1_grant = grant::mint(
            &GrantPayload::CosignerGrantV1 {
                cosigner_id: "*".into(),
                mpc_session_id: mpc_session_id.to_string(),
                mpc_session: mpc_session.clone(),
                signing_session_id: Some(signing_session_id.clone()),
                expires_at_ms: now_ms + self.signing_session_ttl_ms,
            },
            &self.shared_secret,
        )?;

        let client_id = self.client_participant_id.to_string();
        let relayer_id = self.relayer_participant_id.to_string();

        let (commitments_by_id, relayer_verifying_shares_by_id, selected_cosigner_ids, combined_relayer_verifying_share_b64u) =
            if self.transport.cosigners.len() <= 1 {
                let outcome = self
                    .transport
                    .round1_legacy(&signing_session_id, &round1_grant, &client_commitments)
                    .await?;
                let mut commitments = BTreeMap::new();
                commitments.insert(client_id.clone(), client_commitments.clone());
                commitments.insert(relayer_id.clone(), outcome.commitments);
                let mut shares = BTreeMap::new();
                shares.insert(relayer_id.clone(), outcome.relayer_verifying_share_b64u.clone());
                (commitments, shares, vec![outcome.cosigner_id], outcome.relayer_verifying_share_b64u)
            } else {
                let outcome = self
                    .transport
                    .round1_fleet(&signing_session_id, &round1_grant, &client_commitments)
                    .await?;
                let mut commitments = BTreeMap::new();
                commitments.insert(client_id.clone(), client_commitments.clone());
                commitments.insert(relayer_id.clone(), outcome.combined_commitments);
                let mut shares = BTreeMap::new();
                shares.insert(relayer_id.clone(), outcome.combined_verifying_share_b64u.clone());
                (commitments, shares, outcome.selected_cosigner_ids, outcome.combined_verifying_share_b64u)
            };

        let group_public_key_b64u = crate::coordinator::transport::combine_points_b64u(
            &mpc_session.client_verifying_share_b64u,
            &combined_relayer_verifying_share_b64u,
        )?;

        let signing_session = SigningSession {
            expires_at_ms: now_ms + self.signing_session_ttl_ms,
            mpc_session_id: mpc_session_id.to_string(),
            relayer_key_id: mpc_session.relayer_key_id.clone(),
            signing_digest_b64u: mpc_session.signing_digest_b64u.clone(),
            participant_ids: mpc_session.participant_ids.clone(),
            commitments_by_id: commitments_by_id.clone(),
            relayer_verifying_shares_by_id: relayer_verifying_shares_by_id.clone(),
            coordinator_transcript: vec![format!("round1 cosigners={:?}", selected_cosigner_ids)],
            group_public_key_b64u,
            mpc_session_snapshot: mpc_session.clone(),
            selected_cosigner_ids,
        };

        self.session_store
            .put_signing_session(&signing_session_id, &signing_session, self.signing_session_ttl_ms)
            .await?;

        Ok(SignInitResponse {
            signing_session_id,
            participant_ids: mpc_session.participant_ids,
            commitments_by_id,
            relayer_verifying_shares_by_id,
        })
    }

    pub async fn sign_finalize(
        &self,
        signing_session_id: &str,
        client_signature_share_b64u: &str,
        now_ms: i64,
    ) -> AppResult<SignFinalizeResponse> {
        let signing_session = self
            .session_store
            .take_signing_session(signing_session_id)
            .await?
            .ok_or(AppError::SessionConsumed)?;

        if signing_session.is_expired(now_ms) {
            return Err(AppError::SessionExpired);
        }

        let round2_grant = grant::mint(
            &GrantPayload::CosignerGrantV1 {
                cosigner_id: "*".into(),
                mpc_session_id: signing_session.mpc_session_id.clone(),
                mpc_session: signing_session.mpc_session_snapshot.clone(),
                signing_session_id: Some(signing_session_id.to_string()),
                expires_at_ms: now_ms + self.signing_session_ttl_ms,
            },
            &self.shared_secret,
        )?;

        let relayer_id = self.relayer_participant_id.to_string();
        let client_id = self.client_participant_id.to_string();

        let relayer_commitments = signing_session
            .commitments_by_id
            .get(&relayer_id)
            .cloned()
            .ok_or_else(|| AppError::Internal("signing session missing relayer commitments".into()))?;

        let relayer_share_b64u = if signing_session.selected_cosigner_ids.len() <= 1 {
            self.transport
                .round2_legacy(
                    signing_session_id,
                    &round2_grant,
                    &signing_session.selected_cosigner_ids,
                    &relayer_commitments,
                    &signing_session.group_public_key_b64u,
                )
                .await?
        } else {
            self.transport
                .round2_fleet(
                    signing_session_id,
                    &round2_grant,
                    &signing_session.selected_cosigner_ids,
                    &relayer_commitments,
                    &signing_session.group_public_key_b64u,
                )
                .await?
        };

        let client_commitments = signing_session
            .commitments_by_id
            .get(&client_id)
            .cloned()
            .ok_or_else(|| AppError::Internal("signing session missing client commitments".into()))?;

        let message = b64u_decode(&signing_session.signing_digest_b64u)?;

        let signing_package = frost_bridge::signing_package(
            &[
                (self.client_participant_id, client_commitments),
                (self.relayer_participant_id, relayer_commitments),
            ],
            &message,
        )?;

        let relayer_verifying_share_b64u = signing_session
            .relayer_verifying_shares_by_id
            .get(&relayer_id)
            .cloned()
            .ok_or_else(|| AppError::Internal("signing session missing relayer verifying share".into()))?;

        let pubkey_package = frost_bridge::public_key_package(
            &[
                (
                    self.client_participant_id,
                    signing_session.mpc_session_snapshot.client_verifying_share_b64u.clone(),
                ),
                (self.relayer_participant_id, relayer_verifying_share_b64u),
            ],
            &signing_session.group_public_key_b64u,
        )?;

        let signature = frost_bridge::aggregate(
            &signing_package,
            &[
                (self.client_participant_id, client_signature_share_b64u.to_string()),
                (self.relayer_participant_id, relayer_share_b64u.clone()),
            ],
            &pubkey_package,
        )?;

        if !frost_bridge::verify(pubkey_package.verifying_key(), &message, &signature) {
            return Err(AppError::InvalidSignature);
        }

        let signature_bytes = signature
            .serialize()
            .map_err(|e| AppError::Internal(format!("signature serialize: {e}")))?;

        let mut relayer_signature_shares_by_id = BTreeMap::new();
        relayer_signature_shares_by_id.insert(relayer_id, relayer_share_b64u);

        Ok(SignFinalizeResponse {
            signature: b64u_encode(signature_bytes),
            relayer_signature_shares_by_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::mem::InMemoryKv;
    use crate::mpc::signer::{CosignerHandler, Round1Request, Round2Request};
    use crate::store::KeyStore;
    use crate::webauthn::StaticWebAuthnVerifier;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64U;
    use base64::Engine;
    use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
    use curve25519_dalek::scalar::Scalar;
    use std::time::Duration;

    fn claim(relayer_key_id: &str) -> IntentClaim {
        IntentClaim {
            user_id: "alice.near".into(),
            rp_id: "example.com".into(),
            relayer_key_id: relayer_key_id.into(),
            purpose: "near_tx".into(),
            intent_digest_b64u: B64U.encode(b"intent"),
            signing_digest_b64u: B64U.encode([7u8; 32]),
        }
    }

    fn client_verifying_share_b64u(scalar: &Scalar) -> String {
        B64U.encode((&ED25519_BASEPOINT_TABLE * scalar).compress().to_bytes())
    }

    fn derived_relayer_key_id(secret: &[u8; 32], salt: &str) -> String {
        use hkdf::Hkdf;
        use sha2::Sha256;
        let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), secret);
        let mut okm = [0u8; 32];
        hk.expand(b"threshold-ed25519-relayer-share", &mut okm).unwrap();
        let scalar = Scalar::from_bytes_mod_order(okm);
        B64U.encode((&ED25519_BASEPOINT_TABLE * &scalar).compress().to_bytes())
    }

    fn service(transport: CoordinatorTransport, master_secret: [u8; 32]) -> ThresholdSigningService {
        let kv = Arc::new(InMemoryKv::new());
        ThresholdSigningService::new(
            SessionStore::new(kv.clone(), "threshold-ed25519:session:"),
            AuthSessionStore::new(kv.clone(), "threshold-ed25519:auth:"),
            Keygen::new(
                ShareMode::Derived,
                KeyStore::new(kv, "threshold-ed25519:key:"),
                Some(master_secret),
            ),
            transport,
            Arc::new(StaticWebAuthnVerifier),
            b"shared-secret-bytes-123456789012".to_vec(),
            1,
            2,
            60_000,
            60_000,
            300_000,
            5,
        )
    }

    async fn round1_handler(
        State(handler): State<Arc<CosignerHandler>>,
        Json(req): Json<Round1Request>,
    ) -> Result<Json<crate::mpc::signer::Round1Response>, AppError> {
        handler.handle_round1(req, 0).await.map(Json)
    }

    async fn round2_handler(
        State(handler): State<Arc<CosignerHandler>>,
        Json(req): Json<Round2Request>,
    ) -> Result<Json<crate::mpc::signer::Round2Response>, AppError> {
        handler.handle_round2(req, 0).await.map(Json)
    }

    /// Spins up a real cosigner behind loopback HTTP, exactly like a second
    /// process would be, and drives `preauthorize` → `sign_init` →
    /// `sign_finalize` through it end to end.
    #[tokio::test]
    async fn full_signing_round_trip_through_a_single_cosigner() {
        let master_secret = [9u8; 32];
        let keygen = Keygen::new(
            ShareMode::Derived,
            KeyStore::new(Arc::new(InMemoryKv::new()), "threshold-ed25519:key:"),
            Some(master_secret),
        );
        let handler = Arc::new(CosignerHandler::new(
            "2",
            keygen,
            b"shared-secret-bytes-123456789012".to_vec(),
            1,
            2,
        ));

        let app = Router::new()
            .route("/threshold-ed25519/internal/sign/init", post(round1_handler))
            .route("/threshold-ed25519/internal/sign/finalize", post(round2_handler))
            .with_state(handler);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let transport = CoordinatorTransport::new(
            vec![crate::config::CosignerEndpoint {
                cosigner_id: "2".into(),
                relayer_url: format!("http://{addr}"),
            }],
            1,
            Duration::from_secs(5),
        );
        let service = service(transport, master_secret);

        let client_scalar = Scalar::from(42u64);
        let client_verifying_share = client_verifying_share_b64u(&client_scalar);
        let salt = format!("alice.near:example.com:{client_verifying_share}");
        let relayer_key_id = derived_relayer_key_id(&master_secret, &salt);

        let pre = service
            .preauthorize(
                PreauthorizeRequest {
                    claim: claim(&relayer_key_id),
                    client_verifying_share_b64u: client_verifying_share.clone(),
                    credential: Some(serde_json::json!({"verified": true})),
                    reuse_auth_session_token: None,
                },
                0,
            )
            .await
            .unwrap();
        assert!(pre.auth_session_token.is_some());

        // Client-side round-1: fresh nonces against a `KeyPackage` built from
        // the client's own additive share.
        let group_verifying_key_b64u = crate::coordinator::transport::combine_points_b64u(
            &client_verifying_share,
            &derived_relayer_verifying_share(&master_secret, &salt),
        )
        .unwrap();
        let client_key_package = frost_bridge::key_package(
            1,
            &B64U.encode(client_scalar.to_bytes()),
            &group_verifying_key_b64u,
        )
        .unwrap();
        let client_round1 = frost_bridge::commit(&client_key_package).unwrap();

        let init = service
            .sign_init(&pre.mpc_session_id, client_round1.commitments.clone(), 0)
            .await
            .unwrap();
        assert_eq!(init.participant_ids, vec![1, 2]);
        assert!(init.commitments_by_id.contains_key("2"));

        let signing_package = frost_bridge::signing_package(
            &[
                (1, init.commitments_by_id["1"].clone()),
                (2, init.commitments_by_id["2"].clone()),
            ],
            &B64U.decode(&pre.signing_digest_b64u).unwrap(),
        )
        .unwrap();
        let client_share = frost_bridge::sign_share(
            &signing_package,
            &client_round1.nonces,
            &client_key_package,
        )
        .unwrap();

        let finalize = service
            .sign_finalize(&init.signing_session_id, &client_share, 0)
            .await
            .unwrap();
        assert!(!finalize.signature.is_empty());
        assert!(finalize.relayer_signature_shares_by_id.contains_key("2"));

        // Session is consumed: a second finalize call must fail.
        let second = service.sign_finalize(&init.signing_session_id, &client_share, 0).await;
        assert!(matches!(second, Err(AppError::SessionConsumed)));
    }

    fn derived_relayer_verifying_share(secret: &[u8; 32], salt: &str) -> String {
        use hkdf::Hkdf;
        use sha2::Sha256;
        let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), secret);
        let mut okm = [0u8; 32];
        hk.expand(b"threshold-ed25519-relayer-share", &mut okm).unwrap();
        let scalar = Scalar::from_bytes_mod_order(okm);
        B64U.encode((&ED25519_BASEPOINT_TABLE * &scalar).compress().to_bytes())
    }

    #[tokio::test]
    async fn sign_init_on_unknown_session_is_session_consumed() {
        let transport = CoordinatorTransport::new(vec![], 1, Duration::from_secs(1));
        let service = service(transport, [1u8; 32]);
        let result = service
            .sign_init(
                "never-existed",
                CommitmentPair { hiding: "a".into(), binding: "b".into() },
                0,
            )
            .await;
        assert!(matches!(result, Err(AppError::SessionConsumed)));
    }

    #[tokio::test]
    async fn preauthorize_without_credential_or_warm_session_is_invalid_body() {
        let transport = CoordinatorTransport::new(vec![], 1, Duration::from_secs(1));
        let service = service(transport, [1u8; 32]);
        let result = service
            .preauthorize(
                PreauthorizeRequest {
                    claim: claim("ed25519:whatever"),
                    client_verifying_share_b64u: "cvs".into(),
                    credential: None,
                    reuse_auth_session_token: None,
                },
                0,
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidBody(_))));
    }

    #[tokio::test]
    async fn warm_auth_session_reuse_skips_reverification() {
        let transport = CoordinatorTransport::new(vec![], 1, Duration::from_secs(1));
        let service = service(transport, [1u8; 32]);
        let intent = claim("ed25519:whatever");

        let first = service
            .preauthorize(
                PreauthorizeRequest {
                    claim: intent.clone(),
                    client_verifying_share_b64u: "cvs".into(),
                    credential: Some(serde_json::json!({"verified": true})),
                    reuse_auth_session_token: None,
                },
                0,
            )
            .await
            .unwrap();
        let token = first.auth_session_token.unwrap();

        let second = service
            .preauthorize(
                PreauthorizeRequest {
                    claim: intent,
                    client_verifying_share_b64u: "cvs".into(),
                    credential: None,
                    reuse_auth_session_token: Some(token),
                },
                0,
            )
            .await
            .unwrap();
        assert!(second.auth_session_token.is_none());
        assert_ne!(second.mpc_session_id, first.mpc_session_id);
    }
}
