//! The WebAuthn/passkey ceremony itself is out of scope for this service
//! (spec §1 places it with the browser SDK) — this module only defines the
//! narrow collaborator boundary `ThresholdSigningService`/`AuthService` call
//! through, in the same shape as this codebase's external rate-source
//! collaborator (`services/rate_service.rs`): a trait, not a concrete HTTP
//! client, so a real relying-party verifier can be swapped in without
//! touching call sites.

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a caller asserts it wants verified: an intent bound to a specific
/// user, relying party, relayer key, and signing digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClaim {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "relayerKeyId")]
    pub relayer_key_id: String,
    pub purpose: String,
    #[serde(rename = "intentDigestB64u")]
    pub intent_digest_b64u: String,
    #[serde(rename = "signingDigestB64u")]
    pub signing_digest_b64u: String,
}

/// Outcome of a verification attempt.
#[derive(Debug, Clone)]
pub struct VerifiedIntent {
    pub claim: IntentClaim,
}

/// External collaborator: verifies a WebAuthn assertion or registration
/// response against `claim`, given an opaque, caller-supplied JSON
/// credential payload (the actual `PublicKeyCredential`/attestation object
/// shape is the browser SDK's concern, not this service's).
#[async_trait]
pub trait WebAuthnVerifier: Send + Sync {
    async fn verify_assertion(
        &self,
        claim: &IntentClaim,
        credential: &serde_json::Value,
    ) -> AppResult<VerifiedIntent>;

    async fn verify_registration(
        &self,
        user_id: &str,
        rp_id: &str,
        credential: &serde_json::Value,
    ) -> AppResult<bool>;
}

/// Deterministic test double: accepts any credential whose `"verified"`
/// field is `true` (or is missing, defaulting to accept), and rejects
/// anything explicit about `false`. Lets the rest of this service's test
/// suite exercise the full preauthorize → sign/init → sign/finalize path
/// without a real relying-party verifier.
pub struct StaticWebAuthnVerifier;

#[async_trait]
impl WebAuthnVerifier for StaticWebAuthnVerifier {
    async fn verify_assertion(
        &self,
        claim: &IntentClaim,
        credential: &serde_json::Value,
    ) -> AppResult<VerifiedIntent> {
        let accepted = credential
            .get("verified")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if !accepted {
            return Err(crate::error::AppError::Unauthorized(
                "webauthn assertion not verified".into(),
            ));
        }
        Ok(VerifiedIntent {
            claim: claim.clone(),
        })
    }

    async fn verify_registration(
        &self,
        _user_id: &str,
        _rp_id: &str,
        credential: &serde_json::Value,
    ) -> AppResult<bool> {
        Ok(credential
            .get("verified")
            .and_then(|v| v.as_bool())
            .unwrap_or(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim() -> IntentClaim {
        IntentClaim {
            user_id: "alice.near".into(),
            rp_id: "example.com".into(),
            relayer_key_id: "ed25519:abc".into(),
            purpose: "near_tx".into(),
            intent_digest_b64u: "aW50ZW50".into(),
            signing_digest_b64u: "c2lnbg".into(),
        }
    }

    #[tokio::test]
    async fn accepts_missing_verified_field_by_default() {
        let verifier = StaticWebAuthnVerifier;
        let result = verifier
            .verify_assertion(&claim(), &serde_json::json!({}))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_explicit_false() {
        let verifier = StaticWebAuthnVerifier;
        let result = verifier
            .verify_assertion(&claim(), &serde_json::json!({"verified": false}))
            .await;
        assert!(result.is_err());
    }
}
