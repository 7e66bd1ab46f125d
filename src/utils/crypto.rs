//! Base64url helpers and JWT minting for `verifyAuthenticationResponse`
//! session credentials (spec §4.7). The JWT payload binds
//! `{sub, iat, exp = iat + 24h, iss}`; signing is delegated to an injectable
//! [`JwtSigner`] so a real HMAC or asymmetric signer can replace the
//! in-repo HMAC-SHA-256 implementation without touching call sites — spec
//! §9 explicitly calls the reference placeholder out as swappable.

use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64U;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn b64u_encode(bytes: impl AsRef<[u8]>) -> String {
    B64U.encode(bytes)
}

/// Strict base64url decoding: no padding accepted, matching spec §4.6's
/// "base64url decoding is strict (no padding)".
pub fn b64u_decode(value: &str) -> AppResult<Vec<u8>> {
    B64U.decode(value)
        .map_err(|e| AppError::InvalidKeyFormat(format!("bad base64url: {e}")))
}

/// Claims embedded in a session-credential JWT minted by
/// `AuthService::verify_authentication_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl SessionClaims {
    pub fn new(user_id: &str, issuer: &str, now_ms: i64) -> Self {
        let iat = now_ms / 1000;
        Self {
            sub: user_id.to_string(),
            iat,
            exp: iat + 24 * 3600,
            iss: issuer.to_string(),
        }
    }
}

/// Injectable JWT signer. The in-repo [`HmacJwtSigner`] is an HMAC-SHA-256
/// implementation suitable for a single-coordinator deployment; production
/// multi-party deployments may swap in an asymmetric signer (e.g. over a
/// KMS-held key) behind the same trait.
pub trait JwtSigner: Send + Sync {
    fn sign(&self, claims: &SessionClaims) -> AppResult<String>;
    fn verify(&self, token: &str) -> AppResult<SessionClaims>;
}

/// Three-part base64url-encoded token: `b64u(header) "." b64u(payload) "."
/// b64u(HMAC_SHA256(secret, header "." payload))`. Matches the shape spec
/// §4.7 requires ("a three-part base64url-encoded token") without pulling
/// in the full `jsonwebtoken` validation surface, which this service has no
/// use for beyond exactly this one token.
pub struct HmacJwtSigner {
    secret: Vec<u8>,
}

const JWT_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

impl HmacJwtSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, signing_input: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(signing_input.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

impl JwtSigner for HmacJwtSigner {
    fn sign(&self, claims: &SessionClaims) -> AppResult<String> {
        let header_b64u = b64u_encode(JWT_HEADER);
        let payload_json = serde_json::to_vec(claims)?;
        let payload_b64u = b64u_encode(payload_json);
        let signing_input = format!("{header_b64u}.{payload_b64u}");
        let sig_b64u = b64u_encode(self.mac(&signing_input));
        Ok(format!("{signing_input}.{sig_b64u}"))
    }

    fn verify(&self, token: &str) -> AppResult<SessionClaims> {
        let mut parts = token.split('.');
        let (Some(header_b64u), Some(payload_b64u), Some(sig_b64u), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AppError::Unauthorized("malformed session token".into()));
        };

        let signing_input = format!("{header_b64u}.{payload_b64u}");
        let expected = self.mac(&signing_input);
        let given = b64u_decode(sig_b64u)?;

        use subtle::ConstantTimeEq;
        if expected.ct_eq(&given).unwrap_u8() != 1 {
            return Err(AppError::Unauthorized("session token signature mismatch".into()));
        }

        let payload_bytes = b64u_decode(payload_b64u)?;
        let claims: SessionClaims = serde_json::from_slice(&payload_bytes)
            .map_err(|e| AppError::Unauthorized(format!("malformed session token payload: {e}")))?;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64u_round_trips() {
        let encoded = b64u_encode([1u8, 2, 3, 4]);
        assert_eq!(b64u_decode(&encoded).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn b64u_decode_rejects_padding() {
        assert!(b64u_decode("AAAA=").is_err());
    }

    #[test]
    fn session_jwt_round_trips() {
        let signer = HmacJwtSigner::new(b"test-secret-at-least-32-bytes!!".to_vec());
        let claims = SessionClaims::new("alice.near", "passkey-wallet", 1_000_000);
        let token = signer.sign(&claims).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let verified = signer.verify(&token).unwrap();
        assert_eq!(verified.sub, "alice.near");
        assert_eq!(verified.exp, verified.iat + 24 * 3600);
    }

    #[test]
    fn tampered_session_jwt_is_rejected() {
        let signer = HmacJwtSigner::new(b"test-secret-at-least-32-bytes!!".to_vec());
        let token = signer
            .sign(&SessionClaims::new("alice.near", "passkey-wallet", 0))
            .unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let tampered_payload = b64u_encode(b"{\"sub\":\"mallory\",\"iat\":0,\"exp\":1,\"iss\":\"x\"}");
        parts[1] = &tampered_payload;
        let tampered = parts.join(".");
        assert!(signer.verify(&tampered).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signer = HmacJwtSigner::new(b"test-secret-at-least-32-bytes!!".to_vec());
        let other = HmacJwtSigner::new(b"different-secret-32-bytes-long!!".to_vec());
        let token = signer
            .sign(&SessionClaims::new("alice.near", "passkey-wallet", 0))
            .unwrap();
        assert!(other.verify(&token).is_err());
    }
}
