//! `coordinatorGrant` minting and verification. Same HMAC-over-canonical-
//! string shape as this codebase's former Telegram WebApp `initData` check,
//! but framed as `b64u(payload) "." b64u(mac)` instead of a hex hash
//! appended to a query string, and compared in constant time.

use crate::error::{AppError, AppResult};
use crate::models::GrantPayload;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64U;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Signs `payload` into a `b64u(json) "." b64u(mac)` grant token.
pub fn mint(payload: &GrantPayload, shared_secret: &[u8]) -> AppResult<String> {
    let json = serde_json::to_vec(payload)?;
    let mac = compute_mac(shared_secret, &json);
    Ok(format!("{}.{}", B64U.encode(&json), B64U.encode(mac)))
}

/// Verifies a grant token's MAC and `typ` tag, returning the decoded
/// payload. `now_ms` is compared against the payload's `expiresAtMs`.
pub fn verify(token: &str, shared_secret: &[u8], now_ms: i64) -> AppResult<GrantPayload> {
    let (payload_b64u, mac_b64u) = token
        .split_once('.')
        .ok_or_else(|| AppError::InvalidGrant("malformed grant token".into()))?;

    let payload_bytes = B64U
        .decode(payload_b64u)
        .map_err(|e| AppError::InvalidGrant(format!("bad payload encoding: {e}")))?;
    let mac_bytes = B64U
        .decode(mac_b64u)
        .map_err(|e| AppError::InvalidGrant(format!("bad mac encoding: {e}")))?;

    let expected_mac = compute_mac(shared_secret, &payload_bytes);
    if expected_mac.ct_eq(&mac_bytes).unwrap_u8() != 1 {
        return Err(AppError::InvalidGrant("mac mismatch".into()));
    }

    let payload: GrantPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| AppError::InvalidGrant(format!("bad payload json: {e}")))?;

    if now_ms >= payload.expires_at_ms() {
        return Err(AppError::GrantExpired);
    }

    Ok(payload)
}

fn compute_mac(shared_secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(shared_secret).expect("HMAC accepts any key size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MpcSession;

    fn sample_payload(expires_at_ms: i64) -> GrantPayload {
        GrantPayload::CosignerGrantV1 {
            cosigner_id: "2".into(),
            mpc_session_id: "sess-1".into(),
            mpc_session: MpcSession {
                expires_at_ms,
                relayer_key_id: "k".into(),
                purpose: "near_tx".into(),
                intent_digest_b64u: "a".into(),
                signing_digest_b64u: "b".into(),
                user_id: "u".into(),
                rp_id: "r".into(),
                client_verifying_share_b64u: "c".into(),
                participant_ids: vec![1, 2],
            },
            signing_session_id: Some("signing-1".into()),
            expires_at_ms,
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let payload = sample_payload(i64::MAX);
        let token = mint(&payload, secret).unwrap();
        let verified = verify(&token, secret, 0).unwrap();
        assert!(matches!(verified, GrantPayload::CosignerGrantV1 { .. }));
    }

    #[test]
    fn flipping_a_payload_bit_breaks_verification() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = mint(&sample_payload(i64::MAX), secret).unwrap();
        let (payload_part, mac_part) = token.split_once('.').unwrap();
        let mut tampered = B64U.decode(payload_part).unwrap();
        tampered[0] ^= 0x01;
        let tampered_token = format!("{}.{}", B64U.encode(tampered), mac_part);
        assert!(verify(&tampered_token, secret, 0).is_err());
    }

    #[test]
    fn flipping_a_mac_bit_breaks_verification() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = mint(&sample_payload(i64::MAX), secret).unwrap();
        let (payload_part, mac_part) = token.split_once('.').unwrap();
        let mut tampered = B64U.decode(mac_part).unwrap();
        tampered[0] ^= 0x01;
        let tampered_token = format!("{}.{}", payload_part, B64U.encode(tampered));
        assert!(verify(&tampered_token, secret, 0).is_err());
    }

    #[test]
    fn expired_grant_is_rejected() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = mint(&sample_payload(100), secret).unwrap();
        assert!(matches!(verify(&token, secret, 200), Err(AppError::GrantExpired)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let other = b"ffffffffffffffffffffffffffffffff";
        let token = mint(&sample_payload(i64::MAX), secret).unwrap();
        assert!(verify(&token, other, 0).is_err());
    }
}
