//! The two-party (client, relayer) signing scheme: round-1 commit,
//! round-2 sign, aggregate, verify. Participant 2 ("the relayer side") may
//! itself be backed by a fleet of cosigners behind the scenes — see
//! `coordinator::transport` — but from this module's perspective it is
//! always a 2-of-2 scheme between identifier 1 (client) and identifier 2
//! (relayer).
//!
//! This is a naive additive scheme, not a Shamir-threshold FROST
//! deployment: every participant's signing share already sums, by
//! construction (trusted-dealer split, HKDF-derived relayer share, or the
//! sum of a cosigner fleet's own additive shares), to the group secret, so
//! combining signature shares is plain scalar addition with no Lagrange
//! interpolation coefficient — `s = s_client + Σ s_cosigner`, and the group
//! public key is `Σ verifyingShare_i`. Round-1 still carries FROST's
//! hiding/binding nonce pair and a per-participant binding factor derived
//! from the full commitment set and message, which is what stops a
//! participant from reusing nonces across concurrently-signed messages;
//! it is just not Lagrange-weighted on the way out. Built directly on
//! `curve25519-dalek`/`ed25519-dalek`: a real `frost-ed25519` deployment
//! bakes the Lagrange weighting into `round2::sign`/`aggregate`, which
//! would sign for a different scalar than the one this scheme's naive
//! group key commits to.

use crate::error::{AppError, AppResult};
use crate::models::CommitmentPair;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64U;
use base64::Engine;
use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey as DalekVerifyingKey};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;

/// One participant's signing share plus the group's combined verifying
/// key, the two things round-2 signing needs.
pub struct KeyPackage {
    participant_id: u16,
    signing_share: Scalar,
    group_verifying_key: EdwardsPoint,
}

impl KeyPackage {
    pub fn signing_share(&self) -> Scalar {
        self.signing_share
    }
}

/// Builds a `KeyPackage` for one participant out of its raw 32-byte signing
/// share and the group's verifying key, both base64url-encoded.
pub fn key_package(
    participant_id: u16,
    signing_share_b64u: &str,
    group_verifying_key_b64u: &str,
) -> AppResult<KeyPackage> {
    Ok(KeyPackage {
        participant_id,
        signing_share: scalar_from_b64u(signing_share_b64u)?,
        group_verifying_key: point_from_b64u(group_verifying_key_b64u)?,
    })
}

pub struct PublicKeyPackage {
    verifying_key: EdwardsPoint,
}

impl PublicKeyPackage {
    pub fn verifying_key(&self) -> &EdwardsPoint {
        &self.verifying_key
    }
}

/// Builds the group's `PublicKeyPackage`, checking that the per-participant
/// verifying shares actually sum to the claimed group verifying key (the
/// same additive identity signing relies on).
pub fn public_key_package(
    verifying_shares_by_participant: &[(u16, String)],
    group_verifying_key_b64u: &str,
) -> AppResult<PublicKeyPackage> {
    let group_verifying_key = point_from_b64u(group_verifying_key_b64u)?;

    let mut sum: Option<EdwardsPoint> = None;
    for (_, share_b64u) in verifying_shares_by_participant {
        let point = point_from_b64u(share_b64u)?;
        sum = Some(match sum {
            Some(acc) => acc + point,
            None => point,
        });
    }
    if let Some(sum) = sum {
        if sum != group_verifying_key {
            return Err(AppError::Mismatch(
                "verifying shares do not sum to the group verifying key".into(),
            ));
        }
    }

    Ok(PublicKeyPackage { verifying_key: group_verifying_key })
}

/// This participant's round-1 nonces. Must be kept in memory until round-2
/// and never reused across signing attempts.
pub struct SigningNonces {
    hiding: Scalar,
    binding: Scalar,
}

pub struct RoundOneKeys {
    pub nonces: SigningNonces,
    pub commitments: CommitmentPair,
}

/// Round-1: generates fresh hiding/binding nonces and their commitments.
pub fn commit(_key_package: &KeyPackage) -> AppResult<RoundOneKeys> {
    let mut rng = rand::thread_rng();
    let hiding = random_scalar(&mut rng);
    let binding = random_scalar(&mut rng);
    let hiding_point = &ED25519_BASEPOINT_TABLE * &hiding;
    let binding_point = &ED25519_BASEPOINT_TABLE * &binding;
    Ok(RoundOneKeys {
        nonces: SigningNonces { hiding, binding },
        commitments: CommitmentPair {
            hiding: B64U.encode(hiding_point.compress().to_bytes()),
            binding: B64U.encode(binding_point.compress().to_bytes()),
        },
    })
}

fn random_scalar(rng: &mut impl rand::RngCore) -> Scalar {
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);
    Scalar::from_bytes_mod_order(seed)
}

/// The full set of round-1 commitments (every participant) bound to the
/// message being signed.
pub struct SigningPackage {
    commitments: BTreeMap<u16, (EdwardsPoint, EdwardsPoint)>,
    message: Vec<u8>,
}

impl SigningPackage {
    pub fn message(&self) -> &[u8] {
        &self.message
    }
}

pub fn signing_package(
    commitments_by_participant: &[(u16, CommitmentPair)],
    message: &[u8],
) -> AppResult<SigningPackage> {
    let mut commitments = BTreeMap::new();
    for (participant_id, pair) in commitments_by_participant {
        commitments.insert(
            *participant_id,
            (point_from_b64u(&pair.hiding)?, point_from_b64u(&pair.binding)?),
        );
    }
    Ok(SigningPackage { commitments, message: message.to_vec() })
}

/// Binding factor `rho_i`: ties participant `i`'s nonces to the exact
/// commitment set and message being signed, the same way every other
/// participant and the aggregator derive it, so everyone agrees on the
/// combined nonce commitment `R` below without needing another round trip.
fn binding_factor(signing_package: &SigningPackage, participant_id: u16) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(b"threshold-ed25519-binding-factor");
    hasher.update(&signing_package.message);
    for (id, (hiding, binding)) in &signing_package.commitments {
        hasher.update(id.to_be_bytes());
        hasher.update(hiding.compress().to_bytes());
        hasher.update(binding.compress().to_bytes());
    }
    hasher.update(participant_id.to_be_bytes());
    hash_to_scalar(hasher)
}

/// `R = Σ (hiding_i + rho_i * binding_i)` over every participant in the
/// signing package — the combined nonce commitment both signers and the
/// aggregator need to agree on.
fn combined_commitment(signing_package: &SigningPackage) -> AppResult<EdwardsPoint> {
    let ids: Vec<u16> = signing_package.commitments.keys().copied().collect();
    let mut acc: Option<EdwardsPoint> = None;
    for id in ids {
        let (hiding, binding) = signing_package.commitments[&id];
        let rho = binding_factor(signing_package, id);
        let effective = hiding + binding * rho;
        acc = Some(match acc {
            Some(sum) => sum + effective,
            None => effective,
        });
    }
    acc.ok_or_else(|| AppError::Internal("signing package has no commitments".into()))
}

/// Ed25519 challenge `c = H(R || A || M) mod ℓ`, the same equation
/// `ed25519-dalek`'s plain (non-prehashed) verification recomputes.
fn challenge(r: &EdwardsPoint, group_verifying_key: &EdwardsPoint, message: &[u8]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(r.compress().to_bytes());
    hasher.update(group_verifying_key.compress().to_bytes());
    hasher.update(message);
    hash_to_scalar(hasher)
}

fn hash_to_scalar(hasher: Sha512) -> Scalar {
    let digest = hasher.finalize();
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&digest);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Round-2: produces this participant's signature share
/// `z_i = d_i + rho_i * e_i + c * s_i` — no Lagrange coefficient on `s_i`.
pub fn sign_share(
    signing_package: &SigningPackage,
    nonces: &SigningNonces,
    key_package: &KeyPackage,
) -> AppResult<String> {
    let rho = binding_factor(signing_package, key_package.participant_id);
    let r = combined_commitment(signing_package)?;
    let c = challenge(&r, &key_package.group_verifying_key, &signing_package.message);
    let z = nonces.hiding + nonces.binding * rho + c * key_package.signing_share;
    Ok(B64U.encode(z.to_bytes()))
}

pub struct Signature {
    r: EdwardsPoint,
    s: Scalar,
}

impl Signature {
    pub fn serialize(&self) -> AppResult<[u8; 64]> {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r.compress().to_bytes());
        out[32..].copy_from_slice(&self.s.to_bytes());
        Ok(out)
    }
}

/// Sums the client's and relayer's signature shares into a group signature
/// (`s = Σ z_i`, `R` recomputed the same way every signer derived it),
/// verifying it against the group public key before returning it.
pub fn aggregate(
    signing_package: &SigningPackage,
    shares_by_participant: &[(u16, String)],
    pubkey_package: &PublicKeyPackage,
) -> AppResult<Signature> {
    let r = combined_commitment(signing_package)?;
    let mut s = Scalar::ZERO;
    for (_, share_b64u) in shares_by_participant {
        s += scalar_from_b64u(share_b64u)?;
    }
    let signature = Signature { r, s };

    if !verify(pubkey_package.verifying_key(), &signing_package.message, &signature) {
        tracing::debug!("naive-additive signature aggregation rejected");
        return Err(AppError::InvalidSignature);
    }
    Ok(signature)
}

pub fn verify(verifying_key: &EdwardsPoint, message: &[u8], signature: &Signature) -> bool {
    let Ok(bytes) = signature.serialize() else {
        return false;
    };
    let Ok(dalek_vk) = DalekVerifyingKey::from_bytes(&verifying_key.compress().to_bytes()) else {
        return false;
    };
    let dalek_sig = DalekSignature::from_bytes(&bytes);
    dalek_vk.verify(message, &dalek_sig).is_ok()
}

fn point_from_b64u(value: &str) -> AppResult<EdwardsPoint> {
    let bytes = b64u_decode(value)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AppError::CommitmentInvalid("point is not 32 bytes".into()))?;
    CompressedEdwardsY(arr)
        .decompress()
        .ok_or_else(|| AppError::CommitmentInvalid("point is not on the curve".into()))
}

fn scalar_from_b64u(value: &str) -> AppResult<Scalar> {
    let bytes = b64u_decode(value)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AppError::ScalarOutOfRange)?;
    Ok(Scalar::from_bytes_mod_order(arr))
}

fn b64u_decode(value: &str) -> AppResult<Vec<u8>> {
    B64U.decode(value)
        .map_err(|e| AppError::InvalidKeyFormat(format!("bad base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;

    fn random_scalar_b64u() -> (Scalar, String) {
        let mut seed = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut seed);
        let scalar = Scalar::from_bytes_mod_order(seed);
        (scalar, B64U.encode(scalar.to_bytes()))
    }

    fn point_b64u(scalar: &Scalar) -> String {
        B64U.encode((&ED25519_BASEPOINT_TABLE * scalar).compress().to_bytes())
    }

    /// Builds a valid 2-of-2 setup the way a trusted-dealer split would:
    /// two additive shares of a secret summing (mod ell) to the group
    /// secret, exposed only through their derived public points.
    fn two_party_setup() -> (PublicKeyPackage, Signature, SigningPackage) {
        let (share1, share1_b64u) = random_scalar_b64u();
        let (share2, share2_b64u) = random_scalar_b64u();
        let group_secret = share1 + share2;
        let group_vk_b64u = point_b64u(&group_secret);

        let kp1 = key_package(1, &share1_b64u, &group_vk_b64u).unwrap();
        let kp2 = key_package(2, &share2_b64u, &group_vk_b64u).unwrap();

        let pubkey_package = public_key_package(
            &[(1, point_b64u(&share1)), (2, point_b64u(&share2))],
            &group_vk_b64u,
        )
        .unwrap();

        let message = b"near transaction intent digest";
        let round1_a = commit(&kp1).unwrap();
        let round1_b = commit(&kp2).unwrap();

        let signing_package = signing_package(
            &[
                (1, round1_a.commitments.clone()),
                (2, round1_b.commitments.clone()),
            ],
            message,
        )
        .unwrap();

        let share_a = sign_share(&signing_package, &round1_a.nonces, &kp1).unwrap();
        let share_b = sign_share(&signing_package, &round1_b.nonces, &kp2).unwrap();

        let signature = aggregate(
            &signing_package,
            &[(1, share_a), (2, share_b)],
            &pubkey_package,
        )
        .unwrap();

        (pubkey_package, signature, signing_package)
    }

    #[test]
    fn two_party_round_trip_produces_verifiable_signature() {
        let (pubkey_package, signature, signing_package) = two_party_setup();
        assert!(verify(
            pubkey_package.verifying_key(),
            signing_package.message(),
            &signature
        ));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let (pubkey_package, signature, _) = two_party_setup();
        assert!(!verify(
            pubkey_package.verifying_key(),
            b"a different message entirely",
            &signature
        ));
    }

    #[test]
    fn mismatched_verifying_shares_are_rejected() {
        let (share1, _) = random_scalar_b64u();
        let (share2, _) = random_scalar_b64u();
        let (unrelated_secret, _) = random_scalar_b64u();
        let wrong_group_vk_b64u = point_b64u(&unrelated_secret);

        let result = public_key_package(
            &[(1, point_b64u(&share1)), (2, point_b64u(&share2))],
            &wrong_group_vk_b64u,
        );
        assert!(matches!(result, Err(AppError::Mismatch(_))));
    }
}
