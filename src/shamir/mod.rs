//! Shamir three-pass key-encryption-key unlock protocol: pure modular
//! arithmetic over a shared safe prime `p`. The engine never sees a
//! plaintext KEK in unblinded form server-side — it only ever blinds or
//! unblinds ciphertext a client already blinded with its own exponent.

use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64U;
use base64::Engine;
use chrono::Utc;
use num_bigint_dig::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;

/// One exponent pair plus the prime it is defined over.
#[derive(Clone)]
pub struct ShamirKeyMaterial {
    pub p: BigUint,
    pub e_s: BigUint,
    pub d_s: BigUint,
}

impl ShamirKeyMaterial {
    pub fn from_b64u(p_b64u: &str, e_s_b64u: &str, d_s_b64u: &str) -> AppResult<Self> {
        let p = biguint_from_b64u(p_b64u)?;
        let e_s = biguint_from_b64u(e_s_b64u)?;
        let d_s = biguint_from_b64u(d_s_b64u)?;
        Ok(Self { p, e_s, d_s })
    }

    /// Stable identifier for this keypair, derived from `e_s` so that
    /// rotating the keypair always produces a different `keyId`.
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(e_s_bytes(&self.e_s));
        hex::encode(&digest[..8])
    }

    pub fn apply(&self, kek_c: &BigUint) -> BigUint {
        kek_c.modpow(&self.e_s, &self.p)
    }

    pub fn remove(&self, kek_cs: &BigUint) -> BigUint {
        kek_cs.modpow(&self.d_s, &self.p)
    }
}

fn e_s_bytes(e_s: &BigUint) -> Vec<u8> {
    e_s.to_bytes_be()
}

/// Picks a fresh `(e_s, d_s)` pair over the given prime: `e_s` coprime to
/// `p - 1`, `d_s = e_s^{-1} mod (p - 1)`.
pub fn generate_server_keypair(p: &BigUint) -> ShamirKeyMaterial {
    let p_minus_one = p - BigUint::one();
    let mut rng = rand::thread_rng();

    loop {
        let candidate = rng.gen_biguint_range(&BigUint::from(2u32), &p_minus_one);
        if let Some(d_s) = mod_inverse(&candidate, &p_minus_one) {
            return ShamirKeyMaterial {
                p: p.clone(),
                e_s: candidate,
                d_s,
            };
        }
    }
}

/// Extended-Euclidean modular inverse of `a` modulo `m`. Returns `None`
/// when `gcd(a, m) != 1`.
fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a_signed = BigInt::from_biguint(Sign::Plus, a.clone());
    let m_signed = BigInt::from_biguint(Sign::Plus, m.clone());
    let egcd = a_signed.extended_gcd(&m_signed);
    if egcd.gcd != BigInt::one() {
        return None;
    }
    let mut x = egcd.x % &m_signed;
    if x.sign() == Sign::Minus {
        x += &m_signed;
    }
    Some(x.to_biguint().expect("non-negative by construction"))
}

fn biguint_from_b64u(value: &str) -> AppResult<BigUint> {
    let bytes = B64U
        .decode(value)
        .map_err(|e| AppError::InvalidKeyFormat(format!("shamir value is not valid base64url: {e}")))?;
    if bytes.is_empty() {
        return Err(AppError::InvalidKeyFormat("shamir value decodes to zero bytes".into()));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

fn biguint_to_b64u(value: &BigUint) -> String {
    B64U.encode(value.to_bytes_be())
}

struct GraceEntry {
    material: ShamirKeyMaterial,
    created_at_ms: i64,
}

/// Process-wide singleton holding the current Shamir keypair plus a grace
/// set of retired keypairs so in-flight unblinds started before a rotation
/// still succeed.
pub struct ShamirKeyRing {
    current: RwLock<ShamirKeyMaterial>,
    grace: RwLock<HashMap<String, GraceEntry>>,
    grace_ttl_secs: Option<u64>,
}

impl ShamirKeyRing {
    pub fn new(material: ShamirKeyMaterial, grace_ttl_secs: Option<u64>) -> Self {
        Self {
            current: RwLock::new(material),
            grace: RwLock::new(HashMap::new()),
            grace_ttl_secs,
        }
    }

    pub fn current_key_id(&self) -> String {
        self.current.read().unwrap().key_id()
    }

    pub fn grace_key_ids(&self) -> Vec<String> {
        self.grace.read().unwrap().keys().cloned().collect()
    }

    pub fn apply_server_lock(&self, kek_c_b64u: &str) -> AppResult<(String, String)> {
        let kek_c = biguint_from_b64u(kek_c_b64u)?;
        let current = self.current.read().unwrap();
        let kek_cs = current.apply(&kek_c);
        Ok((biguint_to_b64u(&kek_cs), current.key_id()))
    }

    pub fn remove_server_lock(&self, kek_cs_b64u: &str, key_id: Option<&str>) -> AppResult<String> {
        let kek_cs = biguint_from_b64u(kek_cs_b64u)?;
        let current = self.current.read().unwrap();

        let material = match key_id {
            None | Some("") => Some(&*current),
            Some(id) if id == current.key_id() => Some(&*current),
            Some(id) => {
                let grace = self.grace.read().unwrap();
                return match grace.get(id) {
                    Some(entry) => Ok(biguint_to_b64u(&entry.material.remove(&kek_cs))),
                    None => Err(AppError::UnknownKeyId(id.to_string())),
                };
            }
        };

        Ok(biguint_to_b64u(&material.unwrap().remove(&kek_cs)))
    }

    /// Generates a fresh keypair over the same prime, retiring the current
    /// one into the grace set. Grace entries older than the configured TTL
    /// are pruned; with no TTL configured, grace entries are kept until the
    /// next rotation prunes by count only (never expired by age).
    pub fn rotate(&self) {
        let p = self.current.read().unwrap().p.clone();
        let fresh = generate_server_keypair(&p);

        let retired = {
            let mut current = self.current.write().unwrap();
            std::mem::replace(&mut *current, fresh)
        };

        let now_ms = Utc::now().timestamp_millis();
        let retired_id = retired.key_id();
        let mut grace = self.grace.write().unwrap();
        grace.insert(
            retired_id,
            GraceEntry {
                material: retired,
                created_at_ms: now_ms,
            },
        );

        if let Some(ttl_secs) = self.grace_ttl_secs {
            let cutoff = now_ms - (ttl_secs as i64 * 1000);
            grace.retain(|_, entry| entry.created_at_ms >= cutoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_safe_prime() -> BigUint {
        // 23 = 2*11 + 1, a small safe prime sufficient for round-trip tests.
        BigUint::from(23u32)
    }

    #[test]
    fn apply_then_remove_is_identity() {
        let p = small_safe_prime();
        let material = generate_server_keypair(&p);
        for x in 1u32..23 {
            let x = BigUint::from(x);
            let applied = material.apply(&x);
            let removed = material.remove(&applied);
            assert_eq!(removed, x);
        }
    }

    #[test]
    fn fixed_exponents_match_spec_scenario() {
        // p = 23 (toy prime), e_s = 3, d_s = 3^-1 mod 22 = 15
        let p = BigUint::from(23u32);
        let e_s = BigUint::from(3u32);
        let d_s = mod_inverse(&e_s, &(&p - BigUint::one())).unwrap();
        assert_eq!(d_s, BigUint::from(15u32));

        let material = ShamirKeyMaterial { p, e_s, d_s };
        let kek_c = BigUint::from(4u32);
        let kek_cs = material.apply(&kek_c);
        assert_eq!(material.remove(&kek_cs), kek_c);
    }

    #[test]
    fn rotate_keeps_grace_key_usable() {
        let ring = ShamirKeyRing::new(
            ShamirKeyMaterial {
                p: small_safe_prime(),
                e_s: BigUint::from(3u32),
                d_s: mod_inverse(&BigUint::from(3u32), &(small_safe_prime() - BigUint::one())).unwrap(),
            },
            None,
        );

        let (kek_cs, old_key_id) = ring.apply_server_lock(&B64U.encode([4u8])).unwrap();
        ring.rotate();

        let recovered = ring.remove_server_lock(&kek_cs, Some(&old_key_id)).unwrap();
        let recovered_bytes = B64U.decode(recovered).unwrap();
        assert_eq!(recovered_bytes, vec![4u8]);
    }

    #[test]
    fn unknown_key_id_is_rejected() {
        let ring = ShamirKeyRing::new(
            ShamirKeyMaterial {
                p: small_safe_prime(),
                e_s: BigUint::from(3u32),
                d_s: mod_inverse(&BigUint::from(3u32), &(small_safe_prime() - BigUint::one())).unwrap(),
            },
            None,
        );
        let result = ring.remove_server_lock(&B64U.encode([1u8]), Some("not-a-real-key-id"));
        assert!(matches!(result, Err(AppError::UnknownKeyId(_))));
    }
}
