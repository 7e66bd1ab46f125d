//! Input validators for the public endpoints. Grounded on this codebase's
//! former per-chain address regexes (`OnceLock<Regex>` pattern) generalized
//! to the one validator this service actually needs: the NEAR-style
//! account-id format spec §4.7/§8 defines.

use regex::Regex;
use std::sync::OnceLock;

/// Accepts exactly `^[a-z0-9_.-]{2,64}$` (spec §8's testable property).
pub fn is_valid_account_id(account_id: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[a-z0-9_.-]{2,64}$").unwrap());
    re.is_match(account_id)
}

/// `ed25519:<base58>` / `secp256k1:<base58>` key format used for
/// `relayerPrivateKey` and any client-supplied public key strings.
pub fn is_valid_curve_key(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re =
        RE.get_or_init(|| Regex::new(r"^(ed25519|secp256k1):[1-9A-HJ-NP-Za-km-z]{32,128}$").unwrap());
    re.is_match(value)
}
