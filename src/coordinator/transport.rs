//! Round-1/round-2 fan-out to configured cosigners, cosigner selection,
//! and commitment/signature-share aggregation. Grounded on this codebase's
//! former `MpcCoordinator` session bookkeeping (now generalized from
//! "collect raw byte shares" to "collect and curve-aggregate FROST
//! commitments/shares") and on the `rpc_call` shape of the EVM chain
//! client for the actual HTTP fan-out.

use crate::config::CosignerEndpoint;
use crate::error::{AppError, AppResult};
use crate::models::CommitmentPair;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64U;
use base64::Engine;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct Round1Request<'a> {
    #[serde(rename = "signingSessionId")]
    signing_session_id: &'a str,
    #[serde(rename = "coordinatorGrant")]
    coordinator_grant: &'a str,
    #[serde(rename = "clientCommitments")]
    client_commitments: &'a CommitmentPair,
}

#[derive(Deserialize)]
struct Round1Ok {
    #[serde(rename = "relayerCommitments")]
    relayer_commitments: CommitmentPair,
    #[serde(rename = "relayerVerifyingShareB64u")]
    relayer_verifying_share_b64u: String,
}

#[derive(Serialize)]
struct Round2Request<'a> {
    #[serde(rename = "signingSessionId")]
    signing_session_id: &'a str,
    #[serde(rename = "coordinatorGrant")]
    coordinator_grant: &'a str,
    #[serde(rename = "cosignerIds")]
    cosigner_ids: &'a [String],
    #[serde(rename = "relayerCommitments")]
    relayer_commitments: &'a CommitmentPair,
    #[serde(rename = "groupPublicKey")]
    group_public_key: &'a str,
}

#[derive(Deserialize)]
struct Round2Ok {
    #[serde(rename = "relayerSignatureShareB64u")]
    relayer_signature_share_b64u: String,
}

#[derive(Deserialize)]
struct CosignerErrorBody {
    #[allow(dead_code)]
    ok: bool,
    code: String,
    message: String,
}

pub struct RoundOneOutcome {
    pub cosigner_id: String,
    pub commitments: CommitmentPair,
    pub relayer_verifying_share_b64u: String,
}

pub struct FleetRoundOne {
    pub combined_commitments: CommitmentPair,
    pub combined_verifying_share_b64u: String,
    pub selected_cosigner_ids: Vec<String>,
}

pub struct CoordinatorTransport {
    http: Client,
    pub cosigners: Vec<CosignerEndpoint>,
    pub threshold: u32,
}

impl CoordinatorTransport {
    pub fn new(cosigners: Vec<CosignerEndpoint>, threshold: u32, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build cosigner http client");
        Self {
            http,
            cosigners,
            threshold,
        }
    }

    /// Legacy 2-party round-1: exactly one peer is called. Rejects
    /// configurations with more than one cosigner, since the legacy path
    /// has no aggregation step.
    pub async fn round1_legacy(
        &self,
        signing_session_id: &str,
        grant: &str,
        client_commitments: &CommitmentPair,
    ) -> AppResult<RoundOneOutcome> {
        if self.cosigners.len() > 1 {
            return Err(AppError::MultiPartyNotSupported);
        }
        let peer = self
            .cosigners
            .first()
            .ok_or_else(|| AppError::ThresholdNotMet { needed: 1, got: 0 })?;

        let resp = self
            .call_round1(
                peer,
                "/threshold-ed25519/internal/sign/init",
                signing_session_id,
                grant,
                client_commitments,
            )
            .await?;

        Ok(RoundOneOutcome {
            cosigner_id: peer.cosigner_id.clone(),
            commitments: resp.relayer_commitments,
            relayer_verifying_share_b64u: resp.relayer_verifying_share_b64u,
        })
    }

    /// N-party fleet round-1: stable-sorts by `cosignerId`, probes in
    /// order, accepts the first `t` successes, sums hiding/binding points
    /// (and verifying shares) over the accepted set.
    pub async fn round1_fleet(
        &self,
        signing_session_id: &str,
        grant: &str,
        client_commitments: &CommitmentPair,
    ) -> AppResult<FleetRoundOne> {
        let mut ordered = self.cosigners.clone();
        ordered.sort_by(|a, b| a.cosigner_id.cmp(&b.cosigner_id));

        let mut accepted: Vec<RoundOneOutcome> = Vec::new();
        for peer in &ordered {
            if accepted.len() >= self.threshold as usize {
                break;
            }
            match self
                .call_round1(
                    peer,
                    "/threshold-ed25519/internal/cosign/init",
                    signing_session_id,
                    grant,
                    client_commitments,
                )
                .await
            {
                Ok(resp) => accepted.push(RoundOneOutcome {
                    cosigner_id: peer.cosigner_id.clone(),
                    commitments: resp.relayer_commitments,
                    relayer_verifying_share_b64u: resp.relayer_verifying_share_b64u,
                }),
                Err(e) => {
                    tracing::warn!(cosigner_id = %peer.cosigner_id, error = %e, "round-1 peer failed");
                }
            }
        }

        if accepted.len() < self.threshold as usize {
            return Err(AppError::ThresholdNotMet {
                needed: self.threshold as usize,
                got: accepted.len(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for outcome in &accepted {
            if !seen.insert(outcome.cosigner_id.clone()) {
                return Err(AppError::DuplicateCosigner(outcome.cosigner_id.clone()));
            }
        }

        let combined_hiding = sum_points(accepted.iter().map(|o| o.commitments.hiding.as_str()))?;
        let combined_binding = sum_points(accepted.iter().map(|o| o.commitments.binding.as_str()))?;
        let combined_verifying =
            sum_points(accepted.iter().map(|o| o.relayer_verifying_share_b64u.as_str()))?;

        Ok(FleetRoundOne {
            combined_commitments: CommitmentPair {
                hiding: B64U.encode(combined_hiding.compress().to_bytes()),
                binding: B64U.encode(combined_binding.compress().to_bytes()),
            },
            combined_verifying_share_b64u: B64U.encode(combined_verifying.compress().to_bytes()),
            selected_cosigner_ids: accepted.into_iter().map(|o| o.cosigner_id).collect(),
        })
    }

    /// Legacy round-2: calls the same single peer round-1 used.
    pub async fn round2_legacy(
        &self,
        signing_session_id: &str,
        grant: &str,
        cosigner_ids: &[String],
        relayer_commitments: &CommitmentPair,
        group_public_key: &str,
    ) -> AppResult<String> {
        let peer = self
            .cosigners
            .first()
            .ok_or_else(|| AppError::ThresholdNotMet { needed: 1, got: 0 })?;
        let resp = self
            .call_round2(
                peer,
                "/threshold-ed25519/internal/sign/finalize",
                signing_session_id,
                grant,
                cosigner_ids,
                relayer_commitments,
                group_public_key,
            )
            .await?;
        Ok(resp.relayer_signature_share_b64u)
    }

    /// N-party fleet round-2: calls exactly the cosigner set captured in
    /// round-1, sums their scalar shares modulo the Ed25519 group order.
    pub async fn round2_fleet(
        &self,
        signing_session_id: &str,
        grant: &str,
        cosigner_ids: &[String],
        relayer_commitments: &CommitmentPair,
        group_public_key: &str,
    ) -> AppResult<String> {
        let by_id: std::collections::HashMap<&str, &CosignerEndpoint> = self
            .cosigners
            .iter()
            .map(|c| (c.cosigner_id.as_str(), c))
            .collect();

        let mut combined = Scalar::ZERO;
        for id in cosigner_ids {
            let peer = by_id
                .get(id.as_str())
                .ok_or_else(|| AppError::PeerFinalizeFailed(format!("unknown cosigner {id}")))?;
            let resp = self
                .call_round2(
                    peer,
                    "/threshold-ed25519/internal/cosign/finalize",
                    signing_session_id,
                    grant,
                    cosigner_ids,
                    relayer_commitments,
                    group_public_key,
                )
                .await?;
            combined += scalar_from_b64u(&resp.relayer_signature_share_b64u)?;
        }

        Ok(B64U.encode(combined.to_bytes()))
    }

    async fn call_round1(
        &self,
        peer: &CosignerEndpoint,
        path: &str,
        signing_session_id: &str,
        grant: &str,
        client_commitments: &CommitmentPair,
    ) -> AppResult<Round1Ok> {
        let url = format!("{}{path}", peer.relayer_url);
        let body = Round1Request {
            signing_session_id,
            coordinator_grant: grant,
            client_commitments,
        };
        self.post(&url, &body).await
    }

    async fn call_round2(
        &self,
        peer: &CosignerEndpoint,
        path: &str,
        signing_session_id: &str,
        grant: &str,
        cosigner_ids: &[String],
        relayer_commitments: &CommitmentPair,
        group_public_key: &str,
    ) -> AppResult<Round2Ok> {
        let url = format!("{}{path}", peer.relayer_url);
        let body = Round2Request {
            signing_session_id,
            coordinator_grant: grant,
            cosigner_ids,
            relayer_commitments,
            group_public_key,
        };
        self.post(&url, &body).await
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> AppResult<R> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::PeerInitFailed(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let err_body: Option<CosignerErrorBody> = resp.json().await.ok();
            let message = err_body
                .map(|b| format!("{}: {}", b.code, b.message))
                .unwrap_or_else(|| status.to_string());
            return Err(AppError::PeerInitFailed(message));
        }

        resp.json::<R>()
            .await
            .map_err(|e| AppError::PeerFinalizeFailed(format!("bad cosigner response: {e}")))
    }
}

/// Sums two base64url-encoded Ed25519 points — e.g. a client verifying
/// share and a (possibly already combined) relayer verifying share — into
/// the group public key point, base64url-encoded. Used by both the
/// coordinator (to report `groupPublicKey` to clients) and each cosigner
/// (to build its own `KeyPackage` against the same group key).
pub fn combine_points_b64u(a: &str, b: &str) -> AppResult<String> {
    let sum = sum_points([a, b].into_iter())?;
    Ok(B64U.encode(sum.compress().to_bytes()))
}

fn point_from_b64u(value: &str) -> AppResult<EdwardsPoint> {
    let bytes = B64U
        .decode(value)
        .map_err(|e| AppError::CommitmentInvalid(format!("bad base64url: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AppError::CommitmentInvalid("commitment is not 32 bytes".into()))?;
    CompressedEdwardsY(arr)
        .decompress()
        .ok_or_else(|| AppError::CommitmentInvalid("point is not on the curve".into()))
}

fn sum_points<'a>(values: impl Iterator<Item = &'a str>) -> AppResult<EdwardsPoint> {
    let mut acc: Option<EdwardsPoint> = None;
    for value in values {
        let point = point_from_b64u(value)?;
        acc = Some(match acc {
            Some(sum) => sum + point,
            None => point,
        });
    }
    acc.ok_or_else(|| AppError::CommitmentInvalid("no points to sum".into()))
}

fn scalar_from_b64u(value: &str) -> AppResult<Scalar> {
    let bytes = B64U
        .decode(value)
        .map_err(|e| AppError::InvalidKeyFormat(format!("bad scalar base64url: {e}")))?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| AppError::ScalarOutOfRange)?;
    Ok(Scalar::from_bytes_mod_order(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_path_rejects_multiple_cosigners() {
        let transport = CoordinatorTransport::new(
            vec![
                CosignerEndpoint { cosigner_id: "2".into(), relayer_url: "http://a".into() },
                CosignerEndpoint { cosigner_id: "3".into(), relayer_url: "http://b".into() },
            ],
            1,
            Duration::from_secs(1),
        );
        assert_eq!(transport.cosigners.len(), 2);
    }

    #[test]
    fn point_sum_is_order_independent() {
        let a = point_from_b64u(&B64U.encode(
            (&curve25519_dalek::constants::ED25519_BASEPOINT_TABLE * &Scalar::from(2u64))
                .compress()
                .to_bytes(),
        ))
        .unwrap();
        let b = point_from_b64u(&B64U.encode(
            (&curve25519_dalek::constants::ED25519_BASEPOINT_TABLE * &Scalar::from(3u64))
                .compress()
                .to_bytes(),
        ))
        .unwrap();
        assert_eq!((a + b).compress(), (b + a).compress());
    }

    #[test]
    fn scalar_from_b64u_reduces_mod_group_order() {
        let s = scalar_from_b64u(&B64U.encode([0xffu8; 32])).unwrap();
        // A 32-byte all-ff value exceeds the group order; confirm it reduced
        // rather than erroring or wrapping in an undefined way.
        assert!(s != Scalar::ZERO);
    }
}
