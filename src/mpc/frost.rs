//! FROST(Ed25519, SHA-512) two-round helpers for the relayer participant.
//!
//! The happy path delegates to `frost-ed25519` (`round1::commit`,
//! `round2::sign`). The co-signer fleet path cannot: each co-signer signs
//! with a Shamir sub-share against *aggregated* relayer commitments, which
//! `round2::sign` rejects because they do not match the signer's own nonces.
//! For that path the signature-share scalar is computed directly with the
//! same binding factors, group commitment, challenge, and 2-party Lagrange
//! coefficient the library would use.

use std::collections::BTreeMap;

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use frost_ed25519::{Ciphersuite, Group};

use crate::error::{AppError, AppResult};
use crate::models::Commitments;
use crate::utils::encoding::{b64u_decode, b64u_decode_32, b64u_encode};

/// Round-1 output: secret nonces (opaque, serialized) and public commitments.
pub struct Round1Output {
    pub nonces_b64u: String,
    pub commitments: Commitments,
}

fn frost_identifier(id: u16) -> AppResult<frost_ed25519::Identifier> {
    id.try_into()
        .map_err(|_| AppError::invalid_body(format!("Invalid participant identifier {id}")))
}

fn decompress_point(bytes: &[u8; 32], label: &str) -> AppResult<EdwardsPoint> {
    CompressedEdwardsY(*bytes)
        .decompress()
        .ok_or_else(|| AppError::invalid_body(format!("Invalid {label} point")))
}

pub fn decompress_point_b64u(value: &str, label: &str) -> AppResult<EdwardsPoint> {
    decompress_point(&b64u_decode_32(value)?, label)
}

/// Public verifying share for a signing scalar: `P = s·B`.
pub fn verifying_share_bytes(signing_share: &Scalar) -> [u8; 32] {
    (ED25519_BASEPOINT_POINT * signing_share).compress().to_bytes()
}

/// Group public key for the 2-party scheme: Lagrange interpolation of the
/// verifying shares at x = 0, `PK = λc·Pc + λr·Pr` with `λc = xr/(xr−xc)`
/// and `λr = xc/(xc−xr)`.
pub fn compute_group_public_key_2p(
    client_point: &EdwardsPoint,
    relayer_point: &EdwardsPoint,
    client_id: u16,
    relayer_id: u16,
) -> AppResult<[u8; 32]> {
    if client_id == 0 || relayer_id == 0 {
        return Err(AppError::invalid_body(
            "Participant ids must be integers in [1,65535]",
        ));
    }
    if client_id == relayer_id {
        return Err(AppError::invalid_body(
            "clientParticipantId must differ from relayerParticipantId",
        ));
    }

    let xc = Scalar::from(client_id as u64);
    let xr = Scalar::from(relayer_id as u64);
    let lambda_c = xr * (xr - xc).invert();
    let lambda_r = xc * (xc - xr).invert();

    let group_point = client_point * lambda_c + relayer_point * lambda_r;
    Ok(group_point.compress().to_bytes())
}

/// 2-party Lagrange coefficient for the relayer at x = 0:
/// `λr = xc / (xc − xr)`.
fn lambda_relayer_2p(client_id: u16, relayer_id: u16) -> AppResult<Scalar> {
    if client_id == relayer_id || client_id == 0 || relayer_id == 0 {
        return Err(AppError::invalid_body("Invalid participant identifiers"));
    }
    let xc = Scalar::from(client_id as u64);
    let xr = Scalar::from(relayer_id as u64);
    Ok(xc * (xc - xr).invert())
}

// ---------------------------------------------------------------------------
// Round 1
// ---------------------------------------------------------------------------

/// Generate fresh nonces and commitments for the given signing share.
pub fn round1_commit(signing_share: &[u8; 32]) -> AppResult<Round1Output> {
    let share = frost_ed25519::keys::SigningShare::deserialize(signing_share)
        .map_err(|e| AppError::invalid_body(format!("Invalid signing share: {e}")))?;

    let mut rng = frost_ed25519::rand_core::OsRng;
    let (nonces, commitments) = frost_ed25519::round1::commit(&share, &mut rng);

    let nonces_bytes = nonces
        .serialize()
        .map_err(|e| AppError::internal(format!("Failed to serialize signing nonces: {e}")))?;
    let hiding = commitments
        .hiding()
        .serialize()
        .map_err(|e| AppError::internal(format!("Failed to serialize hiding commitment: {e}")))?;
    let binding = commitments
        .binding()
        .serialize()
        .map_err(|e| AppError::internal(format!("Failed to serialize binding commitment: {e}")))?;

    Ok(Round1Output {
        nonces_b64u: b64u_encode(&nonces_bytes),
        commitments: Commitments {
            hiding: b64u_encode(&hiding),
            binding: b64u_encode(&binding),
        },
    })
}

// ---------------------------------------------------------------------------
// Round 2
// ---------------------------------------------------------------------------

fn parse_signing_commitments(
    commitments: &Commitments,
    label: &str,
) -> AppResult<frost_ed25519::round1::SigningCommitments> {
    let hiding = b64u_decode(&commitments.hiding)
        .map_err(|e| AppError::invalid_body(format!("Invalid {label}.hiding: {}", e.message)))?;
    let binding = b64u_decode(&commitments.binding)
        .map_err(|e| AppError::invalid_body(format!("Invalid {label}.binding: {}", e.message)))?;
    let hiding = frost_ed25519::round1::NonceCommitment::deserialize(&hiding)
        .map_err(|e| AppError::invalid_body(format!("Invalid {label}.hiding commitment: {e}")))?;
    let binding = frost_ed25519::round1::NonceCommitment::deserialize(&binding)
        .map_err(|e| AppError::invalid_body(format!("Invalid {label}.binding commitment: {e}")))?;
    Ok(frost_ed25519::round1::SigningCommitments::new(
        hiding, binding,
    ))
}

fn build_signing_package(
    client_id: u16,
    relayer_id: u16,
    client_commitments: &Commitments,
    relayer_commitments: &Commitments,
    message: &[u8],
) -> AppResult<frost_ed25519::SigningPackage> {
    let mut commitments_map = BTreeMap::new();
    commitments_map.insert(
        frost_identifier(client_id)?,
        parse_signing_commitments(client_commitments, "clientCommitments")?,
    );
    commitments_map.insert(
        frost_identifier(relayer_id)?,
        parse_signing_commitments(relayer_commitments, "relayerCommitments")?,
    );
    Ok(frost_ed25519::SigningPackage::new(commitments_map, message))
}

/// Standard library-backed round-2 sign for the relayer participant.
pub struct LocalRound2Args<'a> {
    pub signing_share: &'a [u8; 32],
    pub nonces_b64u: &'a str,
    pub group_public_key: &'a [u8; 32],
    pub message: &'a [u8],
    pub client_commitments: &'a Commitments,
    pub relayer_commitments: &'a Commitments,
    pub client_id: u16,
    pub relayer_id: u16,
}

pub fn round2_sign_local(args: LocalRound2Args<'_>) -> AppResult<[u8; 32]> {
    let signing_share = frost_ed25519::keys::SigningShare::deserialize(args.signing_share)
        .map_err(|e| AppError::invalid_body(format!("Invalid relayer signing share: {e}")))?;

    let nonces_bytes = b64u_decode(args.nonces_b64u)?;
    let nonces = frost_ed25519::round1::SigningNonces::deserialize(&nonces_bytes)
        .map_err(|e| AppError::internal(format!("Invalid relayer signing nonces: {e}")))?;

    let verifying_key = frost_ed25519::VerifyingKey::deserialize(args.group_public_key)
        .map_err(|e| AppError::invalid_body(format!("Invalid group public key: {e}")))?;

    let share_scalar = Option::<Scalar>::from(Scalar::from_canonical_bytes(*args.signing_share))
        .ok_or_else(|| AppError::invalid_body("Invalid relayer signing share scalar"))?;
    let verifying_share = frost_ed25519::keys::VerifyingShare::deserialize(
        &verifying_share_bytes(&share_scalar),
    )
    .map_err(|e| AppError::internal(format!("Invalid relayer verifying share: {e}")))?;

    let key_package = frost_ed25519::keys::KeyPackage::new(
        frost_identifier(args.relayer_id)?,
        signing_share,
        verifying_share,
        verifying_key,
        2,
    );

    let signing_package = build_signing_package(
        args.client_id,
        args.relayer_id,
        args.client_commitments,
        args.relayer_commitments,
        args.message,
    )?;

    let share = frost_ed25519::round2::sign(&signing_package, &nonces, &key_package)
        .map_err(|e| AppError::internal(format!("Round2 sign failed: {e}")))?;

    share
        .serialize()
        .as_slice()
        .try_into()
        .map_err(|_| AppError::internal("Signature share must be 32 bytes"))
}

/// Direct-scalar round-2 sign for a co-signer slot. `effective_share` must
/// already be scaled by the co-signer's Lagrange coefficient for the
/// selected fleet subset; the 2-party relayer coefficient is applied here.
pub struct CosignerRound2Args<'a> {
    pub effective_share: &'a Scalar,
    pub nonces_b64u: &'a str,
    pub group_public_key: &'a [u8; 32],
    pub message: &'a [u8],
    pub client_commitments: &'a Commitments,
    /// Aggregated relayer commitments (point sums across the selected fleet).
    pub relayer_commitments: &'a Commitments,
    pub client_id: u16,
    pub relayer_id: u16,
}

pub fn round2_sign_cosigner(args: CosignerRound2Args<'_>) -> AppResult<[u8; 32]> {
    let nonces_bytes = b64u_decode(args.nonces_b64u)?;
    let nonces = frost_ed25519::round1::SigningNonces::deserialize(&nonces_bytes)
        .map_err(|e| AppError::internal(format!("Invalid signing nonces: {e}")))?;

    // Nonce scalars come back out through their canonical serialization.
    let hiding_scalar = nonce_scalar(&nonces.hiding().serialize(), "hiding")?;
    let binding_scalar = nonce_scalar(&nonces.binding().serialize(), "binding")?;

    let verifying_key = frost_ed25519::VerifyingKey::deserialize(args.group_public_key)
        .map_err(|e| AppError::invalid_body(format!("Invalid group public key: {e}")))?;

    let signing_package = build_signing_package(
        args.client_id,
        args.relayer_id,
        args.client_commitments,
        args.relayer_commitments,
        args.message,
    )?;

    // Binding factors (rho) from the same preimages frost-core hashes.
    let preimages = signing_package
        .binding_factor_preimages(&verifying_key, &[])
        .map_err(|e| AppError::internal(format!("Failed to compute binding factor preimages: {e}")))?;
    let mut rho_by_id: BTreeMap<frost_ed25519::Identifier, Scalar> = BTreeMap::new();
    for (id, preimage) in preimages {
        rho_by_id.insert(id, frost_ed25519::Ed25519Sha512::H1(preimage.as_slice()));
    }
    let relayer_identifier = frost_identifier(args.relayer_id)?;
    let rho_relayer = *rho_by_id
        .get(&relayer_identifier)
        .ok_or_else(|| AppError::internal("Missing relayer binding factor"))?;

    // Group commitment R = Σ (hiding_i + rho_i · binding_i).
    let mut group_commitment = EdwardsPoint::identity();
    for (id, commitments) in signing_package.signing_commitments() {
        let hiding = commitment_point(
            &commitments
                .hiding()
                .serialize()
                .map_err(|e| AppError::internal(format!("Invalid hiding commitment: {e}")))?,
        )?;
        let binding = commitment_point(
            &commitments
                .binding()
                .serialize()
                .map_err(|e| AppError::internal(format!("Invalid binding commitment: {e}")))?,
        )?;
        let rho = rho_by_id
            .get(id)
            .ok_or_else(|| AppError::internal("Missing binding factor for commitment"))?;
        group_commitment = group_commitment + hiding + binding * rho;
    }
    let group_commitment_bytes = frost_ed25519::Ed25519Group::serialize(&group_commitment)
        .map_err(|e| AppError::internal(format!("Invalid group commitment: {e}")))?;

    // Challenge c = H2(encode(R) || encode(Y) || msg).
    let vk_bytes = verifying_key
        .serialize()
        .map_err(|e| AppError::internal(format!("Invalid verifying key: {e}")))?;
    let mut challenge_preimage = Vec::with_capacity(64 + args.message.len());
    challenge_preimage.extend_from_slice(group_commitment_bytes.as_ref());
    challenge_preimage.extend_from_slice(vk_bytes.as_ref());
    challenge_preimage.extend_from_slice(args.message);
    let challenge = frost_ed25519::Ed25519Sha512::H2(challenge_preimage.as_slice());

    let lambda_relayer = lambda_relayer_2p(args.client_id, args.relayer_id)?;

    // z_i = r_hiding + rho · r_binding + λr · share_i · c
    let z = hiding_scalar
        + binding_scalar * rho_relayer
        + lambda_relayer * args.effective_share * challenge;
    Ok(z.to_bytes())
}

fn nonce_scalar(bytes: &[u8], label: &str) -> AppResult<Scalar> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AppError::internal(format!("Invalid {label} nonce encoding")))?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(arr))
        .ok_or_else(|| AppError::internal(format!("Invalid {label} nonce scalar")))
}

fn commitment_point(bytes: &[u8]) -> AppResult<EdwardsPoint> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AppError::internal("Invalid commitment encoding"))?;
    frost_ed25519::Ed25519Group::deserialize(&arr)
        .map_err(|e| AppError::internal(format!("Invalid commitment point: {e}")))
}

// ---------------------------------------------------------------------------
// Commitment aggregation (co-signer fleet)
// ---------------------------------------------------------------------------

/// Combine per-cosigner commitments by Edwards point addition into a single
/// relayer commitment pair. An identity sum is an integrity failure.
pub fn aggregate_commitments(commitments: &[Commitments]) -> AppResult<Commitments> {
    if commitments.is_empty() {
        return Err(AppError::internal("No commitments to aggregate"));
    }

    let mut hiding_sum = EdwardsPoint::identity();
    let mut binding_sum = EdwardsPoint::identity();
    for c in commitments {
        hiding_sum += decompress_point_b64u(&c.hiding, "hiding commitment")?;
        binding_sum += decompress_point_b64u(&c.binding, "binding commitment")?;
    }
    if hiding_sum == EdwardsPoint::identity() || binding_sum == EdwardsPoint::identity() {
        return Err(AppError::internal("Aggregated commitment is the identity"));
    }

    Ok(Commitments {
        hiding: b64u_encode(&hiding_sum.compress().to_bytes()),
        binding: b64u_encode(&binding_sum.compress().to_bytes()),
    })
}

/// Sum signature-share scalars mod L (additive fleet combination).
pub fn sum_signature_shares(shares: &[[u8; 32]]) -> AppResult<[u8; 32]> {
    let mut scalars = Vec::with_capacity(shares.len());
    for bytes in shares {
        let scalar = Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
            .ok_or_else(|| AppError::internal("Invalid signature share scalar"))?;
        scalars.push(scalar);
    }
    Ok(crate::mpc::cosigner::combine_shares(&scalars)?.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::cosigner;
    use crate::mpc::scalar::hash_to_scalar;
    use ed25519_dalek::Verifier;
    use sha2::{Digest, Sha256};

    fn keypair_2p(
        client_scalar: &Scalar,
        relayer_scalar: &Scalar,
        client_id: u16,
        relayer_id: u16,
    ) -> [u8; 32] {
        let client_point = ED25519_BASEPOINT_POINT * client_scalar;
        let relayer_point = ED25519_BASEPOINT_POINT * relayer_scalar;
        compute_group_public_key_2p(&client_point, &relayer_point, client_id, relayer_id).unwrap()
    }

    fn client_round2(
        client_scalar: &Scalar,
        group_pk: &[u8; 32],
        message: &[u8],
        client_nonces_b64u: &str,
        client_commitments: &Commitments,
        relayer_commitments: &Commitments,
        client_id: u16,
        relayer_id: u16,
    ) -> frost_ed25519::round2::SignatureShare {
        let signing_share =
            frost_ed25519::keys::SigningShare::deserialize(&client_scalar.to_bytes()).unwrap();
        let verifying_share = frost_ed25519::keys::VerifyingShare::deserialize(
            &verifying_share_bytes(client_scalar),
        )
        .unwrap();
        let verifying_key = frost_ed25519::VerifyingKey::deserialize(group_pk).unwrap();
        let key_package = frost_ed25519::keys::KeyPackage::new(
            client_id.try_into().unwrap(),
            signing_share,
            verifying_share,
            verifying_key,
            2,
        );
        let nonces = frost_ed25519::round1::SigningNonces::deserialize(
            &b64u_decode(client_nonces_b64u).unwrap(),
        )
        .unwrap();
        let package = build_signing_package(
            client_id,
            relayer_id,
            client_commitments,
            relayer_commitments,
            message,
        )
        .unwrap();
        frost_ed25519::round2::sign(&package, &nonces, &key_package).unwrap()
    }

    fn aggregate_and_verify(
        client_scalar: &Scalar,
        group_pk: &[u8; 32],
        message: &[u8],
        client_commitments: &Commitments,
        relayer_commitments: &Commitments,
        client_share: frost_ed25519::round2::SignatureShare,
        relayer_share_bytes: &[u8; 32],
        client_id: u16,
        relayer_id: u16,
    ) {
        let client_identifier: frost_ed25519::Identifier = client_id.try_into().unwrap();
        let relayer_identifier: frost_ed25519::Identifier = relayer_id.try_into().unwrap();
        let verifying_key = frost_ed25519::VerifyingKey::deserialize(group_pk).unwrap();

        let relayer_share =
            frost_ed25519::round2::SignatureShare::deserialize(relayer_share_bytes).unwrap();

        let mut verifying_shares = BTreeMap::new();
        verifying_shares.insert(
            client_identifier,
            frost_ed25519::keys::VerifyingShare::deserialize(&verifying_share_bytes(
                client_scalar,
            ))
            .unwrap(),
        );
        // The relayer verifying share is not needed for aggregation math but
        // PublicKeyPackage wants the map populated for share verification;
        // recover it from the group equation PK = λc·Pc + λr·Pr.
        let xc = Scalar::from(client_id as u64);
        let xr = Scalar::from(relayer_id as u64);
        let lambda_c = xr * (xr - xc).invert();
        let lambda_r = xc * (xc - xr).invert();
        let group_point = CompressedEdwardsY(*group_pk).decompress().unwrap();
        let client_point = ED25519_BASEPOINT_POINT * client_scalar;
        let relayer_point = (group_point - client_point * lambda_c) * lambda_r.invert();
        verifying_shares.insert(
            relayer_identifier,
            frost_ed25519::keys::VerifyingShare::deserialize(
                &relayer_point.compress().to_bytes(),
            )
            .unwrap(),
        );
        let pubkey_package =
            frost_ed25519::keys::PublicKeyPackage::new(verifying_shares, verifying_key);

        let package = build_signing_package(
            client_id,
            relayer_id,
            client_commitments,
            relayer_commitments,
            message,
        )
        .unwrap();

        let mut signature_shares = BTreeMap::new();
        signature_shares.insert(client_identifier, client_share);
        signature_shares.insert(relayer_identifier, relayer_share);

        let signature =
            frost_ed25519::aggregate(&package, &signature_shares, &pubkey_package).unwrap();
        let sig_bytes: [u8; 64] = signature.serialize().unwrap().as_slice().try_into().unwrap();

        let vk = ed25519_dalek::VerifyingKey::from_bytes(group_pk).unwrap();
        vk.verify(message, &ed25519_dalek::Signature::from_bytes(&sig_bytes))
            .expect("aggregated signature must verify under the group key");
    }

    #[test]
    fn two_party_round_trip_verifies() {
        let client_scalar = hash_to_scalar(&[b"client share"]);
        let relayer_scalar = hash_to_scalar(&[b"relayer share"]);
        let (client_id, relayer_id) = (1u16, 2u16);
        let group_pk = keypair_2p(&client_scalar, &relayer_scalar, client_id, relayer_id);

        let message: [u8; 32] = Sha256::digest(b"local mode message").into();

        let client_r1 = round1_commit(&client_scalar.to_bytes()).unwrap();
        let relayer_r1 = round1_commit(&relayer_scalar.to_bytes()).unwrap();

        let relayer_share_bytes = round2_sign_local(LocalRound2Args {
            signing_share: &relayer_scalar.to_bytes(),
            nonces_b64u: &relayer_r1.nonces_b64u,
            group_public_key: &group_pk,
            message: &message,
            client_commitments: &client_r1.commitments,
            relayer_commitments: &relayer_r1.commitments,
            client_id,
            relayer_id,
        })
        .unwrap();

        let client_share = client_round2(
            &client_scalar,
            &group_pk,
            &message,
            &client_r1.nonces_b64u,
            &client_r1.commitments,
            &relayer_r1.commitments,
            client_id,
            relayer_id,
        );

        aggregate_and_verify(
            &client_scalar,
            &group_pk,
            &message,
            &client_r1.commitments,
            &relayer_r1.commitments,
            client_share,
            &relayer_share_bytes,
            client_id,
            relayer_id,
        );
    }

    #[test]
    fn cosigner_fleet_round_trip_verifies() {
        // Client + relayer on the outside; the relayer share split 2-of-3
        // across a co-signer fleet on the inside.
        let client_scalar = hash_to_scalar(&[b"fleet client share"]);
        let relayer_scalar = hash_to_scalar(&[b"fleet relayer share"]);
        let (client_id, relayer_id) = (1u16, 2u16);
        let group_pk = keypair_2p(&client_scalar, &relayer_scalar, client_id, relayer_id);

        let message: [u8; 32] = Sha256::digest(b"fleet mode message").into();
        let threshold = 2u16;
        let selected = [1u16, 3];

        // Round 1: each selected co-signer commits with its sub-share; the
        // coordinator aggregates commitments by point addition.
        let mut slot_outputs = Vec::new();
        for &id in &selected {
            let sub = cosigner::derive_subshare(&relayer_scalar, threshold, id).unwrap();
            let r1 = round1_commit(&sub.to_bytes()).unwrap();
            slot_outputs.push((id, sub, r1));
        }
        let server_commitments = aggregate_commitments(
            &slot_outputs
                .iter()
                .map(|(_, _, r1)| r1.commitments.clone())
                .collect::<Vec<_>>(),
        )
        .unwrap();

        let client_r1 = round1_commit(&client_scalar.to_bytes()).unwrap();

        // Round 2: each co-signer signs with its Lagrange-scaled sub-share
        // against the aggregated commitments; the coordinator sums mod L.
        let mut fleet_shares = Vec::new();
        for (id, sub, r1) in &slot_outputs {
            let lambda = cosigner::lagrange_at_zero(&selected, *id).unwrap();
            let effective = cosigner::scale_share(sub, &lambda).unwrap();
            let z = round2_sign_cosigner(CosignerRound2Args {
                effective_share: &effective,
                nonces_b64u: &r1.nonces_b64u,
                group_public_key: &group_pk,
                message: &message,
                client_commitments: &client_r1.commitments,
                relayer_commitments: &server_commitments,
                client_id,
                relayer_id,
            })
            .unwrap();
            fleet_shares.push(z);
        }
        let relayer_share_bytes = sum_signature_shares(&fleet_shares).unwrap();

        let client_share = client_round2(
            &client_scalar,
            &group_pk,
            &message,
            &client_r1.nonces_b64u,
            &client_r1.commitments,
            &server_commitments,
            client_id,
            relayer_id,
        );

        aggregate_and_verify(
            &client_scalar,
            &group_pk,
            &message,
            &client_r1.commitments,
            &server_commitments,
            client_share,
            &relayer_share_bytes,
            client_id,
            relayer_id,
        );
    }

    #[test]
    fn commitment_aggregation_is_point_addition() {
        let a = round1_commit(&hash_to_scalar(&[b"a"]).to_bytes()).unwrap();
        let b = round1_commit(&hash_to_scalar(&[b"b"]).to_bytes()).unwrap();

        let combined = aggregate_commitments(&[a.commitments.clone(), b.commitments.clone()])
            .unwrap();

        let sum = decompress_point_b64u(&a.commitments.hiding, "h").unwrap()
            + decompress_point_b64u(&b.commitments.hiding, "h").unwrap();
        assert_eq!(
            combined.hiding,
            b64u_encode(&sum.compress().to_bytes())
        );
    }

    #[test]
    fn group_public_key_requires_distinct_ids() {
        let p = ED25519_BASEPOINT_POINT * hash_to_scalar(&[b"p"]);
        assert!(compute_group_public_key_2p(&p, &p, 2, 2).is_err());
        assert!(compute_group_public_key_2p(&p, &p, 0, 2).is_err());
    }
}
