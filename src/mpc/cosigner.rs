//! Deterministic (t, n) Shamir reshare of the relayer signing scalar across
//! a fleet of co-signers.
//!
//! Coefficients are derived from the share itself, so every relayer instance
//! recomputes identical sub-shares without any shared state, and no sub-share
//! store is needed. Recombination is Lagrange interpolation at x = 0 over a
//! selected subset of co-signer ids.

use curve25519_dalek::scalar::Scalar;

use crate::error::{AppError, AppResult};
use crate::mpc::scalar;

const COSIGNER_POLY_DOMAIN_V1: &[u8] = b"w3a/threshold-ed25519/cosigner-poly_v1";

/// Derive the polynomial coefficients `[a0, a1, .., a_{t-1}]` where `a0` is
/// the relayer signing share and the higher coefficients are hashed from it.
fn poly_coefficients(server_share: &Scalar, threshold: u16) -> AppResult<Vec<Scalar>> {
    if threshold == 0 {
        return Err(AppError::missing_config("Cosigner threshold must be >= 1"));
    }
    let mut coefficients = Vec::with_capacity(threshold as usize);
    coefficients.push(*server_share);
    let share_bytes = scalar::encode_scalar(server_share);
    for i in 1..threshold {
        let coeff = scalar::hash_to_scalar(&[
            COSIGNER_POLY_DOMAIN_V1,
            &threshold.to_le_bytes(),
            &share_bytes,
            &i.to_le_bytes(),
        ]);
        coefficients.push(coeff);
    }
    Ok(coefficients)
}

/// Evaluate the reshare polynomial at `x = cosigner_id` (Horner form).
pub fn derive_subshare(
    server_share: &Scalar,
    threshold: u16,
    cosigner_id: u16,
) -> AppResult<Scalar> {
    let x = scalar::u16_to_scalar(cosigner_id)?;
    let coefficients = poly_coefficients(server_share, threshold)?;

    let mut acc = Scalar::ZERO;
    for coeff in coefficients.iter().rev() {
        acc = acc * x + coeff;
    }
    if acc == Scalar::ZERO {
        return Err(AppError::internal(format!(
            "Derived sub-share for cosigner {cosigner_id} is zero"
        )));
    }
    Ok(acc)
}

/// Lagrange coefficient at `x = 0` for member `id` of the subset `selected`:
/// `λᵢ = Π_{j∈S\{i}} x_j / (x_j − x_i) mod L`.
pub fn lagrange_at_zero(selected: &[u16], id: u16) -> AppResult<Scalar> {
    if !selected.contains(&id) {
        return Err(AppError::internal(format!(
            "Cosigner {id} is not in the selected set"
        )));
    }

    let x_i = scalar::u16_to_scalar(id)?;
    let mut lambda = Scalar::ONE;
    for &j in selected {
        if j == id {
            continue;
        }
        let x_j = scalar::u16_to_scalar(j)?;
        let denom = x_j - x_i;
        if denom == Scalar::ZERO {
            return Err(AppError::internal(format!(
                "Duplicate cosigner id {j} in selected set"
            )));
        }
        lambda *= x_j * denom.invert();
    }
    if lambda == Scalar::ZERO {
        return Err(AppError::internal("Lagrange coefficient is zero"));
    }
    Ok(lambda)
}

/// Scale a sub-share by its Lagrange coefficient. Fails closed on zero.
pub fn scale_share(share: &Scalar, lambda: &Scalar) -> AppResult<Scalar> {
    scalar::mul(share, lambda)
}

/// Sum co-signer contributions mod L. Fails closed on zero.
pub fn combine_shares(shares: &[Scalar]) -> AppResult<Scalar> {
    scalar::add(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_share() -> Scalar {
        scalar::hash_to_scalar(&[b"test server share"])
    }

    #[test]
    fn subshares_are_deterministic() {
        let share = server_share();
        let a = derive_subshare(&share, 2, 3).unwrap();
        let b = derive_subshare(&share, 2, 3).unwrap();
        assert_eq!(a, b);
        // A different threshold derives a different polynomial.
        let c = derive_subshare(&share, 3, 3).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn any_t_subset_recombines_to_the_original_share() {
        let share = server_share();
        let threshold = 2u16;
        let ids = [1u16, 2, 3];

        for subset in [[1u16, 2], [1, 3], [2, 3]] {
            let mut scaled = Vec::new();
            for &id in &subset {
                assert!(ids.contains(&id));
                let sub = derive_subshare(&share, threshold, id).unwrap();
                let lambda = lagrange_at_zero(&subset, id).unwrap();
                scaled.push(scale_share(&sub, &lambda).unwrap());
            }
            let combined = combine_shares(&scaled).unwrap();
            assert_eq!(
                scalar::encode_scalar(&combined),
                scalar::encode_scalar(&share),
                "subset {subset:?} must recombine byte-for-byte"
            );
        }
    }

    #[test]
    fn three_of_five_recombines() {
        let share = server_share();
        let subset = [2u16, 9, 500];
        let mut scaled = Vec::new();
        for &id in &subset {
            let sub = derive_subshare(&share, 3, id).unwrap();
            let lambda = lagrange_at_zero(&subset, id).unwrap();
            scaled.push(scale_share(&sub, &lambda).unwrap());
        }
        assert_eq!(combine_shares(&scaled).unwrap(), share);
    }

    #[test]
    fn rejects_invalid_ids() {
        let share = server_share();
        assert!(derive_subshare(&share, 2, 0).is_err());
        assert!(lagrange_at_zero(&[1, 2], 3).is_err());
        assert!(lagrange_at_zero(&[1, 1], 1).is_err());
    }
}
