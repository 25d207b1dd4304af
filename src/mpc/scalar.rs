//! Arithmetic over the Ed25519 scalar field
//! `L = 2^252 + 27742317777372353535851937790883648493`.
//!
//! Scalars cross the wire as base64url-encoded 32-byte little-endian values;
//! every decoded secret must be canonical and, where noted, non-zero.

use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha512};

use crate::error::{AppError, AppResult};

/// Decode a canonical 32-byte little-endian scalar.
pub fn decode_scalar(bytes: &[u8]) -> AppResult<Scalar> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AppError::invalid_body(format!("Scalar must be 32 bytes, got {}", bytes.len())))?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(arr))
        .ok_or_else(|| AppError::invalid_body("Scalar is not canonical mod L"))
}

/// Encode the canonical representative in `[0, L)`.
pub fn encode_scalar(scalar: &Scalar) -> [u8; 32] {
    scalar.to_bytes()
}

/// Sum of scalars mod L. A zero sum is an integrity failure.
pub fn add(scalars: &[Scalar]) -> AppResult<Scalar> {
    let sum: Scalar = scalars.iter().sum();
    if sum == Scalar::ZERO {
        return Err(AppError::internal("Scalar sum is zero"));
    }
    Ok(sum)
}

/// Product mod L. A zero product is an integrity failure.
pub fn mul(scalar: &Scalar, factor: &Scalar) -> AppResult<Scalar> {
    let product = scalar * factor;
    if product == Scalar::ZERO {
        return Err(AppError::internal("Scalar product is zero"));
    }
    Ok(product)
}

/// Multiplicative inverse mod L.
pub fn inv(scalar: &Scalar) -> AppResult<Scalar> {
    if *scalar == Scalar::ZERO {
        return Err(AppError::internal("Zero scalar is not invertible"));
    }
    Ok(scalar.invert())
}

/// SHA-512 over the concatenated chunks, reduced wide mod L.
pub fn hash_to_scalar(chunks: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let wide: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Participant / co-signer ids double as the polynomial `x` coordinate.
pub fn u16_to_scalar(id: u16) -> AppResult<Scalar> {
    if id == 0 {
        return Err(AppError::invalid_body(
            "Participant id must be in [1, 65535]",
        ));
    }
    Ok(Scalar::from(id as u64))
}

/// 32-byte little-endian scalar encoding of a participant id.
pub fn u16_to_scalar_bytes(id: u16) -> AppResult<[u8; 32]> {
    Ok(u16_to_scalar(id)?.to_bytes())
}
