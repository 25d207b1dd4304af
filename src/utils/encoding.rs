use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;

use crate::error::{AppError, AppResult};

// ---------------------------------------------------------------------------
// base64url (no padding)
// ---------------------------------------------------------------------------

pub fn b64u_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn b64u_decode(value: &str) -> AppResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim().as_bytes())
        .map_err(|e| AppError::invalid_body(format!("Invalid base64url: {e}")))
}

/// Decode a base64url value that must be exactly 32 bytes.
pub fn b64u_decode_32(value: &str) -> AppResult<[u8; 32]> {
    let bytes = b64u_decode(value)?;
    bytes.as_slice().try_into().map_err(|_| {
        AppError::invalid_body(format!("Expected 32 bytes, got {}", bytes.len()))
    })
}

// ---------------------------------------------------------------------------
// NEAR-format Ed25519 public keys: "ed25519:" + base58(32 bytes)
// ---------------------------------------------------------------------------

pub fn format_near_public_key(bytes: &[u8; 32]) -> String {
    format!("ed25519:{}", bs58::encode(bytes).into_string())
}

pub fn parse_near_public_key(public_key: &str) -> AppResult<[u8; 32]> {
    let trimmed = public_key.trim();
    let decoded = bs58::decode(trimmed.strip_prefix("ed25519:").unwrap_or(trimmed))
        .into_vec()
        .map_err(|e| AppError::invalid_body(format!("Invalid public key base58: {e}")))?;
    decoded.as_slice().try_into().map_err(|_| {
        AppError::invalid_body(format!(
            "Invalid public key length: expected 32 bytes, got {}",
            decoded.len()
        ))
    })
}

/// Strip the `ed25519:` prefix so two key strings compare by payload.
pub fn normalize_near_public_key(public_key: &str) -> &str {
    let trimmed = public_key.trim();
    trimmed.strip_prefix("ed25519:").unwrap_or(trimmed)
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64u_roundtrip() {
        let bytes = [7u8; 32];
        let encoded = b64u_encode(&bytes);
        assert!(!encoded.contains('='));
        assert_eq!(b64u_decode_32(&encoded).unwrap(), bytes);
    }

    #[test]
    fn b64u_rejects_wrong_length() {
        let encoded = b64u_encode(&[1u8; 16]);
        assert!(b64u_decode_32(&encoded).is_err());
    }

    #[test]
    fn near_public_key_roundtrip() {
        let bytes = [42u8; 32];
        let formatted = format_near_public_key(&bytes);
        assert!(formatted.starts_with("ed25519:"));
        assert_eq!(parse_near_public_key(&formatted).unwrap(), bytes);
        // Raw base58 without the prefix parses too.
        assert_eq!(
            parse_near_public_key(normalize_near_public_key(&formatted)).unwrap(),
            bytes
        );
    }

    #[test]
    fn normalize_strips_prefix_only() {
        assert_eq!(normalize_near_public_key("ed25519:abc"), "abc");
        assert_eq!(normalize_near_public_key(" abc "), "abc");
    }
}
