//! HMAC-SHA256 signed grant tokens used to authenticate coordinator calls to
//! peer relayers and co-signers: `b64url(payload_json) . b64url(tag)`.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AppError, AppResult};
use crate::models::MpcSession;
use crate::utils::encoding::{b64u_decode, b64u_encode, now_ms};

type HmacSha256 = Hmac<Sha256>;

pub const GRANT_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantType {
    /// Delegates the whole MPC session to a peer relayer.
    #[serde(rename = "coordinator_grant_v1")]
    Coordinator,
    /// Delegates a signing slot to a co-signer holding a Shamir sub-share.
    #[serde(rename = "cosigner_grant_v1")]
    Cosigner,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Coordinator => "coordinator_grant_v1",
            GrantType::Cosigner => "cosigner_grant_v1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantPayload {
    pub v: u8,
    pub typ: GrantType,
    /// Issued-at / expiry, Unix milliseconds.
    pub iat: u64,
    pub exp: u64,
    pub mpc_session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_participant_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosigner_id: Option<u16>,
    pub mpc_session: MpcSession,
}

fn mac(secret: &[u8; 32]) -> HmacSha256 {
    // 32-byte keys are always accepted by HMAC.
    HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length")
}

/// Sign a grant payload into its wire token.
pub fn sign_grant(secret: &[u8; 32], payload: &GrantPayload) -> AppResult<String> {
    let payload_json = serde_json::to_vec(payload)
        .map_err(|e| AppError::internal(format!("Failed to serialize grant payload: {e}")))?;

    let mut mac = mac(secret);
    mac.update(&payload_json);
    let tag = mac.finalize().into_bytes();

    Ok(format!(
        "{}.{}",
        b64u_encode(&payload_json),
        b64u_encode(&tag)
    ))
}

/// Verify a wire token and return the typed payload. Every rejection is an
/// `unauthorized` with a precise reason.
pub fn verify_grant(
    secret: &[u8; 32],
    token: &str,
    expected_typ: GrantType,
) -> AppResult<GrantPayload> {
    verify_grant_one_of(secret, token, std::slice::from_ref(&expected_typ))
}

/// Verify a token whose type may be any of `expected`. Used by the internal
/// co-sign endpoints, which accept both grant flavors.
pub fn verify_grant_one_of(
    secret: &[u8; 32],
    token: &str,
    expected: &[GrantType],
) -> AppResult<GrantPayload> {
    let (payload_b64u, sig_b64u) = token
        .trim()
        .split_once('.')
        .ok_or_else(|| AppError::unauthorized("Grant token is not payload.signature"))?;

    let payload_json = b64u_decode(payload_b64u)
        .map_err(|_| AppError::unauthorized("Grant payload is not valid base64url"))?;
    let tag = b64u_decode(sig_b64u)
        .map_err(|_| AppError::unauthorized("Grant signature is not valid base64url"))?;
    if tag.len() != 32 {
        return Err(AppError::unauthorized("Grant signature must be 32 bytes"));
    }

    let mut mac = mac(secret);
    mac.update(&payload_json);
    mac.verify_slice(&tag)
        .map_err(|_| AppError::unauthorized("Grant signature mismatch"))?;

    let payload: GrantPayload = serde_json::from_slice(&payload_json)
        .map_err(|e| AppError::unauthorized(format!("Grant payload is not valid JSON: {e}")))?;

    if payload.v != GRANT_VERSION {
        return Err(AppError::unauthorized(format!(
            "Unsupported grant version {}",
            payload.v
        )));
    }
    if !expected.contains(&payload.typ) {
        return Err(AppError::unauthorized(format!(
            "Unexpected grant type {}",
            payload.typ.as_str()
        )));
    }
    if payload.iat > payload.exp {
        return Err(AppError::unauthorized("Grant iat is after exp"));
    }
    if payload.exp <= now_ms() {
        return Err(AppError::unauthorized("Grant is expired"));
    }
    if payload.mpc_session.is_expired() {
        return Err(AppError::unauthorized("Grant MPC session is expired"));
    }

    Ok(payload)
}
