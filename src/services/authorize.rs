//! One-shot authorization: every signing operation starts with a WebAuthn
//! assertion bound to the intent digest of the payload, and ends with a
//! single-use `mpcSessionId` scoped to exactly one `(signingDigest, userId)`.

use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{KeyMaterial, MpcSession, SigningPayload, SigningPurpose, VrfData};
use crate::services::MPC_SESSION_TTL;
use crate::utils::encoding::{b64u_encode, now_ms};
use crate::validation;
use crate::webauthn::{ensure_verified, VerifyAuthenticationRequest};
use crate::AppState;

#[derive(Debug)]
pub struct AuthorizeRequest {
    pub relayer_key_id: String,
    pub client_verifying_share_b64u: String,
    pub purpose: SigningPurpose,
    pub signing_digest_32: Vec<u8>,
    pub signing_payload: Value,
    pub vrf_data: VrfData,
    pub webauthn_authentication: Value,
}

#[derive(Debug)]
pub struct AuthorizeOutcome {
    pub mpc_session_id: String,
    pub expires_at_ms: u64,
}

pub async fn authorize(state: &AppState, request: AuthorizeRequest) -> AppResult<AuthorizeOutcome> {
    let user_id = request.vrf_data.user_id.trim().to_string();
    let rp_id = request.vrf_data.rp_id.trim().to_string();

    let signing_digest: [u8; 32] = request
        .signing_digest_32
        .as_slice()
        .try_into()
        .map_err(|_| AppError::invalid_body("signing_digest_32 must be 32 bytes"))?;

    // 1. Resolve key material.
    let material = state
        .strategy
        .resolve_key_material(
            &request.relayer_key_id,
            &user_id,
            Some(&rp_id),
            &request.client_verifying_share_b64u,
        )
        .await?;

    // 2. Recompute the intent and signing digests from the payload.
    let payload = SigningPayload::parse(request.purpose, &request.signing_payload)?;
    let bound_intent = request.vrf_data.intent_digest()?;
    let intent_digest = validation::ensure_intent_digest_matches(&payload, &user_id, &bound_intent)?;
    validation::ensure_signing_digest_derivable(&payload, &signing_digest)?;

    // 3. Verify the WebAuthn assertion.
    let outcome = state
        .webauthn
        .verify_authentication(VerifyAuthenticationRequest {
            vrf_data: &request.vrf_data,
            webauthn_authentication: &request.webauthn_authentication,
        })
        .await?;
    ensure_verified(&outcome)?;

    // 4. Access-key scope.
    validation::ensure_relayer_key_is_active_access_key(
        state.near.as_ref(),
        &user_id,
        &material.public_key_str(),
        payload.expected_signing_public_key(),
    )
    .await?;

    // 5. Mint the single-use session.
    mint_mpc_session(
        state,
        &material,
        request.purpose,
        &intent_digest,
        &signing_digest,
        &user_id,
        &rp_id,
        &request.client_verifying_share_b64u,
    )
    .await
}

/// Store a fresh single-use MPC session. Shared with session-backed
/// authorization.
pub(crate) async fn mint_mpc_session(
    state: &AppState,
    material: &KeyMaterial,
    purpose: SigningPurpose,
    intent_digest: &[u8; 32],
    signing_digest: &[u8; 32],
    user_id: &str,
    rp_id: &str,
    client_verifying_share_b64u: &str,
) -> AppResult<AuthorizeOutcome> {
    let mpc_session_id = Uuid::new_v4().to_string();
    let expires_at_ms = now_ms() + MPC_SESSION_TTL.as_millis() as u64;

    let session = MpcSession {
        expires_at_ms,
        relayer_key_id: material.relayer_key_id.clone(),
        purpose,
        intent_digest_b64u: b64u_encode(intent_digest),
        signing_digest_b64u: b64u_encode(signing_digest),
        user_id: user_id.to_string(),
        rp_id: rp_id.to_string(),
        client_verifying_share_b64u: client_verifying_share_b64u.trim().to_string(),
        participant_ids: state.strategy.participant_ids(),
    };

    state
        .stores
        .mpc
        .put_mpc(&mpc_session_id, &session, MPC_SESSION_TTL)
        .await?;

    tracing::debug!(
        mpc_session_id = %mpc_session_id,
        user_id = %user_id,
        "MPC session created"
    );
    metrics::counter!("threshold_mpc_sessions_total").increment(1);

    Ok(AuthorizeOutcome {
        mpc_session_id,
        expires_at_ms,
    })
}
