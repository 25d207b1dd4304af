//! Multi-use auth sessions: one WebAuthn prompt buys a clamped budget of
//! signing authorizations under a policy the assertion itself approved.

use serde_json::Value;

use crate::error::{AppError, AppResult, ErrorCode};
use crate::models::{
    AuthSession, SessionPolicy, SigningPayload, SigningPurpose, VrfData, SESSION_POLICY_VERSION,
};
use crate::services::authorize::{mint_mpc_session, AuthorizeOutcome};
use crate::services::{AUTH_SESSION_MAX_TTL_MS, AUTH_SESSION_MAX_USES};
use crate::utils::encoding::now_ms;
use crate::validation;
use crate::webauthn::{ensure_verified, VerifyAuthenticationRequest};
use crate::AppState;

#[derive(Debug)]
pub struct CreateSessionRequest {
    pub relayer_key_id: String,
    pub client_verifying_share_b64u: String,
    pub session_policy: Value,
    pub vrf_data: VrfData,
    pub webauthn_authentication: Value,
}

#[derive(Debug)]
pub struct CreateSessionOutcome {
    pub session_id: String,
    pub expires_at_ms: u64,
    pub remaining_uses: u32,
}

pub async fn create_session(
    state: &AppState,
    request: CreateSessionRequest,
) -> AppResult<CreateSessionOutcome> {
    // 1. Strict policy parse and structural checks.
    let mut policy: SessionPolicy = serde_json::from_value(request.session_policy.clone())
        .map_err(|e| AppError::invalid_body(format!("Invalid sessionPolicy: {e}")))?;
    if policy.version != SESSION_POLICY_VERSION {
        return Err(AppError::invalid_body(format!(
            "sessionPolicy.version must be {SESSION_POLICY_VERSION}"
        )));
    }
    if policy.session_id.trim().is_empty() {
        return Err(AppError::invalid_body("sessionPolicy.sessionId is required"));
    }
    if policy.relayer_key_id.trim() != request.relayer_key_id.trim() {
        return Err(AppError::invalid_body(
            "sessionPolicy.relayerKeyId does not match relayerKeyId",
        ));
    }

    let server_set = state.strategy.participant_ids();
    let participant_ids = match &policy.participant_ids {
        None => server_set.clone(),
        Some(ids) => {
            let mut ids = ids.clone();
            ids.sort_unstable();
            ids.dedup();
            if ids.len() != 2 {
                return Err(AppError::new(
                    ErrorCode::MultiPartyNotSupported,
                    "sessionPolicy.participantIds must contain exactly 2 ids",
                ));
            }
            if ids != server_set {
                return Err(AppError::new(
                    ErrorCode::MultiPartyNotSupported,
                    "sessionPolicy.participantIds does not match the server signer set",
                ));
            }
            ids
        }
    };

    let user_id = policy.near_account_id.trim().to_string();
    let rp_id = policy.rp_id.trim().to_string();
    if request.vrf_data.user_id.trim() != user_id || request.vrf_data.rp_id.trim() != rp_id {
        return Err(AppError::unauthorized(
            "vrf_data does not match sessionPolicy account/rpId",
        ));
    }

    // 2. Resolve key material, then clamp the policy *before* recomputing
    //    its digest.
    let material = state
        .strategy
        .resolve_key_material(
            &request.relayer_key_id,
            &user_id,
            Some(&rp_id),
            &request.client_verifying_share_b64u,
        )
        .await?;

    policy.ttl_ms = policy.ttl_ms.min(AUTH_SESSION_MAX_TTL_MS);
    policy.remaining_uses = policy.remaining_uses.min(AUTH_SESSION_MAX_USES);
    if policy.ttl_ms == 0 || policy.remaining_uses == 0 {
        return Err(AppError::invalid_body(
            "sessionPolicy ttlMs and remainingUses must be > 0",
        ));
    }

    let expected_digest = validation::compute_session_policy_digest(&policy)?;
    if request.vrf_data.session_policy_digest()? != expected_digest {
        return Err(AppError::new(
            ErrorCode::SessionPolicyDigestMismatch,
            "Clamped session policy does not hash to vrf_data.session_policy_digest_32",
        ));
    }

    // Idempotent replay: an existing session is returned as-is, with its
    // remaining budget untouched.
    if let Some(existing) = state.stores.auth.get_session(&policy.session_id).await? {
        if existing.user_id != user_id
            || existing.relayer_key_id != material.relayer_key_id
            || existing.rp_id != rp_id
            || existing.participant_ids != participant_ids
        {
            return Err(AppError::unauthorized(
                "sessionId already exists with different bindings",
            ));
        }
        let remaining = state
            .stores
            .auth
            .remaining_uses(&policy.session_id)
            .await?
            .unwrap_or(0);
        tracing::debug!(session_id = %policy.session_id, "Auth session replayed");
        return Ok(CreateSessionOutcome {
            session_id: policy.session_id,
            expires_at_ms: existing.expires_at_ms,
            remaining_uses: remaining,
        });
    }

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
        None,
    )
    .await?;

    // 5. Persist.
    let expires_at_ms = now_ms() + policy.ttl_ms;
    let session = AuthSession {
        expires_at_ms,
        relayer_key_id: material.relayer_key_id.clone(),
        user_id,
        rp_id,
        participant_ids,
    };
    state
        .stores
        .auth
        .put_session(
            &policy.session_id,
            &session,
            std::time::Duration::from_millis(policy.ttl_ms),
            policy.remaining_uses,
        )
        .await?;

    tracing::info!(
        session_id = %policy.session_id,
        remaining_uses = policy.remaining_uses,
        "Auth session created"
    );
    metrics::counter!("threshold_auth_sessions_total").increment(1);

    Ok(CreateSessionOutcome {
        session_id: policy.session_id,
        expires_at_ms,
        remaining_uses: policy.remaining_uses,
    })
}

#[derive(Debug)]
pub struct SessionAuthorizeRequest {
    pub session_id: String,
    pub relayer_key_id: String,
    pub client_verifying_share_b64u: String,
    pub purpose: SigningPurpose,
    pub signing_digest_32: Vec<u8>,
    pub signing_payload: Value,
    pub near_account_id: String,
}

/// Consume one use of an auth session and mint a single-use MPC session.
/// Session mode recomputes only the signing digest; the intent digest is not
/// re-bound to a fresh assertion.
pub async fn authorize_with_session(
    state: &AppState,
    request: SessionAuthorizeRequest,
) -> AppResult<AuthorizeOutcome> {
    let signing_digest: [u8; 32] = request
        .signing_digest_32
        .as_slice()
        .try_into()
        .map_err(|_| AppError::invalid_body("signing_digest_32 must be 32 bytes"))?;

    let Some((session, remaining)) = state.stores.auth.consume_use(&request.session_id).await?
    else {
        return Err(AppError::unauthorized(
            "Auth session expired, exhausted, or invalid",
        ));
    };

    if session.is_expired() {
        return Err(AppError::unauthorized("Auth session expired or invalid"));
    }
    if session.user_id != request.near_account_id.trim() {
        return Err(AppError::unauthorized("Auth session is bound to a different user"));
    }
    if session.relayer_key_id != request.relayer_key_id.trim() {
        return Err(AppError::unauthorized(
            "Auth session is bound to a different relayerKeyId",
        ));
    }
    if session.participant_ids != state.strategy.participant_ids() {
        return Err(AppError::new(
            ErrorCode::MultiPartyNotSupported,
            "Auth session participant set does not match the server signer set",
        ));
    }

    let material = state
        .strategy
        .resolve_key_material(
            &request.relayer_key_id,
            &session.user_id,
            Some(&session.rp_id),
            &request.client_verifying_share_b64u,
        )
        .await?;

    let payload = SigningPayload::parse(request.purpose, &request.signing_payload)?;
    validation::ensure_signing_digest_derivable(&payload, &signing_digest)?;
    // The intent digest still binds the session record to this payload, even
    // though no fresh assertion re-approves it.
    let intent_digest = validation::compute_intent_digest(&payload, &session.user_id)?;

    validation::ensure_relayer_key_is_active_access_key(
        state.near.as_ref(),
        &session.user_id,
        &material.public_key_str(),
        payload.expected_signing_public_key(),
    )
    .await?;

    tracing::debug!(
        session_id = %request.session_id,
        remaining_uses = remaining,
        "Auth session use consumed"
    );

    mint_mpc_session(
        state,
        &material,
        request.purpose,
        &intent_digest,
        &signing_digest,
        &session.user_id,
        &session.rp_id,
        &request.client_verifying_share_b64u,
    )
    .await
}
