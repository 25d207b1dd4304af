//! The two-round signing endpoints and their internal co-sign analogues.
//!
//! `sign/init` consumes an MPC session exactly once and runs round 1;
//! `sign/finalize` consumes the resulting signing session exactly once and
//! runs round 2. Depending on configuration the server share is used
//! locally, delegated whole to a single peer relayer (coordinator grants),
//! or Shamir-split across a t-of-n co-signer fleet (co-signer grants).

use std::collections::BTreeMap;
use std::time::Duration;

use curve25519_dalek::scalar::Scalar;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult, ErrorCode};
use crate::models::{
    Commitments, CoordinatorSigningSession, CosignerSlot, FanOutMode, MpcSession, SigningSession,
};
use crate::mpc::grant::{self, GrantPayload, GrantType};
use crate::mpc::{cosigner, frost, scalar};
use crate::services::SIGNING_SESSION_TTL;
use crate::utils::encoding::{
    b64u_decode, b64u_decode_32, b64u_encode, now_ms, parse_near_public_key,
};
use crate::validation;
use crate::AppState;

// ---------------------------------------------------------------------------
// Public request / outcome types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SignInitRequest {
    pub mpc_session_id: String,
    pub relayer_key_id: String,
    pub near_account_id: String,
    pub signing_digest_b64u: String,
    pub client_commitments: Commitments,
}

#[derive(Debug)]
pub struct SignInitOutcome {
    pub signing_session_id: String,
    pub commitments_by_id: BTreeMap<String, Commitments>,
    pub relayer_verifying_shares_by_id: BTreeMap<String, String>,
    pub participant_ids: Vec<u16>,
}

#[derive(Debug)]
pub struct SignFinalizeRequest {
    pub signing_session_id: String,
    pub client_signature_share_b64u: String,
}

#[derive(Debug)]
pub struct SignFinalizeOutcome {
    pub relayer_signature_shares_by_id: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Internal co-sign wire types (used by both the fan-out client and the
// handlers on the receiving relayer)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosignInitRequest {
    pub grant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_share_b64u: Option<String>,
    pub client_commitments: Commitments,
    pub signing_digest_b64u: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosignInitResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitments: Option<Commitments>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relayer_verifying_share_b64u: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosignFinalizeRequest {
    pub grant: String,
    pub signing_session_id: String,
    pub client_commitments: Commitments,
    /// Aggregated relayer commitments for the transcript.
    pub relayer_commitments: Commitments,
    #[serde(default)]
    pub selected_cosigner_ids: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosignFinalizeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_share_b64u: Option<String>,
}

// ---------------------------------------------------------------------------
// sign/init
// ---------------------------------------------------------------------------

pub async fn sign_init(state: &AppState, request: SignInitRequest) -> AppResult<SignInitOutcome> {
    let Some(session) = state.stores.mpc.take_mpc(&request.mpc_session_id).await? else {
        return Err(AppError::unauthorized("MPC session expired or invalid"));
    };
    if session.is_expired() {
        return Err(AppError::unauthorized("MPC session expired or invalid"));
    }

    // Post-take checks: restore the session on failure so a transient client
    // error does not burn the authorization.
    if let Err(err) = check_init_request(&session, &request) {
        restore_mpc(state, &request.mpc_session_id, &session).await;
        return Err(err);
    }

    let (client_id, relayer_member) = match split_participants(state, &session.participant_ids) {
        Ok(pair) => pair,
        Err(err) => {
            restore_mpc(state, &request.mpc_session_id, &session).await;
            return Err(err);
        }
    };

    // The group public key is the relayer access key on the user's account.
    let scope = validation::ensure_relayer_key_is_active_access_key(
        state.near.as_ref(),
        &session.user_id,
        &session.relayer_key_id,
        None,
    )
    .await;
    if let Err(err) = scope {
        restore_mpc(state, &request.mpc_session_id, &session).await;
        return Err(err);
    }

    let result = if !state.config.coordinator_peers.is_empty() {
        init_peer_mode(state, &request, &session, client_id, relayer_member).await
    } else if !state.config.cosigners.is_empty() {
        init_cosigner_mode(state, &request, &session, client_id, relayer_member).await
    } else {
        init_local_mode(state, &request, &session, client_id, relayer_member).await
    };

    if result.is_err() {
        restore_mpc(state, &request.mpc_session_id, &session).await;
    }
    result
}

fn check_init_request(session: &MpcSession, request: &SignInitRequest) -> AppResult<()> {
    if session.relayer_key_id != request.relayer_key_id.trim() {
        return Err(AppError::unauthorized(
            "relayerKeyId does not match the MPC session",
        ));
    }
    if session.user_id != request.near_account_id.trim() {
        return Err(AppError::unauthorized(
            "nearAccountId does not match the MPC session",
        ));
    }
    if session.signing_digest_b64u != request.signing_digest_b64u.trim() {
        return Err(AppError::unauthorized(
            "signingDigest does not match the MPC session",
        ));
    }
    Ok(())
}

/// Split a 2-party set into (client id, relayer member id).
fn split_participants(state: &AppState, participant_ids: &[u16]) -> AppResult<(u16, u16)> {
    if participant_ids.len() != 2 {
        return Err(AppError::new(
            ErrorCode::MultiPartyNotSupported,
            format!(
                "Multi-party signing is not supported (got participantIds={participant_ids:?})"
            ),
        ));
    }
    let client_id = state.strategy.client_participant_id();
    let relayer_member = if participant_ids[0] == client_id {
        participant_ids[1]
    } else if participant_ids[1] == client_id {
        participant_ids[0]
    } else {
        return Err(AppError::new(
            ErrorCode::MultiPartyNotSupported,
            format!(
                "Participant set {participant_ids:?} does not include the client participant {client_id}"
            ),
        ));
    };
    Ok((client_id, relayer_member))
}

async fn init_local_mode(
    state: &AppState,
    request: &SignInitRequest,
    session: &MpcSession,
    client_id: u16,
    relayer_member: u16,
) -> AppResult<SignInitOutcome> {
    let material = state
        .strategy
        .resolve_key_material(
            &session.relayer_key_id,
            &session.user_id,
            Some(&session.rp_id),
            &session.client_verifying_share_b64u,
        )
        .await?;

    let round1 = frost::round1_commit(&material.server_signing_share)?;

    let mut commitments_by_id = BTreeMap::new();
    commitments_by_id.insert(client_id.to_string(), request.client_commitments.clone());
    commitments_by_id.insert(relayer_member.to_string(), round1.commitments.clone());

    let signing_session_id = Uuid::new_v4().to_string();
    let record = SigningSession {
        expires_at_ms: now_ms() + SIGNING_SESSION_TTL.as_millis() as u64,
        mpc_session_id: request.mpc_session_id.clone(),
        relayer_key_id: session.relayer_key_id.clone(),
        signing_digest_b64u: session.signing_digest_b64u.clone(),
        user_id: session.user_id.clone(),
        rp_id: session.rp_id.clone(),
        client_verifying_share_b64u: session.client_verifying_share_b64u.clone(),
        commitments_by_id: commitments_by_id.clone(),
        server_nonces_b64u: round1.nonces_b64u,
        server_signing_share_b64u: None,
        cosigner_id: None,
        participant_ids: session.participant_ids.clone(),
    };
    state
        .stores
        .mpc
        .put_signing(&signing_session_id, &record, SIGNING_SESSION_TTL)
        .await?;

    tracing::debug!(signing_session_id = %signing_session_id, "Round 1 complete (local)");

    let mut verifying_shares = BTreeMap::new();
    verifying_shares.insert(
        relayer_member.to_string(),
        material.server_verifying_share_b64u(),
    );

    Ok(SignInitOutcome {
        signing_session_id,
        commitments_by_id,
        relayer_verifying_shares_by_id: verifying_shares,
        participant_ids: session.participant_ids.clone(),
    })
}

async fn init_peer_mode(
    state: &AppState,
    request: &SignInitRequest,
    session: &MpcSession,
    client_id: u16,
    relayer_member: u16,
) -> AppResult<SignInitOutcome> {
    let secret = coordinator_secret(&state.config)?;
    let urls: Vec<String> = state
        .config
        .coordinator_peers
        .iter()
        .filter(|p| p.id == relayer_member)
        .map(|p| p.relayer_url.clone())
        .collect();
    if urls.is_empty() {
        return Err(AppError::new(
            ErrorCode::MultiPartyNotSupported,
            format!("No coordinator peer is configured for participant {relayer_member}"),
        ));
    }

    let now = now_ms();
    let grant_token = grant::sign_grant(
        &secret,
        &GrantPayload {
            v: grant::GRANT_VERSION,
            typ: GrantType::Coordinator,
            iat: now,
            exp: session.expires_at_ms,
            mpc_session_id: request.mpc_session_id.clone(),
            peer_participant_id: Some(relayer_member),
            cosigner_id: None,
            mpc_session: session.clone(),
        },
    )?;

    let init_request = CosignInitRequest {
        grant: grant_token.clone(),
        sub_share_b64u: None,
        client_commitments: request.client_commitments.clone(),
        signing_digest_b64u: session.signing_digest_b64u.clone(),
    };
    let response: CosignInitResponse =
        post_peer(state, &urls, "/threshold-ed25519/internal/cosign/init", &init_request)
            .await
            .map_err(|e| {
                AppError::unavailable(format!("Coordinator peer unreachable: {}", e.message))
            })?;

    let peer_session_id = response
        .signing_session_id
        .ok_or_else(|| AppError::internal("Peer cosign/init reply missing signingSessionId"))?;
    let peer_commitments = response
        .commitments
        .ok_or_else(|| AppError::internal("Peer cosign/init reply missing commitments"))?;
    let peer_verifying_share = response
        .relayer_verifying_share_b64u
        .ok_or_else(|| AppError::internal("Peer cosign/init reply missing verifying share"))?;

    let mut commitments_by_id = BTreeMap::new();
    commitments_by_id.insert(client_id.to_string(), request.client_commitments.clone());
    commitments_by_id.insert(relayer_member.to_string(), peer_commitments.clone());

    let signing_session_id = Uuid::new_v4().to_string();
    let record = CoordinatorSigningSession {
        expires_at_ms: now_ms() + SIGNING_SESSION_TTL.as_millis() as u64,
        mpc_session_id: request.mpc_session_id.clone(),
        relayer_key_id: session.relayer_key_id.clone(),
        group_public_key: session.relayer_key_id.clone(),
        signing_digest_b64u: session.signing_digest_b64u.clone(),
        user_id: session.user_id.clone(),
        rp_id: session.rp_id.clone(),
        client_verifying_share_b64u: session.client_verifying_share_b64u.clone(),
        mode: FanOutMode::Peer,
        selected_cosigner_ids: vec![relayer_member],
        slots: vec![CosignerSlot {
            id: relayer_member,
            relayer_url: urls[0].clone(),
            grant: grant_token,
            peer_signing_session_id: peer_session_id,
        }],
        client_commitments: request.client_commitments.clone(),
        server_commitments: peer_commitments.clone(),
        participant_ids: session.participant_ids.clone(),
    };
    state
        .stores
        .mpc
        .put_coordinator_signing(&signing_session_id, &record, SIGNING_SESSION_TTL)
        .await?;

    tracing::debug!(
        signing_session_id = %signing_session_id,
        peer = relayer_member,
        "Round 1 complete (peer delegation)"
    );

    let mut verifying_shares = BTreeMap::new();
    verifying_shares.insert(relayer_member.to_string(), peer_verifying_share);

    Ok(SignInitOutcome {
        signing_session_id,
        commitments_by_id,
        relayer_verifying_shares_by_id: verifying_shares,
        participant_ids: session.participant_ids.clone(),
    })
}

async fn init_cosigner_mode(
    state: &AppState,
    request: &SignInitRequest,
    session: &MpcSession,
    client_id: u16,
    relayer_member: u16,
) -> AppResult<SignInitOutcome> {
    let secret = coordinator_secret(&state.config)?;
    let threshold = state.config.cosigner_threshold.ok_or_else(|| {
        AppError::missing_config("THRESHOLD_ED25519_RELAYER_COSIGNER_T is required for co-signers")
    })?;

    // Distinct co-signer ids, each with its list of alternate URLs.
    let mut urls_by_id: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for peer in &state.config.cosigners {
        urls_by_id
            .entry(peer.cosigner_id)
            .or_default()
            .push(peer.relayer_url.clone());
    }
    if threshold == 0 || threshold as usize > urls_by_id.len() {
        return Err(AppError::missing_config(format!(
            "Cosigner threshold {threshold} is not satisfiable with {} cosigners",
            urls_by_id.len()
        )));
    }

    let material = state
        .strategy
        .resolve_key_material(
            &session.relayer_key_id,
            &session.user_id,
            Some(&session.rp_id),
            &session.client_verifying_share_b64u,
        )
        .await?;
    let server_share = scalar::decode_scalar(material.server_signing_share.as_ref())?;

    // Round 1 fan-out: every configured co-signer commits with its
    // deterministic sub-share.
    let now = now_ms();
    let mut calls = Vec::new();
    for (&id, urls) in &urls_by_id {
        let sub_share = cosigner::derive_subshare(&server_share, threshold, id)?;
        let grant_token = grant::sign_grant(
            &secret,
            &GrantPayload {
                v: grant::GRANT_VERSION,
                typ: GrantType::Cosigner,
                iat: now,
                exp: session.expires_at_ms,
                mpc_session_id: request.mpc_session_id.clone(),
                peer_participant_id: None,
                cosigner_id: Some(id),
                mpc_session: session.clone(),
            },
        )?;
        let init_request = CosignInitRequest {
            grant: grant_token.clone(),
            sub_share_b64u: Some(b64u_encode(&scalar::encode_scalar(&sub_share))),
            client_commitments: request.client_commitments.clone(),
            signing_digest_b64u: session.signing_digest_b64u.clone(),
        };
        let urls = urls.clone();
        let state = state.clone();
        calls.push(async move {
            let result: AppResult<CosignInitResponse> = post_peer(
                &state,
                &urls,
                "/threshold-ed25519/internal/cosign/init",
                &init_request,
            )
            .await;
            (id, urls, grant_token, result)
        });
    }

    let mut successes = Vec::new();
    for (id, urls, grant_token, result) in futures::future::join_all(calls).await {
        match result {
            Ok(response) => {
                let session_id = response.signing_session_id.unwrap_or_default();
                match response.commitments {
                    Some(commitments) if !session_id.is_empty() => {
                        successes.push((id, urls, grant_token, session_id, commitments));
                    }
                    _ => {
                        tracing::warn!(cosigner_id = id, "Cosigner replied without commitments");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(cosigner_id = id, error = %err.message, "Cosigner round 1 failed");
                metrics::counter!("threshold_cosigner_failures_total").increment(1);
            }
        }
    }

    if successes.len() < threshold as usize {
        return Err(AppError::unavailable(format!(
            "Need at least {threshold} relayer cosigners; got {}",
            successes.len()
        )));
    }

    // Deterministic selection: the first t responders ordered by id.
    successes.sort_by_key(|(id, ..)| *id);
    successes.truncate(threshold as usize);
    let selected_ids: Vec<u16> = successes.iter().map(|(id, ..)| *id).collect();

    let server_commitments = frost::aggregate_commitments(
        &successes
            .iter()
            .map(|(.., commitments)| commitments.clone())
            .collect::<Vec<_>>(),
    )?;

    let mut commitments_by_id = BTreeMap::new();
    commitments_by_id.insert(client_id.to_string(), request.client_commitments.clone());
    commitments_by_id.insert(relayer_member.to_string(), server_commitments.clone());

    let signing_session_id = Uuid::new_v4().to_string();
    let record = CoordinatorSigningSession {
        expires_at_ms: now_ms() + SIGNING_SESSION_TTL.as_millis() as u64,
        mpc_session_id: request.mpc_session_id.clone(),
        relayer_key_id: session.relayer_key_id.clone(),
        group_public_key: session.relayer_key_id.clone(),
        signing_digest_b64u: session.signing_digest_b64u.clone(),
        user_id: session.user_id.clone(),
        rp_id: session.rp_id.clone(),
        client_verifying_share_b64u: session.client_verifying_share_b64u.clone(),
        mode: FanOutMode::Cosigner,
        selected_cosigner_ids: selected_ids.clone(),
        slots: successes
            .iter()
            .map(|(id, urls, grant_token, session_id, _)| CosignerSlot {
                id: *id,
                relayer_url: urls[0].clone(),
                grant: grant_token.clone(),
                peer_signing_session_id: session_id.clone(),
            })
            .collect(),
        client_commitments: request.client_commitments.clone(),
        server_commitments: server_commitments.clone(),
        participant_ids: session.participant_ids.clone(),
    };
    state
        .stores
        .mpc
        .put_coordinator_signing(&signing_session_id, &record, SIGNING_SESSION_TTL)
        .await?;

    tracing::debug!(
        signing_session_id = %signing_session_id,
        selected = ?selected_ids,
        "Round 1 complete (cosigner fleet)"
    );

    let mut verifying_shares = BTreeMap::new();
    verifying_shares.insert(
        relayer_member.to_string(),
        material.server_verifying_share_b64u(),
    );

    Ok(SignInitOutcome {
        signing_session_id,
        commitments_by_id,
        relayer_verifying_shares_by_id: verifying_shares,
        participant_ids: session.participant_ids.clone(),
    })
}

// ---------------------------------------------------------------------------
// sign/finalize
// ---------------------------------------------------------------------------

pub async fn sign_finalize(
    state: &AppState,
    request: SignFinalizeRequest,
) -> AppResult<SignFinalizeOutcome> {
    // The client share rides along for symmetry but aggregation is a client
    // responsibility; only the session id drives the server's round 2.
    tracing::trace!(
        signing_session_id = %request.signing_session_id,
        has_client_share = !request.client_signature_share_b64u.is_empty(),
        "sign/finalize"
    );

    if let Some(session) = state
        .stores
        .mpc
        .take_signing(&request.signing_session_id)
        .await?
    {
        if session.is_expired() {
            return Err(AppError::unauthorized("Signing session expired or invalid"));
        }
        let result = finalize_local(state, &session).await;
        if result.is_err() {
            restore_signing(state, &request.signing_session_id, &session).await;
        }
        return result;
    }

    if let Some(session) = state
        .stores
        .mpc
        .take_coordinator_signing(&request.signing_session_id)
        .await?
    {
        if session.is_expired() {
            return Err(AppError::unauthorized("Signing session expired or invalid"));
        }
        let result = finalize_fan_out(state, &session).await;
        if result.is_err() {
            restore_coordinator(state, &request.signing_session_id, &session).await;
        }
        return result;
    }

    Err(AppError::unauthorized("Signing session expired or invalid"))
}

async fn finalize_local(state: &AppState, session: &SigningSession) -> AppResult<SignFinalizeOutcome> {
    let (client_id, relayer_member) = split_participants(state, &session.participant_ids)?;
    let client_commitments = session
        .commitments_by_id
        .get(&client_id.to_string())
        .ok_or_else(|| AppError::internal("Signing session is missing client commitments"))?;
    let server_commitments = session
        .commitments_by_id
        .get(&relayer_member.to_string())
        .ok_or_else(|| AppError::internal("Signing session is missing server commitments"))?;

    // The server share is re-resolved, never stored with the session.
    let material = state
        .strategy
        .resolve_key_material(
            &session.relayer_key_id,
            &session.user_id,
            Some(&session.rp_id),
            &session.client_verifying_share_b64u,
        )
        .await?;

    let message = b64u_decode(&session.signing_digest_b64u)?;
    let share = frost::round2_sign_local(frost::LocalRound2Args {
        signing_share: &material.server_signing_share,
        nonces_b64u: &session.server_nonces_b64u,
        group_public_key: &material.public_key,
        message: &message,
        client_commitments,
        relayer_commitments: server_commitments,
        client_id,
        relayer_id: relayer_member,
    })?;

    tracing::debug!(user_id = %session.user_id, "Round 2 complete (local)");
    metrics::counter!("threshold_signatures_total", "mode" => "local").increment(1);

    let mut shares = BTreeMap::new();
    shares.insert(relayer_member.to_string(), b64u_encode(&share));
    Ok(SignFinalizeOutcome {
        relayer_signature_shares_by_id: shares,
    })
}

async fn finalize_fan_out(
    state: &AppState,
    session: &CoordinatorSigningSession,
) -> AppResult<SignFinalizeOutcome> {
    let (_, relayer_member) = split_participants(state, &session.participant_ids)?;

    let mut calls = Vec::new();
    for slot in &session.slots {
        let finalize_request = CosignFinalizeRequest {
            grant: slot.grant.clone(),
            signing_session_id: slot.peer_signing_session_id.clone(),
            client_commitments: session.client_commitments.clone(),
            relayer_commitments: session.server_commitments.clone(),
            selected_cosigner_ids: match session.mode {
                FanOutMode::Peer => Vec::new(),
                FanOutMode::Cosigner => session.selected_cosigner_ids.clone(),
            },
        };
        let urls = vec![slot.relayer_url.clone()];
        let id = slot.id;
        let state = state.clone();
        calls.push(async move {
            let result: AppResult<CosignFinalizeResponse> = post_peer(
                &state,
                &urls,
                "/threshold-ed25519/internal/cosign/finalize",
                &finalize_request,
            )
            .await;
            (id, result)
        });
    }

    let needed = session.slots.len();
    let mut shares = Vec::new();
    for (id, result) in futures::future::join_all(calls).await {
        match result {
            Ok(response) => match response.signature_share_b64u {
                Some(share) => shares.push(b64u_decode_32(&share)?),
                None => tracing::warn!(peer = id, "Peer replied without a signature share"),
            },
            Err(err) => {
                tracing::warn!(peer = id, error = %err.message, "Peer round 2 failed");
                metrics::counter!("threshold_cosigner_failures_total").increment(1);
            }
        }
    }
    if shares.len() < needed {
        return Err(AppError::unavailable(format!(
            "Need at least {needed} relayer cosigners; got {}",
            shares.len()
        )));
    }

    let combined = match session.mode {
        FanOutMode::Peer => shares[0],
        FanOutMode::Cosigner => frost::sum_signature_shares(&shares)?,
    };

    tracing::debug!(user_id = %session.user_id, mode = ?session.mode, "Round 2 complete (fan-out)");
    metrics::counter!("threshold_signatures_total", "mode" => "fan_out").increment(1);

    let mut out = BTreeMap::new();
    out.insert(relayer_member.to_string(), b64u_encode(&combined));
    Ok(SignFinalizeOutcome {
        relayer_signature_shares_by_id: out,
    })
}

// ---------------------------------------------------------------------------
// Internal co-sign handlers (executed on the peer / co-signer relayer)
// ---------------------------------------------------------------------------

pub async fn cosign_init(
    state: &AppState,
    request: CosignInitRequest,
) -> AppResult<CosignInitResponse> {
    let secret = coordinator_secret(&state.config)?;
    let grant = grant::verify_grant_one_of(
        &secret,
        &request.grant,
        &[GrantType::Coordinator, GrantType::Cosigner],
    )?;

    if grant.mpc_session.signing_digest_b64u != request.signing_digest_b64u.trim() {
        return Err(AppError::unauthorized(
            "signingDigest does not match the granted MPC session",
        ));
    }
    let (client_id, relayer_member) = split_participants(state, &grant.mpc_session.participant_ids)?;

    let (round1, sub_share_b64u, cosigner_id, verifying_share) = match grant.typ {
        GrantType::Cosigner => {
            let sub_share_b64u = request
                .sub_share_b64u
                .clone()
                .ok_or_else(|| AppError::invalid_body("subShareB64u is required"))?;
            let sub_share = scalar::decode_scalar(&b64u_decode(&sub_share_b64u)?)?;
            if sub_share == Scalar::ZERO {
                return Err(AppError::internal("Cosigner sub-share is zero"));
            }
            let cosigner_id = grant
                .cosigner_id
                .ok_or_else(|| AppError::unauthorized("Cosigner grant is missing cosignerId"))?;
            let round1 = frost::round1_commit(&scalar::encode_scalar(&sub_share))?;
            (round1, Some(sub_share_b64u), Some(cosigner_id), None)
        }
        GrantType::Coordinator => {
            // A delegated session: this relayer owns the full server share.
            let material = state
                .strategy
                .resolve_key_material(
                    &grant.mpc_session.relayer_key_id,
                    &grant.mpc_session.user_id,
                    Some(&grant.mpc_session.rp_id),
                    &grant.mpc_session.client_verifying_share_b64u,
                )
                .await?;
            let round1 = frost::round1_commit(&material.server_signing_share)?;
            let verifying_share = material.server_verifying_share_b64u();
            (round1, None, None, Some(verifying_share))
        }
    };

    let mut commitments_by_id = BTreeMap::new();
    commitments_by_id.insert(client_id.to_string(), request.client_commitments.clone());
    commitments_by_id.insert(relayer_member.to_string(), round1.commitments.clone());

    let signing_session_id = Uuid::new_v4().to_string();
    let record = SigningSession {
        expires_at_ms: now_ms() + SIGNING_SESSION_TTL.as_millis() as u64,
        mpc_session_id: grant.mpc_session_id.clone(),
        relayer_key_id: grant.mpc_session.relayer_key_id.clone(),
        signing_digest_b64u: grant.mpc_session.signing_digest_b64u.clone(),
        user_id: grant.mpc_session.user_id.clone(),
        rp_id: grant.mpc_session.rp_id.clone(),
        client_verifying_share_b64u: grant.mpc_session.client_verifying_share_b64u.clone(),
        commitments_by_id,
        server_nonces_b64u: round1.nonces_b64u,
        server_signing_share_b64u: sub_share_b64u,
        cosigner_id,
        participant_ids: grant.mpc_session.participant_ids.clone(),
    };
    state
        .stores
        .mpc
        .put_signing(&signing_session_id, &record, SIGNING_SESSION_TTL)
        .await?;

    tracing::debug!(
        signing_session_id = %signing_session_id,
        grant_type = grant.typ.as_str(),
        "Co-sign round 1 complete"
    );

    Ok(CosignInitResponse {
        ok: true,
        code: None,
        message: None,
        signing_session_id: Some(signing_session_id),
        commitments: Some(round1.commitments),
        relayer_verifying_share_b64u: verifying_share,
    })
}

pub async fn cosign_finalize(
    state: &AppState,
    request: CosignFinalizeRequest,
) -> AppResult<CosignFinalizeResponse> {
    let secret = coordinator_secret(&state.config)?;
    let grant = grant::verify_grant_one_of(
        &secret,
        &request.grant,
        &[GrantType::Coordinator, GrantType::Cosigner],
    )?;

    let Some(session) = state
        .stores
        .mpc
        .take_signing(&request.signing_session_id)
        .await?
    else {
        return Err(AppError::unauthorized("Signing session expired or invalid"));
    };
    if session.is_expired() {
        return Err(AppError::unauthorized("Signing session expired or invalid"));
    }

    // The stored slot must match the granted session on every binding.
    if let Err(err) = check_grant_session(&session, &grant) {
        restore_signing(state, &request.signing_session_id, &session).await;
        return Err(err);
    }

    let result = cosign_round2(state, &session, &grant, &request).await;
    if result.is_err() {
        restore_signing(state, &request.signing_session_id, &session).await;
    }
    let share = result?;

    tracing::debug!(grant_type = grant.typ.as_str(), "Co-sign round 2 complete");

    Ok(CosignFinalizeResponse {
        ok: true,
        code: None,
        message: None,
        signature_share_b64u: Some(b64u_encode(&share)),
    })
}

fn check_grant_session(session: &SigningSession, grant: &GrantPayload) -> AppResult<()> {
    let granted = &grant.mpc_session;
    if session.mpc_session_id != grant.mpc_session_id
        || session.relayer_key_id != granted.relayer_key_id
        || session.signing_digest_b64u != granted.signing_digest_b64u
        || session.user_id != granted.user_id
        || session.rp_id != granted.rp_id
        || session.client_verifying_share_b64u != granted.client_verifying_share_b64u
    {
        return Err(AppError::unauthorized(
            "Signing session does not match the granted MPC session",
        ));
    }
    Ok(())
}

async fn cosign_round2(
    state: &AppState,
    session: &SigningSession,
    grant: &GrantPayload,
    request: &CosignFinalizeRequest,
) -> AppResult<[u8; 32]> {
    let (client_id, relayer_member) = split_participants(state, &session.participant_ids)?;
    let group_public_key = parse_near_public_key(&session.relayer_key_id)?;
    let message = b64u_decode(&session.signing_digest_b64u)?;

    match (&session.server_signing_share_b64u, session.cosigner_id) {
        // Co-signer slot: Lagrange-scale the sub-share for the selected set,
        // then sign directly against the aggregated commitments.
        (Some(sub_share_b64u), Some(cosigner_id)) => {
            if grant.typ != GrantType::Cosigner {
                return Err(AppError::unauthorized("Grant type does not match the session"));
            }
            if !request.selected_cosigner_ids.contains(&cosigner_id) {
                return Err(AppError::unauthorized(
                    "This cosigner is not in the selected set",
                ));
            }
            let sub_share = scalar::decode_scalar(&b64u_decode(sub_share_b64u)?)?;
            let lambda = cosigner::lagrange_at_zero(&request.selected_cosigner_ids, cosigner_id)?;
            let effective = cosigner::scale_share(&sub_share, &lambda)?;
            frost::round2_sign_cosigner(frost::CosignerRound2Args {
                effective_share: &effective,
                nonces_b64u: &session.server_nonces_b64u,
                group_public_key: &group_public_key,
                message: &message,
                client_commitments: &request.client_commitments,
                relayer_commitments: &request.relayer_commitments,
                client_id,
                relayer_id: relayer_member,
            })
        }
        // Delegated session: re-resolve the full share and run the standard
        // round 2 against this relayer's own commitments.
        _ => {
            if grant.typ != GrantType::Coordinator {
                return Err(AppError::unauthorized("Grant type does not match the session"));
            }
            let material = state
                .strategy
                .resolve_key_material(
                    &session.relayer_key_id,
                    &session.user_id,
                    Some(&session.rp_id),
                    &session.client_verifying_share_b64u,
                )
                .await?;
            let own_commitments = session
                .commitments_by_id
                .get(&relayer_member.to_string())
                .ok_or_else(|| AppError::internal("Signing session is missing own commitments"))?;
            let client_commitments = session
                .commitments_by_id
                .get(&client_id.to_string())
                .ok_or_else(|| AppError::internal("Signing session is missing client commitments"))?;
            frost::round2_sign_local(frost::LocalRound2Args {
                signing_share: &material.server_signing_share,
                nonces_b64u: &session.server_nonces_b64u,
                group_public_key: &material.public_key,
                message: &message,
                client_commitments,
                relayer_commitments: own_commitments,
                client_id,
                relayer_id: relayer_member,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Fan-out plumbing
// ---------------------------------------------------------------------------

fn coordinator_secret(config: &Config) -> AppResult<[u8; 32]> {
    config.coordinator_shared_secret.ok_or_else(|| {
        AppError::missing_config("THRESHOLD_COORDINATOR_SHARED_SECRET_B64U is required for fan-out")
    })
}

/// POST a JSON body to the first reachable URL, with a per-attempt timeout.
/// Alternate URLs for the same peer id are tried in order.
async fn post_peer<Req, Resp>(
    state: &AppState,
    urls: &[String],
    path: &str,
    body: &Req,
) -> AppResult<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned + PeerResponse,
{
    let timeout = Duration::from_millis(state.config.cosigner_timeout_ms);
    let mut last_error = AppError::internal("No peer URL configured");

    for url in urls {
        let full_url = format!("{}{}", url.trim_end_matches('/'), path);
        let send = state.http_client.post(&full_url).json(body).send();
        let response = match tokio::time::timeout(timeout, send).await {
            Err(_) => {
                last_error =
                    AppError::internal(format!("Peer call to {full_url} timed out"));
                continue;
            }
            Ok(Err(e)) => {
                last_error = AppError::internal(format!("Peer call to {full_url} failed: {e}"));
                continue;
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let parsed: Resp = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                last_error = AppError::internal(format!(
                    "Peer reply from {full_url} was not JSON: {e}"
                ));
                continue;
            }
        };

        if !parsed.is_ok() {
            let (code, message) = parsed.error_parts();
            last_error = AppError::internal(format!(
                "Peer {full_url} returned HTTP {status} {code}: {message}"
            ));
            continue;
        }
        return Ok(parsed);
    }

    Err(last_error)
}

/// The common `{ok, code, message}` envelope of internal peer replies.
pub trait PeerResponse {
    fn is_ok(&self) -> bool;
    fn error_parts(&self) -> (String, String);
}

impl PeerResponse for CosignInitResponse {
    fn is_ok(&self) -> bool {
        self.ok
    }

    fn error_parts(&self) -> (String, String) {
        (
            self.code.clone().unwrap_or_default(),
            self.message.clone().unwrap_or_default(),
        )
    }
}

impl PeerResponse for CosignFinalizeResponse {
    fn is_ok(&self) -> bool {
        self.ok
    }

    fn error_parts(&self) -> (String, String) {
        (
            self.code.clone().unwrap_or_default(),
            self.message.clone().unwrap_or_default(),
        )
    }
}

// ---------------------------------------------------------------------------
// Take-and-restore helpers
// ---------------------------------------------------------------------------

fn remaining_ttl(expires_at_ms: u64) -> Duration {
    Duration::from_millis(expires_at_ms.saturating_sub(now_ms()).max(1))
}

async fn restore_mpc(state: &AppState, id: &str, session: &MpcSession) {
    let ttl = remaining_ttl(session.expires_at_ms);
    if let Err(e) = state.stores.mpc.put_mpc(id, session, ttl).await {
        tracing::error!(mpc_session_id = %id, error = %e, "Failed to restore MPC session");
    }
}

async fn restore_signing(state: &AppState, id: &str, session: &SigningSession) {
    let ttl = remaining_ttl(session.expires_at_ms);
    if let Err(e) = state.stores.mpc.put_signing(id, session, ttl).await {
        tracing::error!(signing_session_id = %id, error = %e, "Failed to restore signing session");
    }
}

async fn restore_coordinator(state: &AppState, id: &str, session: &CoordinatorSigningSession) {
    let ttl = remaining_ttl(session.expires_at_ms);
    if let Err(e) = state.stores.mpc.put_coordinator_signing(id, session, ttl).await {
        tracing::error!(signing_session_id = %id, error = %e, "Failed to restore signing session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinatorPeer, CosignerPeer, NodeRole};
    use crate::services::authorize::authorize;
    use crate::testing::{
        authorize_request_for, keygen_test_key, test_config, test_state_shared,
        test_state_with_config, TestKey, TestNear,
    };
    use axum::Router;
    use ed25519_dalek::Verifier;
    use std::sync::Arc;

    async fn spawn_relayer(state: AppState) -> String {
        let app = Router::new()
            .merge(crate::routes::threshold::router())
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn authorize_session(state: &AppState, key: &TestKey) -> (String, [u8; 32]) {
        let request = authorize_request_for(key, "1");
        let signing_digest: [u8; 32] = request.signing_digest_32.as_slice().try_into().unwrap();
        let outcome = authorize(state, request).await.unwrap();
        (outcome.mpc_session_id, signing_digest)
    }

    fn init_request(
        key: &TestKey,
        mpc_session_id: &str,
        signing_digest: &[u8; 32],
        client_commitments: &Commitments,
    ) -> SignInitRequest {
        SignInitRequest {
            mpc_session_id: mpc_session_id.to_string(),
            relayer_key_id: key.relayer_key_id.clone(),
            near_account_id: "alice.testnet".into(),
            signing_digest_b64u: b64u_encode(signing_digest),
            client_commitments: client_commitments.clone(),
        }
    }

    /// Drive the client's side of the protocol and verify the aggregated
    /// signature under the group key.
    fn client_round2_and_verify(
        key: &TestKey,
        signing_digest: &[u8; 32],
        client_nonces_b64u: &str,
        init: &SignInitOutcome,
        finalize: &SignFinalizeOutcome,
    ) {
        let client_id: frost_ed25519::Identifier = 1u16.try_into().unwrap();
        let relayer_id: frost_ed25519::Identifier = 2u16.try_into().unwrap();

        let group_pk = parse_near_public_key(&key.relayer_key_id).unwrap();
        let verifying_key = frost_ed25519::VerifyingKey::deserialize(&group_pk).unwrap();

        let parse = |c: &Commitments| {
            let hiding = frost_ed25519::round1::NonceCommitment::deserialize(
                &b64u_decode(&c.hiding).unwrap(),
            )
            .unwrap();
            let binding = frost_ed25519::round1::NonceCommitment::deserialize(
                &b64u_decode(&c.binding).unwrap(),
            )
            .unwrap();
            frost_ed25519::round1::SigningCommitments::new(hiding, binding)
        };

        let mut commitments_map = std::collections::BTreeMap::new();
        commitments_map.insert(client_id, parse(&init.commitments_by_id["1"]));
        commitments_map.insert(relayer_id, parse(&init.commitments_by_id["2"]));
        let package = frost_ed25519::SigningPackage::new(commitments_map, signing_digest);

        let client_signing_share =
            frost_ed25519::keys::SigningShare::deserialize(&key.client_scalar.to_bytes()).unwrap();
        let client_verifying_bytes = frost::verifying_share_bytes(&key.client_scalar);
        let client_verifying_share =
            frost_ed25519::keys::VerifyingShare::deserialize(&client_verifying_bytes).unwrap();
        let key_package = frost_ed25519::keys::KeyPackage::new(
            client_id,
            client_signing_share,
            client_verifying_share.clone(),
            verifying_key,
            2,
        );
        let nonces = frost_ed25519::round1::SigningNonces::deserialize(
            &b64u_decode(client_nonces_b64u).unwrap(),
        )
        .unwrap();
        let client_share = frost_ed25519::round2::sign(&package, &nonces, &key_package).unwrap();

        let relayer_share_bytes =
            b64u_decode_32(&finalize.relayer_signature_shares_by_id["2"]).unwrap();
        let relayer_share =
            frost_ed25519::round2::SignatureShare::deserialize(&relayer_share_bytes).unwrap();

        let relayer_verifying_share = frost_ed25519::keys::VerifyingShare::deserialize(
            &b64u_decode_32(&init.relayer_verifying_shares_by_id["2"]).unwrap(),
        )
        .unwrap();
        let mut verifying_shares = std::collections::BTreeMap::new();
        verifying_shares.insert(client_id, client_verifying_share);
        verifying_shares.insert(relayer_id, relayer_verifying_share);
        let pubkey_package = frost_ed25519::keys::PublicKeyPackage::new(
            verifying_shares,
            frost_ed25519::VerifyingKey::deserialize(&group_pk).unwrap(),
        );

        let mut signature_shares = std::collections::BTreeMap::new();
        signature_shares.insert(client_id, client_share);
        signature_shares.insert(relayer_id, relayer_share);
        let signature =
            frost_ed25519::aggregate(&package, &signature_shares, &pubkey_package).unwrap();
        let sig_bytes: [u8; 64] = signature.serialize().unwrap().as_slice().try_into().unwrap();

        let vk = ed25519_dalek::VerifyingKey::from_bytes(&group_pk).unwrap();
        vk.verify(
            signing_digest,
            &ed25519_dalek::Signature::from_bytes(&sig_bytes),
        )
        .expect("aggregated signature must verify under the group key");
    }

    #[tokio::test]
    async fn local_mode_end_to_end_signature_verifies() {
        let near = Arc::new(TestNear::default());
        let state = test_state_shared(near.clone()).await;
        let key = keygen_test_key(&state).await;
        near.add_access_key(&key.public_key);

        let (mpc_session_id, signing_digest) = authorize_session(&state, &key).await;
        let client_r1 = frost::round1_commit(&key.client_scalar.to_bytes()).unwrap();

        let init = sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap();
        assert_eq!(init.participant_ids, vec![1, 2]);

        let finalize = sign_finalize(
            &state,
            SignFinalizeRequest {
                signing_session_id: init.signing_session_id.clone(),
                client_signature_share_b64u: String::new(),
            },
        )
        .await
        .unwrap();

        client_round2_and_verify(
            &key,
            &signing_digest,
            &client_r1.nonces_b64u,
            &init,
            &finalize,
        );
    }

    #[tokio::test]
    async fn sign_init_replay_is_rejected() {
        let near = Arc::new(TestNear::default());
        let state = test_state_shared(near.clone()).await;
        let key = keygen_test_key(&state).await;
        near.add_access_key(&key.public_key);

        let (mpc_session_id, signing_digest) = authorize_session(&state, &key).await;
        let client_r1 = frost::round1_commit(&key.client_scalar.to_bytes()).unwrap();

        sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap();

        let err = sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert!(err.message.contains("expired or invalid"));
    }

    #[tokio::test]
    async fn sign_init_mismatch_restores_the_session() {
        let near = Arc::new(TestNear::default());
        let state = test_state_shared(near.clone()).await;
        let key = keygen_test_key(&state).await;
        near.add_access_key(&key.public_key);

        let (mpc_session_id, signing_digest) = authorize_session(&state, &key).await;
        let client_r1 = frost::round1_commit(&key.client_scalar.to_bytes()).unwrap();

        // Wrong digest: the take happens, the check fails, the session is
        // re-put for its remaining TTL.
        let mut bad = init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments);
        bad.signing_digest_b64u = b64u_encode(&[0u8; 32]);
        let err = sign_init(&state, bad).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);

        // The original request still works.
        sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn sign_finalize_replay_is_rejected() {
        let near = Arc::new(TestNear::default());
        let state = test_state_shared(near.clone()).await;
        let key = keygen_test_key(&state).await;
        near.add_access_key(&key.public_key);

        let (mpc_session_id, signing_digest) = authorize_session(&state, &key).await;
        let client_r1 = frost::round1_commit(&key.client_scalar.to_bytes()).unwrap();
        let init = sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap();

        let request = || SignFinalizeRequest {
            signing_session_id: init.signing_session_id.clone(),
            client_signature_share_b64u: String::new(),
        };
        sign_finalize(&state, request()).await.unwrap();
        let err = sign_finalize(&state, request()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert!(err.message.contains("expired or invalid"));
    }

    #[tokio::test]
    async fn cosigner_fanout_reports_unavailable_below_threshold() {
        let near = Arc::new(TestNear::default());
        let mut config = test_config();
        // Nothing listens on these ports; every round-1 call fails fast.
        config.cosigners = vec![
            CosignerPeer { cosigner_id: 1, relayer_url: "http://127.0.0.1:1".into() },
            CosignerPeer { cosigner_id: 2, relayer_url: "http://127.0.0.1:1".into() },
            CosignerPeer { cosigner_id: 3, relayer_url: "http://127.0.0.1:1".into() },
        ];
        config.cosigner_threshold = Some(2);
        config.cosigner_timeout_ms = 500;
        let state = test_state_with_config(near.clone(), config).await;
        let key = keygen_test_key(&state).await;
        near.add_access_key(&key.public_key);

        let (mpc_session_id, signing_digest) = authorize_session(&state, &key).await;
        let client_r1 = frost::round1_commit(&key.client_scalar.to_bytes()).unwrap();

        let err = sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
        assert!(err.message.contains("Need at least 2 relayer cosigners; got 0"));
    }

    #[tokio::test]
    async fn cosigner_fleet_end_to_end_signature_verifies() {
        let near = Arc::new(TestNear::default());

        // Three co-signer nodes; they only need the shared HMAC secret.
        let mut cosigners = Vec::new();
        for _ in 0..3 {
            let mut config = test_config();
            config.node_role = NodeRole::Participant;
            let peer_state = test_state_with_config(Arc::new(TestNear::default()), config).await;
            cosigners.push(spawn_relayer(peer_state).await);
        }

        let mut config = test_config();
        config.cosigners = cosigners
            .iter()
            .enumerate()
            .map(|(i, url)| CosignerPeer {
                cosigner_id: (i + 1) as u16,
                relayer_url: url.clone(),
            })
            .collect();
        config.cosigner_threshold = Some(2);
        let state = test_state_with_config(near.clone(), config).await;
        let key = keygen_test_key(&state).await;
        near.add_access_key(&key.public_key);

        let (mpc_session_id, signing_digest) = authorize_session(&state, &key).await;
        let client_r1 = frost::round1_commit(&key.client_scalar.to_bytes()).unwrap();

        let init = sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap();

        let finalize = sign_finalize(
            &state,
            SignFinalizeRequest {
                signing_session_id: init.signing_session_id.clone(),
                client_signature_share_b64u: String::new(),
            },
        )
        .await
        .unwrap();

        client_round2_and_verify(
            &key,
            &signing_digest,
            &client_r1.nonces_b64u,
            &init,
            &finalize,
        );
    }

    #[tokio::test]
    async fn cosigner_fleet_partial_reachability_is_unavailable() {
        let near = Arc::new(TestNear::default());

        // One live co-signer, two dead ones: below the threshold of 2.
        let mut config = test_config();
        config.node_role = NodeRole::Participant;
        let live = spawn_relayer(test_state_with_config(Arc::new(TestNear::default()), config).await)
            .await;

        let mut config = test_config();
        config.cosigners = vec![
            CosignerPeer { cosigner_id: 1, relayer_url: live },
            CosignerPeer { cosigner_id: 2, relayer_url: "http://127.0.0.1:1".into() },
            CosignerPeer { cosigner_id: 3, relayer_url: "http://127.0.0.1:1".into() },
        ];
        config.cosigner_threshold = Some(2);
        config.cosigner_timeout_ms = 2_000;
        let state = test_state_with_config(near.clone(), config).await;
        let key = keygen_test_key(&state).await;
        near.add_access_key(&key.public_key);

        let (mpc_session_id, signing_digest) = authorize_session(&state, &key).await;
        let client_r1 = frost::round1_commit(&key.client_scalar.to_bytes()).unwrap();

        let err = sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
        assert!(err.message.contains("Need at least 2 relayer cosigners; got 1"));
    }

    #[tokio::test]
    async fn peer_delegation_end_to_end_signature_verifies() {
        let near = Arc::new(TestNear::default());

        // The signing peer holds the same master secret (derived mode), so it
        // can re-derive the full server share from the granted session.
        let mut config = test_config();
        config.node_role = NodeRole::Participant;
        let peer_url =
            spawn_relayer(test_state_with_config(Arc::new(TestNear::default()), config).await)
                .await;

        let mut config = test_config();
        config.coordinator_peers = vec![CoordinatorPeer { id: 2, relayer_url: peer_url }];
        let state = test_state_with_config(near.clone(), config).await;
        let key = keygen_test_key(&state).await;
        near.add_access_key(&key.public_key);

        let (mpc_session_id, signing_digest) = authorize_session(&state, &key).await;
        let client_r1 = frost::round1_commit(&key.client_scalar.to_bytes()).unwrap();

        let init = sign_init(
            &state,
            init_request(&key, &mpc_session_id, &signing_digest, &client_r1.commitments),
        )
        .await
        .unwrap();

        let finalize = sign_finalize(
            &state,
            SignFinalizeRequest {
                signing_session_id: init.signing_session_id.clone(),
                client_signature_share_b64u: String::new(),
            },
        )
        .await
        .unwrap();

        client_round2_and_verify(
            &key,
            &signing_digest,
            &client_r1.nonces_b64u,
            &init,
            &finalize,
        );
    }
}
