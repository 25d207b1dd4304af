//! The `/threshold-ed25519` HTTP surface. Handlers parse the wire shapes,
//! delegate to the services, and wrap results in the `{ok: true, ...}`
//! envelope; failures flow out as `{ok: false, code, message}` through
//! `AppError`.
//!
//! Field naming follows the protocol's client: camelCase throughout, except
//! the assertion material (`vrf_data`, `webauthn_authentication`,
//! `signing_digest_32`) which travels in snake_case.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::{Commitments, SigningPurpose, VrfData};
use crate::routes::AppJson;
use crate::services::{authorize, keygen, session, signing};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/threshold-ed25519/keygen", post(keygen_handler))
        .route("/threshold-ed25519/authorize", post(authorize_handler))
        .route("/threshold-ed25519/session", post(session_handler))
        .route(
            "/threshold-ed25519/authorize-with-session",
            post(authorize_with_session_handler),
        )
        .route("/threshold-ed25519/sign/init", post(sign_init_handler))
        .route("/threshold-ed25519/sign/finalize", post(sign_finalize_handler))
        .route(
            "/threshold-ed25519/internal/cosign/init",
            post(cosign_init_handler),
        )
        .route(
            "/threshold-ed25519/internal/cosign/finalize",
            post(cosign_finalize_handler),
        )
}

/// Participant nodes expose only the internal co-sign endpoints; the public
/// surface pretends not to exist.
fn ensure_coordinator(state: &AppState) -> AppResult<()> {
    if !state.config.is_coordinator() {
        return Err(AppError::not_found("Not found"));
    }
    Ok(())
}

fn expires_at_string(expires_at_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(expires_at_ms as i64)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// keygen
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeygenBody {
    near_account_id: String,
    client_verifying_share_b64u: String,
    #[serde(default)]
    registration_tx_hash: Option<String>,
    #[serde(default, rename = "vrf_data")]
    vrf_data: Option<VrfData>,
    #[serde(default, rename = "webauthn_authentication")]
    webauthn_authentication: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeygenResponse {
    ok: bool,
    relayer_key_id: String,
    public_key: String,
    relayer_verifying_share_b64u: String,
    participant_ids: Vec<u16>,
}

async fn keygen_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<KeygenBody>,
) -> AppResult<Json<KeygenResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "keygen").increment(1);
    ensure_coordinator(&state)?;

    let outcome = keygen::keygen(
        &state,
        keygen::KeygenRequest {
            near_account_id: body.near_account_id,
            client_verifying_share_b64u: body.client_verifying_share_b64u,
            registration_tx_hash: body.registration_tx_hash,
            vrf_data: body.vrf_data,
            webauthn_authentication: body.webauthn_authentication,
        },
    )
    .await?;

    Ok(Json(KeygenResponse {
        ok: true,
        relayer_key_id: outcome.relayer_key_id,
        public_key: outcome.public_key,
        relayer_verifying_share_b64u: outcome.relayer_verifying_share_b64u,
        participant_ids: outcome.participant_ids,
    }))
}

// ---------------------------------------------------------------------------
// authorize
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeBody {
    relayer_key_id: String,
    client_verifying_share_b64u: String,
    purpose: SigningPurpose,
    #[serde(rename = "signing_digest_32")]
    signing_digest_32: Vec<u8>,
    signing_payload: Value,
    #[serde(rename = "vrf_data")]
    vrf_data: VrfData,
    #[serde(rename = "webauthn_authentication")]
    webauthn_authentication: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    ok: bool,
    mpc_session_id: String,
    expires_at: String,
}

async fn authorize_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<AuthorizeBody>,
) -> AppResult<Json<AuthorizeResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "authorize").increment(1);
    ensure_coordinator(&state)?;

    let outcome = authorize::authorize(
        &state,
        authorize::AuthorizeRequest {
            relayer_key_id: body.relayer_key_id,
            client_verifying_share_b64u: body.client_verifying_share_b64u,
            purpose: body.purpose,
            signing_digest_32: body.signing_digest_32,
            signing_payload: body.signing_payload,
            vrf_data: body.vrf_data,
            webauthn_authentication: body.webauthn_authentication,
        },
    )
    .await?;

    Ok(Json(AuthorizeResponse {
        ok: true,
        mpc_session_id: outcome.mpc_session_id,
        expires_at: expires_at_string(outcome.expires_at_ms),
    }))
}

// ---------------------------------------------------------------------------
// session
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody {
    relayer_key_id: String,
    client_verifying_share_b64u: String,
    session_policy: Value,
    #[serde(rename = "vrf_data")]
    vrf_data: VrfData,
    #[serde(rename = "webauthn_authentication")]
    webauthn_authentication: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    ok: bool,
    session_id: String,
    expires_at: String,
    remaining_uses: u32,
}

async fn session_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<SessionBody>,
) -> AppResult<Json<SessionResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "session").increment(1);
    ensure_coordinator(&state)?;

    let outcome = session::create_session(
        &state,
        session::CreateSessionRequest {
            relayer_key_id: body.relayer_key_id,
            client_verifying_share_b64u: body.client_verifying_share_b64u,
            session_policy: body.session_policy,
            vrf_data: body.vrf_data,
            webauthn_authentication: body.webauthn_authentication,
        },
    )
    .await?;

    Ok(Json(SessionResponse {
        ok: true,
        session_id: outcome.session_id,
        expires_at: expires_at_string(outcome.expires_at_ms),
        remaining_uses: outcome.remaining_uses,
    }))
}

// ---------------------------------------------------------------------------
// authorize-with-session
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionAuthorizeBody {
    session_id: String,
    near_account_id: String,
    relayer_key_id: String,
    client_verifying_share_b64u: String,
    purpose: SigningPurpose,
    #[serde(rename = "signing_digest_32")]
    signing_digest_32: Vec<u8>,
    signing_payload: Value,
}

async fn authorize_with_session_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<SessionAuthorizeBody>,
) -> AppResult<Json<AuthorizeResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "authorize_with_session").increment(1);
    ensure_coordinator(&state)?;

    let outcome = session::authorize_with_session(
        &state,
        session::SessionAuthorizeRequest {
            session_id: body.session_id,
            relayer_key_id: body.relayer_key_id,
            client_verifying_share_b64u: body.client_verifying_share_b64u,
            purpose: body.purpose,
            signing_digest_32: body.signing_digest_32,
            signing_payload: body.signing_payload,
            near_account_id: body.near_account_id,
        },
    )
    .await?;

    Ok(Json(AuthorizeResponse {
        ok: true,
        mpc_session_id: outcome.mpc_session_id,
        expires_at: expires_at_string(outcome.expires_at_ms),
    }))
}

// ---------------------------------------------------------------------------
// sign/init, sign/finalize
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInitBody {
    mpc_session_id: String,
    relayer_key_id: String,
    near_account_id: String,
    signing_digest_b64u: String,
    client_commitments: Commitments,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInitResponse {
    ok: bool,
    signing_session_id: String,
    commitments_by_id: BTreeMap<String, Commitments>,
    relayer_verifying_shares_by_id: BTreeMap<String, String>,
    participant_ids: Vec<u16>,
}

async fn sign_init_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<SignInitBody>,
) -> AppResult<Json<SignInitResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "sign_init").increment(1);
    ensure_coordinator(&state)?;

    let outcome = signing::sign_init(
        &state,
        signing::SignInitRequest {
            mpc_session_id: body.mpc_session_id,
            relayer_key_id: body.relayer_key_id,
            near_account_id: body.near_account_id,
            signing_digest_b64u: body.signing_digest_b64u,
            client_commitments: body.client_commitments,
        },
    )
    .await?;

    Ok(Json(SignInitResponse {
        ok: true,
        signing_session_id: outcome.signing_session_id,
        commitments_by_id: outcome.commitments_by_id,
        relayer_verifying_shares_by_id: outcome.relayer_verifying_shares_by_id,
        participant_ids: outcome.participant_ids,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignFinalizeBody {
    signing_session_id: String,
    client_signature_share_b64u: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignFinalizeResponse {
    ok: bool,
    relayer_signature_shares_by_id: BTreeMap<String, String>,
}

async fn sign_finalize_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<SignFinalizeBody>,
) -> AppResult<Json<SignFinalizeResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "sign_finalize").increment(1);
    ensure_coordinator(&state)?;

    let outcome = signing::sign_finalize(
        &state,
        signing::SignFinalizeRequest {
            signing_session_id: body.signing_session_id,
            client_signature_share_b64u: body.client_signature_share_b64u,
        },
    )
    .await?;

    Ok(Json(SignFinalizeResponse {
        ok: true,
        relayer_signature_shares_by_id: outcome.relayer_signature_shares_by_id,
    }))
}

// ---------------------------------------------------------------------------
// internal co-sign endpoints (always served, any node role)
// ---------------------------------------------------------------------------

async fn cosign_init_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<signing::CosignInitRequest>,
) -> AppResult<Json<signing::CosignInitResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "cosign_init").increment(1);
    Ok(Json(signing::cosign_init(&state, body).await?))
}

async fn cosign_finalize_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<signing::CosignFinalizeRequest>,
) -> AppResult<Json<signing::CosignFinalizeResponse>> {
    metrics::counter!("http_requests_total", "endpoint" => "cosign_finalize").increment(1);
    Ok(Json(signing::cosign_finalize(&state, body).await?))
}
