//! Key generation: bind a client verifying share to a NEAR account, either
//! through an on-chain registration transaction or a WebAuthn assertion
//! bound to the keygen intent digest.

use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::VrfData;
use crate::validation;
use crate::webauthn::{ensure_verified, VerifyAuthenticationRequest};
use crate::AppState;

const REGISTRATION_METHOD: &str = "link_device_register_user";

#[derive(Debug)]
pub struct KeygenRequest {
    pub near_account_id: String,
    pub client_verifying_share_b64u: String,
    pub registration_tx_hash: Option<String>,
    pub vrf_data: Option<VrfData>,
    pub webauthn_authentication: Option<Value>,
}

#[derive(Debug)]
pub struct KeygenOutcome {
    pub relayer_key_id: String,
    pub public_key: String,
    pub relayer_verifying_share_b64u: String,
    pub participant_ids: Vec<u16>,
}

pub async fn keygen(state: &AppState, request: KeygenRequest) -> AppResult<KeygenOutcome> {
    let near_account_id = request.near_account_id.trim().to_string();
    if near_account_id.is_empty() {
        return Err(AppError::invalid_body("nearAccountId is required"));
    }

    let rp_id = if let Some(tx_hash) = request.registration_tx_hash.as_deref() {
        verify_registration_tx(state, tx_hash, &near_account_id).await?
    } else {
        verify_keygen_assertion(state, &request, &near_account_id).await?
    };

    let material = state
        .strategy
        .keygen_from_client_verifying_share(
            &near_account_id,
            rp_id.as_deref(),
            &request.client_verifying_share_b64u,
        )
        .await?;

    tracing::info!(
        near_account_id = %near_account_id,
        relayer_key_id = %material.relayer_key_id,
        "Keygen complete"
    );
    metrics::counter!("threshold_keygen_total").increment(1);

    Ok(KeygenOutcome {
        relayer_key_id: material.relayer_key_id.clone(),
        public_key: material.public_key_str(),
        relayer_verifying_share_b64u: material.server_verifying_share_b64u(),
        participant_ids: state.strategy.participant_ids(),
    })
}

/// The tx-hash path: the account proved control by landing a
/// `link_device_register_user` call whose receipt says `verified: true`.
/// Returns the rpId inlined in the call args, when present.
async fn verify_registration_tx(
    state: &AppState,
    tx_hash: &str,
    near_account_id: &str,
) -> AppResult<Option<String>> {
    let outcome = state.near.tx_status(tx_hash.trim(), near_account_id).await?;

    let signer = outcome
        .transaction
        .get("signer_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if signer != near_account_id {
        return Err(AppError::not_verified(format!(
            "Registration tx was signed by {signer}, expected {near_account_id}"
        )));
    }

    if let Some(contract_id) = state.config.webauthn_contract_id.as_deref() {
        let receiver = outcome
            .transaction
            .get("receiver_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if receiver != contract_id {
            return Err(AppError::not_verified(format!(
                "Registration tx receiver {receiver} is not the WebAuthn contract"
            )));
        }
    }

    let call_args = registration_call_args(&outcome.transaction).ok_or_else(|| {
        AppError::not_verified(format!(
            "Registration tx does not call {REGISTRATION_METHOD}"
        ))
    })?;

    let success: Value = outcome
        .success_value()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(|| AppError::not_verified("Registration tx has no JSON SuccessValue"))?;
    if success.get("verified").and_then(|v| v.as_bool()) != Some(true) {
        return Err(AppError::not_verified(
            "Registration tx did not verify the credential",
        ));
    }

    Ok(extract_rp_id(&call_args))
}

/// Find the `link_device_register_user` function call and decode its args.
fn registration_call_args(transaction: &Value) -> Option<Value> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let actions = transaction.get("actions")?.as_array()?;
    for action in actions {
        let Some(call) = action.get("FunctionCall") else {
            continue;
        };
        if call.get("method_name").and_then(|v| v.as_str()) != Some(REGISTRATION_METHOD) {
            continue;
        }
        let args_b64 = call.get("args").and_then(|v| v.as_str())?;
        let bytes = STANDARD.decode(args_b64).ok()?;
        return serde_json::from_slice(&bytes).ok();
    }
    None
}

fn extract_rp_id(args: &Value) -> Option<String> {
    args.get("rp_id")
        .or_else(|| args.get("vrf_data").and_then(|v| v.get("rp_id")))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// The WebAuthn path: the assertion must be bound to the keygen intent
/// digest recomputed from the request itself.
async fn verify_keygen_assertion(
    state: &AppState,
    request: &KeygenRequest,
    near_account_id: &str,
) -> AppResult<Option<String>> {
    let vrf_data = request.vrf_data.as_ref().ok_or_else(|| {
        AppError::invalid_body("Either registrationTxHash or vrf_data is required")
    })?;
    let webauthn = request.webauthn_authentication.as_ref().ok_or_else(|| {
        AppError::invalid_body("webauthn_authentication is required with vrf_data")
    })?;

    if vrf_data.user_id.trim() != near_account_id {
        return Err(AppError::unauthorized(
            "vrf_data.user_id does not match nearAccountId",
        ));
    }

    let expected = validation::compute_keygen_intent_digest(
        near_account_id,
        &vrf_data.rp_id,
        &request.client_verifying_share_b64u,
    );
    if vrf_data.intent_digest()? != expected {
        return Err(AppError::new(
            crate::error::ErrorCode::IntentDigestMismatch,
            "Keygen intent digest does not match vrf_data.intent_digest_32",
        ));
    }

    let outcome = state
        .webauthn
        .verify_authentication(VerifyAuthenticationRequest {
            vrf_data,
            webauthn_authentication: webauthn,
        })
        .await?;
    ensure_verified(&outcome)?;

    Ok(Some(vrf_data.rp_id.trim().to_string()))
}
