//! Intent binding and payload validation.
//!
//! An intent digest is SHA-256 over the canonical JSON of the *semantic*
//! request and is what a WebAuthn assertion approved; a signing digest is
//! SHA-256 over the byte-exact encoding the Ed25519 signature covers. Both
//! are recomputed server-side from the structured payload and compared
//! against what the caller bound, so a payload cannot drift from what the
//! user saw.

use serde_json::{json, Value};

use crate::error::{AppError, AppResult, ErrorCode};
use crate::models::{SessionPolicy, SigningPayload};
use crate::near::rpc::NearClient;
use crate::near::tx;
use crate::utils::canonical::canonical_sha256;
use crate::utils::encoding::normalize_near_public_key;

// ---------------------------------------------------------------------------
// Intent digests
// ---------------------------------------------------------------------------

/// Digest bound into a keygen assertion.
pub fn compute_keygen_intent_digest(
    near_account_id: &str,
    rp_id: &str,
    client_verifying_share_b64u: &str,
) -> [u8; 32] {
    canonical_sha256(&json!({
        "kind": "threshold_ed25519_keygen",
        "nearAccountId": near_account_id.trim(),
        "rpId": rp_id.trim(),
        "clientVerifyingShare": client_verifying_share_b64u.trim(),
    }))
}

/// Recompute the intent digest for a signing payload. Also enforces the
/// account bindings each purpose requires (`userId` must own the intent).
pub fn compute_intent_digest(payload: &SigningPayload, user_id: &str) -> AppResult<[u8; 32]> {
    let user_id = user_id.trim();
    match payload {
        SigningPayload::NearTx(p) => {
            for request in &p.tx_signing_requests {
                if request.near_account_id.trim() != user_id {
                    return Err(AppError::unauthorized(
                        "All txSigningRequests[].nearAccountId must match userId",
                    ));
                }
            }
            let requests: Vec<Value> = p
                .tx_signing_requests
                .iter()
                .map(|r| {
                    Ok(json!({
                        "receiverId": r.receiver_id.trim(),
                        "actions": serde_json::to_value(&r.actions)?,
                    }))
                })
                .collect::<AppResult<_>>()?;
            Ok(canonical_sha256(&Value::Array(requests)))
        }
        SigningPayload::Delegate(p) => {
            if p.delegate.sender_id.trim() != user_id {
                return Err(AppError::unauthorized("delegate.senderId must match userId"));
            }
            let value = serde_json::to_value(&p.delegate)?;
            Ok(canonical_sha256(&value))
        }
        SigningPayload::Nep413(p) => Ok(canonical_sha256(&json!({
            "kind": "nep413",
            "nearAccountId": user_id,
            "recipient": p.recipient,
            "message": p.message,
        }))),
    }
}

/// Compare a recomputed intent digest with the VRF-bound one.
pub fn ensure_intent_digest_matches(
    payload: &SigningPayload,
    user_id: &str,
    bound_digest: &[u8; 32],
) -> AppResult<[u8; 32]> {
    let recomputed = compute_intent_digest(payload, user_id)?;
    if &recomputed != bound_digest {
        return Err(AppError::new(
            ErrorCode::IntentDigestMismatch,
            "Recomputed intent digest does not match vrf_data.intent_digest_32",
        ));
    }
    Ok(recomputed)
}

// ---------------------------------------------------------------------------
// Signing digests
// ---------------------------------------------------------------------------

/// All signing digests derivable from the payload (one per transaction for
/// `near_tx`, exactly one otherwise).
pub fn compute_signing_digests(payload: &SigningPayload) -> AppResult<Vec<[u8; 32]>> {
    match payload {
        SigningPayload::NearTx(p) => {
            let signer = p.tx_signing_requests[0].near_account_id.trim();
            let requests: Vec<(String, Vec<tx::ActionParams>)> = p
                .tx_signing_requests
                .iter()
                .map(|r| (r.receiver_id.clone(), r.actions.clone()))
                .collect();
            tx::compute_near_tx_signing_digests(
                signer,
                &requests,
                &p.transaction_context.near_public_key_str,
                &p.transaction_context.next_nonce,
                &p.transaction_context.tx_block_hash,
            )
        }
        SigningPayload::Delegate(p) => {
            let delegate = build_delegate_action(&p.delegate)?;
            Ok(vec![tx::compute_delegate_signing_digest(&delegate)?])
        }
        SigningPayload::Nep413(p) => {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine;
            let nonce_bytes = STANDARD
                .decode(p.nonce.trim())
                .map_err(|e| AppError::invalid_body(format!("Invalid nonce (base64): {e}")))?;
            let nonce: [u8; 32] = nonce_bytes.as_slice().try_into().map_err(|_| {
                AppError::invalid_body(format!(
                    "Invalid nonce length: expected 32 bytes, got {}",
                    nonce_bytes.len()
                ))
            })?;
            Ok(vec![tx::compute_nep413_signing_digest(
                &p.message,
                &p.recipient,
                &nonce,
                p.state.as_deref(),
            )?])
        }
    }
}

/// The request's signing digest must be one of the derivable digests.
pub fn ensure_signing_digest_derivable(
    payload: &SigningPayload,
    signing_digest: &[u8; 32],
) -> AppResult<()> {
    let derivable = compute_signing_digests(payload)?;
    if !derivable.contains(signing_digest) {
        return Err(AppError::new(
            ErrorCode::SigningDigestMismatch,
            "signing_digest_32 is not derivable from the signing payload",
        ));
    }
    Ok(())
}

fn build_delegate_action(body: &crate::models::DelegateBody) -> AppResult<tx::DelegateAction> {
    let actions = body
        .actions
        .iter()
        .map(|p| p.to_action())
        .collect::<AppResult<Vec<_>>>()?;
    let nonce: u64 = body
        .nonce
        .trim()
        .parse()
        .map_err(|e| AppError::invalid_body(format!("Invalid delegate.nonce: {e}")))?;
    let max_block_height: u64 = body
        .max_block_height
        .trim()
        .parse()
        .map_err(|e| AppError::invalid_body(format!("Invalid delegate.maxBlockHeight: {e}")))?;
    let public_key = crate::utils::encoding::parse_near_public_key(&body.public_key)?;

    Ok(tx::DelegateAction {
        sender_id: tx::AccountId(body.sender_id.trim().to_string()),
        receiver_id: tx::AccountId(body.receiver_id.trim().to_string()),
        actions,
        nonce,
        max_block_height,
        public_key: tx::PublicKey::from_ed25519_bytes(&public_key),
    })
}

// ---------------------------------------------------------------------------
// Access-key scoping
// ---------------------------------------------------------------------------

/// The relayer public key must be an active access key on the account, and
/// when the payload names the signing key, it must be the relayer key.
pub async fn ensure_relayer_key_is_active_access_key(
    near: &dyn NearClient,
    near_account_id: &str,
    relayer_public_key: &str,
    expected_signing_public_key: Option<&str>,
) -> AppResult<()> {
    if let Some(expected) = expected_signing_public_key {
        if normalize_near_public_key(expected) != normalize_near_public_key(relayer_public_key) {
            return Err(AppError::unauthorized(format!(
                "Payload signing key {expected} is not the relayer key {relayer_public_key}"
            )));
        }
    }

    let list = near.view_access_key_list(near_account_id.trim()).await?;
    let relayer_normalized = normalize_near_public_key(relayer_public_key);
    let active = list
        .keys
        .iter()
        .any(|k| normalize_near_public_key(&k.public_key) == relayer_normalized);
    if !active {
        return Err(AppError::unauthorized(format!(
            "Relayer key {relayer_public_key} is not an active access key on {near_account_id}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Session policy digest
// ---------------------------------------------------------------------------

/// SHA-256 over the canonical JSON of the (server-clamped) session policy.
pub fn compute_session_policy_digest(policy: &SessionPolicy) -> AppResult<[u8; 32]> {
    let value = serde_json::to_value(policy)?;
    Ok(canonical_sha256(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SigningPurpose, TransactionContext};
    use crate::near::rpc::{AccessKeyEntry, AccessKeyList, FinalExecutionOutcome};
    use async_trait::async_trait;

    fn near_tx_payload(deposit: &str) -> SigningPayload {
        let raw = json!({
            "txSigningRequests": [{
                "nearAccountId": "alice.testnet",
                "receiverId": "bob.testnet",
                "actions": [{"action_type": "Transfer", "deposit": deposit}]
            }],
            "transactionContext": {
                "nearPublicKeyStr": crate::utils::encoding::format_near_public_key(&[9u8; 32]),
                "nextNonce": "11",
                "txBlockHash": bs58::encode([7u8; 32]).into_string()
            }
        });
        SigningPayload::parse(SigningPurpose::NearTx, &raw).unwrap()
    }

    #[test]
    fn intent_digest_binds_action_fields() {
        let one = compute_intent_digest(&near_tx_payload("1"), "alice.testnet").unwrap();
        let same = compute_intent_digest(&near_tx_payload("1"), "alice.testnet").unwrap();
        let two = compute_intent_digest(&near_tx_payload("2"), "alice.testnet").unwrap();
        assert_eq!(one, same);
        assert_ne!(one, two);
    }

    #[test]
    fn intent_digest_mismatch_is_reported_as_such() {
        let bound = compute_intent_digest(&near_tx_payload("1"), "alice.testnet").unwrap();
        let err = ensure_intent_digest_matches(&near_tx_payload("2"), "alice.testnet", &bound)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::IntentDigestMismatch);
    }

    #[test]
    fn near_tx_intent_requires_user_to_own_every_request() {
        let payload = near_tx_payload("1");
        assert!(compute_intent_digest(&payload, "mallory.testnet").is_err());
    }

    #[test]
    fn near_tx_intent_ignores_transaction_context() {
        // The context (nonce, block hash) affects the signing digest, never
        // the approved intent.
        let mut payload = near_tx_payload("1");
        let base = compute_intent_digest(&payload, "alice.testnet").unwrap();
        if let SigningPayload::NearTx(p) = &mut payload {
            p.transaction_context = TransactionContext {
                near_public_key_str: crate::utils::encoding::format_near_public_key(&[8u8; 32]),
                next_nonce: "999".into(),
                tx_block_hash: bs58::encode([1u8; 32]).into_string(),
            };
        }
        assert_eq!(base, compute_intent_digest(&payload, "alice.testnet").unwrap());
    }

    #[test]
    fn signing_digest_must_be_derivable() {
        let payload = near_tx_payload("1");
        let digests = compute_signing_digests(&payload).unwrap();
        assert_eq!(digests.len(), 1);
        assert!(ensure_signing_digest_derivable(&payload, &digests[0]).is_ok());

        let err = ensure_signing_digest_derivable(&payload, &[0u8; 32]).unwrap_err();
        assert_eq!(err.code, ErrorCode::SigningDigestMismatch);
    }

    #[test]
    fn nep413_digests() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        let raw = json!({
            "message": "hello",
            "recipient": "app.example",
            "nonce": STANDARD.encode([3u8; 32]),
        });
        let payload = SigningPayload::parse(SigningPurpose::Nep413, &raw).unwrap();

        let intent = compute_intent_digest(&payload, "alice.testnet").unwrap();
        let other_user = compute_intent_digest(&payload, "bob.testnet").unwrap();
        assert_ne!(intent, other_user);

        let digests = compute_signing_digests(&payload).unwrap();
        assert_eq!(digests.len(), 1);
    }

    #[test]
    fn delegate_intent_requires_sender_match() {
        let raw = json!({
            "delegate": {
                "senderId": "alice.testnet",
                "receiverId": "bob.testnet",
                "actions": [{"action_type": "Transfer", "deposit": "1"}],
                "nonce": "5",
                "maxBlockHeight": "100",
                "publicKey": crate::utils::encoding::format_near_public_key(&[9u8; 32]),
            }
        });
        let payload = SigningPayload::parse(SigningPurpose::Nep461Delegate, &raw).unwrap();
        assert!(compute_intent_digest(&payload, "alice.testnet").is_ok());
        assert!(compute_intent_digest(&payload, "bob.testnet").is_err());
        assert_eq!(compute_signing_digests(&payload).unwrap().len(), 1);
    }

    struct FixedNear {
        keys: Vec<String>,
    }

    #[async_trait]
    impl NearClient for FixedNear {
        async fn view_access_key_list(&self, _account_id: &str) -> AppResult<AccessKeyList> {
            Ok(AccessKeyList {
                keys: self
                    .keys
                    .iter()
                    .map(|k| AccessKeyEntry {
                        public_key: k.clone(),
                        access_key: Value::Null,
                    })
                    .collect(),
            })
        }

        async fn tx_status(
            &self,
            _tx_hash: &str,
            _sender_account_id: &str,
        ) -> AppResult<FinalExecutionOutcome> {
            Err(AppError::internal("not used"))
        }
    }

    #[tokio::test]
    async fn access_key_scope_check() {
        let relayer_key = crate::utils::encoding::format_near_public_key(&[9u8; 32]);
        let near = FixedNear {
            keys: vec![relayer_key.clone()],
        };

        assert!(ensure_relayer_key_is_active_access_key(
            &near,
            "alice.testnet",
            &relayer_key,
            Some(&relayer_key)
        )
        .await
        .is_ok());

        // Expected signing key that differs from the relayer key fails.
        let other = crate::utils::encoding::format_near_public_key(&[8u8; 32]);
        assert!(ensure_relayer_key_is_active_access_key(
            &near,
            "alice.testnet",
            &relayer_key,
            Some(&other)
        )
        .await
        .is_err());

        // Relayer key missing from the account fails.
        let empty = FixedNear { keys: vec![] };
        assert!(ensure_relayer_key_is_active_access_key(
            &empty,
            "alice.testnet",
            &relayer_key,
            None
        )
        .await
        .is_err());
    }

    #[test]
    fn session_policy_digest_is_canonical() {
        let policy: SessionPolicy = serde_json::from_value(json!({
            "version": "threshold_session_v1",
            "nearAccountId": "alice.testnet",
            "rpId": "example.localhost",
            "relayerKeyId": "ed25519:abc",
            "sessionId": "sess-1",
            "ttlMs": 600000,
            "remainingUses": 20
        }))
        .unwrap();
        let a = compute_session_policy_digest(&policy).unwrap();
        let b = compute_session_policy_digest(&policy).unwrap();
        assert_eq!(a, b);

        let mut clamped = policy.clone();
        clamped.remaining_uses = 10;
        assert_ne!(a, compute_session_policy_digest(&clamped).unwrap());
    }
}
