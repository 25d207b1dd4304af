use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::session::SigningPurpose;
use crate::near::tx::ActionParams;

// ---------------------------------------------------------------------------
// VRF-bound data and WebAuthn material
// ---------------------------------------------------------------------------

/// The VRF challenge data a WebAuthn assertion is bound to. Only the fields
/// the relayer checks are typed; everything else is carried through verbatim
/// for the external verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrfData {
    pub user_id: String,
    pub rp_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_digest_32: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_policy_digest_32: Option<Vec<u8>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl VrfData {
    pub fn intent_digest(&self) -> AppResult<[u8; 32]> {
        let bytes = self
            .intent_digest_32
            .as_deref()
            .ok_or_else(|| AppError::invalid_body("vrf_data.intent_digest_32 is required"))?;
        bytes
            .try_into()
            .map_err(|_| AppError::invalid_body("vrf_data.intent_digest_32 must be 32 bytes"))
    }

    pub fn session_policy_digest(&self) -> AppResult<[u8; 32]> {
        let bytes = self.session_policy_digest_32.as_deref().ok_or_else(|| {
            AppError::invalid_body("vrf_data.session_policy_digest_32 is required")
        })?;
        bytes.try_into().map_err(|_| {
            AppError::invalid_body("vrf_data.session_policy_digest_32 must be 32 bytes")
        })
    }
}

// ---------------------------------------------------------------------------
// Signing payloads (tagged union over `purpose`)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSigningRequest {
    pub near_account_id: String,
    pub receiver_id: String,
    pub actions: Vec<ActionParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub near_public_key_str: String,
    pub next_nonce: String,
    pub tx_block_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearTxPayload {
    pub tx_signing_requests: Vec<TxSigningRequest>,
    pub transaction_context: TransactionContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateBody {
    pub sender_id: String,
    pub receiver_id: String,
    pub actions: Vec<ActionParams>,
    pub nonce: String,
    pub max_block_height: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatePayload {
    pub delegate: DelegateBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nep413Payload {
    pub message: String,
    pub recipient: String,
    /// Standard base64 of a 32-byte nonce.
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Fully parsed signing payload, one variant per purpose.
#[derive(Debug, Clone)]
pub enum SigningPayload {
    NearTx(NearTxPayload),
    Delegate(DelegatePayload),
    Nep413(Nep413Payload),
}

impl SigningPayload {
    /// Parse the raw JSON payload under the declared purpose. Validation of
    /// digests and account bindings happens downstream; this only enforces
    /// shape.
    pub fn parse(purpose: SigningPurpose, raw: &Value) -> AppResult<Self> {
        match purpose {
            SigningPurpose::NearTx => {
                let payload: NearTxPayload = serde_json::from_value(raw.clone())
                    .map_err(|e| AppError::invalid_body(format!("Invalid near_tx signingPayload: {e}")))?;
                if payload.tx_signing_requests.is_empty() {
                    return Err(AppError::invalid_body("txSigningRequests must not be empty"));
                }
                Ok(SigningPayload::NearTx(payload))
            }
            SigningPurpose::Nep461Delegate => {
                let payload: DelegatePayload = serde_json::from_value(raw.clone()).map_err(|e| {
                    AppError::invalid_body(format!("Invalid nep461_delegate signingPayload: {e}"))
                })?;
                Ok(SigningPayload::Delegate(payload))
            }
            SigningPurpose::Nep413 => {
                let payload: Nep413Payload = serde_json::from_value(raw.clone())
                    .map_err(|e| AppError::invalid_body(format!("Invalid nep413 signingPayload: {e}")))?;
                Ok(SigningPayload::Nep413(payload))
            }
        }
    }

    /// The public key the payload expects to sign with, when it names one.
    /// Used for the access-key scope equality check.
    pub fn expected_signing_public_key(&self) -> Option<&str> {
        match self {
            SigningPayload::NearTx(p) => Some(&p.transaction_context.near_public_key_str),
            SigningPayload::Delegate(p) => Some(&p.delegate.public_key),
            SigningPayload::Nep413(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session policy (multi-use auth sessions)
// ---------------------------------------------------------------------------

pub const SESSION_POLICY_VERSION: &str = "threshold_session_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionPolicy {
    pub version: String,
    pub near_account_id: String,
    pub rp_id: String,
    pub relayer_key_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_ids: Option<Vec<u16>>,
    pub ttl_ms: u64,
    pub remaining_uses: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_enforces_purpose_shape() {
        let near_tx = json!({
            "txSigningRequests": [{
                "nearAccountId": "alice.testnet",
                "receiverId": "bob.testnet",
                "actions": [{"action_type": "Transfer", "deposit": "1"}]
            }],
            "transactionContext": {
                "nearPublicKeyStr": "ed25519:abc",
                "nextNonce": "7",
                "txBlockHash": "hash"
            }
        });
        assert!(SigningPayload::parse(SigningPurpose::NearTx, &near_tx).is_ok());
        assert!(SigningPayload::parse(SigningPurpose::Nep413, &near_tx).is_err());

        let empty = json!({
            "txSigningRequests": [],
            "transactionContext": {
                "nearPublicKeyStr": "ed25519:abc",
                "nextNonce": "7",
                "txBlockHash": "hash"
            }
        });
        assert!(SigningPayload::parse(SigningPurpose::NearTx, &empty).is_err());
    }

    #[test]
    fn vrf_data_keeps_unknown_fields() {
        let raw = json!({
            "user_id": "alice.testnet",
            "rp_id": "example.localhost",
            "intent_digest_32": vec![1u8; 32],
            "vrf_output": [1, 2, 3],
            "block_height": 10
        });
        let vrf: VrfData = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(vrf.intent_digest().unwrap(), [1u8; 32]);
        assert!(vrf.extra.contains_key("vrf_output"));

        let back = serde_json::to_value(&vrf).unwrap();
        assert_eq!(back.get("block_height"), raw.get("block_height"));
    }

    #[test]
    fn session_policy_rejects_unknown_fields() {
        let raw = json!({
            "version": SESSION_POLICY_VERSION,
            "nearAccountId": "alice.testnet",
            "rpId": "example.localhost",
            "relayerKeyId": "ed25519:abc",
            "sessionId": "sess-1",
            "ttlMs": 60000,
            "remainingUses": 5,
            "unexpected": true
        });
        assert!(serde_json::from_value::<SessionPolicy>(raw).is_err());
    }
}
