use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::encoding::now_ms;

/// What kind of payload an authorization covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningPurpose {
    #[serde(rename = "near_tx")]
    NearTx,
    #[serde(rename = "nep461_delegate")]
    Nep461Delegate,
    #[serde(rename = "nep413")]
    Nep413,
}

/// Round-1 nonce commitments for one participant, base64url points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitments {
    pub hiding: String,
    pub binding: String,
}

/// Single-use authorization minted by `authorize` / session consumption and
/// consumed exactly once by `sign/init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcSession {
    pub expires_at_ms: u64,
    pub relayer_key_id: String,
    pub purpose: SigningPurpose,
    pub intent_digest_b64u: String,
    pub signing_digest_b64u: String,
    pub user_id: String,
    pub rp_id: String,
    pub client_verifying_share_b64u: String,
    pub participant_ids: Vec<u16>,
}

impl MpcSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at_ms <= now_ms()
    }
}

/// Two-round state between `sign/init` and `sign/finalize`. Also used by
/// co-sign peers; only those carry the Shamir sub-share and cosigner id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningSession {
    pub expires_at_ms: u64,
    pub mpc_session_id: String,
    pub relayer_key_id: String,
    pub signing_digest_b64u: String,
    pub user_id: String,
    pub rp_id: String,
    pub client_verifying_share_b64u: String,
    pub commitments_by_id: BTreeMap<String, Commitments>,
    pub server_nonces_b64u: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_signing_share_b64u: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosigner_id: Option<u16>,
    pub participant_ids: Vec<u16>,
}

impl SigningSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at_ms <= now_ms()
    }
}

/// Remote fan-out model recorded in a coordinator session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutMode {
    /// The whole MPC session is delegated to one peer relayer.
    Peer,
    /// The relayer share is Shamir-split across t-of-n co-signers.
    Cosigner,
}

/// Per-peer slot of a coordinator session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosignerSlot {
    pub id: u16,
    pub relayer_url: String,
    pub grant: String,
    pub peer_signing_session_id: String,
}

/// `sign/init` state when round 2 must be fanned out to remote peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorSigningSession {
    pub expires_at_ms: u64,
    pub mpc_session_id: String,
    pub relayer_key_id: String,
    pub group_public_key: String,
    pub signing_digest_b64u: String,
    pub user_id: String,
    pub rp_id: String,
    pub client_verifying_share_b64u: String,
    pub mode: FanOutMode,
    pub selected_cosigner_ids: Vec<u16>,
    pub slots: Vec<CosignerSlot>,
    pub client_commitments: Commitments,
    pub server_commitments: Commitments,
    pub participant_ids: Vec<u16>,
}

impl CoordinatorSigningSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at_ms <= now_ms()
    }
}

/// Multi-use authorization. The remaining-use counter lives next to the
/// record in the store so consumption can be atomic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub expires_at_ms: u64,
    pub relayer_key_id: String,
    pub user_id: String,
    pub rp_id: String,
    pub participant_ids: Vec<u16>,
}

impl AuthSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at_ms <= now_ms()
    }
}
