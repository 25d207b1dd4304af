//! NEAR transaction primitives and the pure signing-digest functions.
//!
//! The relayer never submits transactions; it only needs to reproduce the
//! exact 32-byte digests the client will sign (`sha256(borsh(Transaction))`,
//! the NEP-461 prefixed delegate hash, and the NEP-413 prefixed message hash)
//! so that a requested `signing_digest_32` can be checked against the payload.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};
use crate::utils::encoding::parse_near_public_key;

/// NEP-461 delegate action prefix (2^30 + 366).
const DELEGATE_ACTION_PREFIX: u32 = 1_073_742_190;

/// NEP-413 signed-message prefix (2^31 + 413).
const NEP413_PREFIX: u32 = 2_147_484_061;

pub type Nonce = u64;
pub type Gas = u64;
pub type Balance = u128;

// ---------------------------------------------------------------------------
// Borsh-serializable NEAR types
// ---------------------------------------------------------------------------

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccountId(pub String);

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub key_type: u8,
    pub key_data: [u8; 32],
}

impl PublicKey {
    pub fn from_ed25519_bytes(bytes: &[u8; 32]) -> Self {
        PublicKey {
            key_type: 0,
            key_data: *bytes,
        }
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct CryptoHash(pub [u8; 32]);

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallAction {
    pub method_name: String,
    pub args: Vec<u8>,
    pub gas: Gas,
    pub deposit: Balance,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccessKey {
    pub nonce: Nonce,
    pub permission: AccessKeyPermission,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum AccessKeyPermission {
    FunctionCall(FunctionCallPermission),
    FullAccess,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallPermission {
    pub allowance: Option<Balance>,
    pub receiver_id: String,
    pub method_names: Vec<String>,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    CreateAccount,
    DeployContract { code: Vec<u8> },
    FunctionCall(Box<FunctionCallAction>),
    Transfer { deposit: Balance },
    Stake { stake: Balance, public_key: PublicKey },
    AddKey { public_key: PublicKey, access_key: AccessKey },
    DeleteKey { public_key: PublicKey },
    DeleteAccount { beneficiary_id: AccountId },
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub signer_id: AccountId,
    pub public_key: PublicKey,
    pub nonce: Nonce,
    pub receiver_id: AccountId,
    pub block_hash: CryptoHash,
    pub actions: Vec<Action>,
}

impl Transaction {
    /// `sha256(borsh(Transaction))`, the digest the chain verifies against.
    pub fn signing_digest(&self) -> AppResult<[u8; 32]> {
        let bytes = borsh::to_vec(self)
            .map_err(|e| AppError::internal(format!("Failed to serialize transaction: {e}")))?;
        Ok(Sha256::digest(&bytes).into())
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct DelegateAction {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub actions: Vec<Action>,
    pub nonce: Nonce,
    pub max_block_height: u64,
    pub public_key: PublicKey,
}

// ---------------------------------------------------------------------------
// JSON wire shape of actions inside signing payloads
// ---------------------------------------------------------------------------

/// Action parameters as the client submits them. Numeric amounts travel as
/// decimal strings since JSON cannot carry u128 / u64 gas values faithfully.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "action_type")]
pub enum ActionParams {
    CreateAccount,
    DeployContract {
        code: Vec<u8>,
    },
    FunctionCall {
        method_name: String,
        args: String,
        gas: String,
        deposit: String,
    },
    Transfer {
        deposit: String,
    },
    Stake {
        stake: String,
        public_key: String,
    },
    AddKey {
        public_key: String,
        access_key: serde_json::Value,
    },
    DeleteKey {
        public_key: String,
    },
    DeleteAccount {
        beneficiary_id: String,
    },
}

fn parse_balance(field: &str, value: &str) -> AppResult<Balance> {
    value
        .trim()
        .parse::<Balance>()
        .map_err(|_| AppError::invalid_body(format!("Invalid {field}: {value}")))
}

fn parse_gas(value: &str) -> AppResult<Gas> {
    value
        .trim()
        .parse::<Gas>()
        .map_err(|_| AppError::invalid_body(format!("Invalid gas: {value}")))
}

fn parse_public_key_field(field: &str, value: &str) -> AppResult<PublicKey> {
    let bytes = parse_near_public_key(value)
        .map_err(|e| AppError::invalid_body(format!("Invalid {field}: {}", e.message)))?;
    Ok(PublicKey::from_ed25519_bytes(&bytes))
}

fn parse_access_key(value: &serde_json::Value) -> AppResult<AccessKey> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct AccessKeyWire {
        #[serde(default)]
        nonce: Option<u64>,
        permission: serde_json::Value,
    }
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct FunctionCallWire {
        #[serde(default)]
        allowance: Option<String>,
        receiver_id: String,
        #[serde(default)]
        method_names: Vec<String>,
    }

    let wire: AccessKeyWire = serde_json::from_value(value.clone())
        .map_err(|e| AppError::invalid_body(format!("Invalid accessKey: {e}")))?;

    let permission = if wire.permission == serde_json::json!("FullAccess") {
        AccessKeyPermission::FullAccess
    } else if let Some(fc) = wire.permission.get("FunctionCall") {
        let fc: FunctionCallWire = serde_json::from_value(fc.clone())
            .map_err(|e| AppError::invalid_body(format!("Invalid accessKey.permission: {e}")))?;
        let allowance = fc
            .allowance
            .as_deref()
            .map(|a| parse_balance("allowance", a))
            .transpose()?;
        AccessKeyPermission::FunctionCall(FunctionCallPermission {
            allowance,
            receiver_id: fc.receiver_id,
            method_names: fc.method_names,
        })
    } else if wire.permission.get("FullAccess").is_some() {
        AccessKeyPermission::FullAccess
    } else {
        return Err(AppError::invalid_body(
            "accessKey.permission must be FullAccess or FunctionCall",
        ));
    };

    Ok(AccessKey {
        nonce: wire.nonce.unwrap_or(0),
        permission,
    })
}

impl ActionParams {
    /// Validate the wire parameters and build the borsh-serializable action.
    pub fn to_action(&self) -> AppResult<Action> {
        match self {
            ActionParams::CreateAccount => Ok(Action::CreateAccount),

            ActionParams::DeployContract { code } => {
                if code.is_empty() {
                    return Err(AppError::invalid_body("Contract code cannot be empty"));
                }
                Ok(Action::DeployContract { code: code.clone() })
            }

            ActionParams::FunctionCall {
                method_name,
                args,
                gas,
                deposit,
            } => {
                if method_name.is_empty() {
                    return Err(AppError::invalid_body("Method name cannot be empty"));
                }
                Ok(Action::FunctionCall(Box::new(FunctionCallAction {
                    method_name: method_name.clone(),
                    args: args.as_bytes().to_vec(),
                    gas: parse_gas(gas)?,
                    deposit: parse_balance("deposit", deposit)?,
                })))
            }

            ActionParams::Transfer { deposit } => Ok(Action::Transfer {
                deposit: parse_balance("deposit", deposit)?,
            }),

            ActionParams::Stake { stake, public_key } => Ok(Action::Stake {
                stake: parse_balance("stake", stake)?,
                public_key: parse_public_key_field("publicKey", public_key)?,
            }),

            ActionParams::AddKey {
                public_key,
                access_key,
            } => Ok(Action::AddKey {
                public_key: parse_public_key_field("publicKey", public_key)?,
                access_key: parse_access_key(access_key)?,
            }),

            ActionParams::DeleteKey { public_key } => Ok(Action::DeleteKey {
                public_key: parse_public_key_field("publicKey", public_key)?,
            }),

            ActionParams::DeleteAccount { beneficiary_id } => {
                if beneficiary_id.trim().is_empty() {
                    return Err(AppError::invalid_body("beneficiaryId cannot be empty"));
                }
                Ok(Action::DeleteAccount {
                    beneficiary_id: AccountId(beneficiary_id.trim().to_string()),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Signing digests
// ---------------------------------------------------------------------------

fn parse_block_hash(block_hash_b58: &str) -> AppResult<[u8; 32]> {
    let decoded = bs58::decode(block_hash_b58.trim())
        .into_vec()
        .map_err(|e| AppError::invalid_body(format!("Invalid block hash base58: {e}")))?;
    decoded.as_slice().try_into().map_err(|_| {
        AppError::invalid_body(format!(
            "Invalid block hash length: expected 32 bytes, got {}",
            decoded.len()
        ))
    })
}

/// One digest per transaction request, nonces assigned `nextNonce + i`.
pub fn compute_near_tx_signing_digests(
    signer_account_id: &str,
    requests: &[(String, Vec<ActionParams>)],
    near_public_key_str: &str,
    next_nonce: &str,
    tx_block_hash: &str,
) -> AppResult<Vec<[u8; 32]>> {
    if requests.is_empty() {
        return Err(AppError::invalid_body("txSigningRequests must not be empty"));
    }

    let public_key_bytes = parse_near_public_key(near_public_key_str)?;
    let block_hash = parse_block_hash(tx_block_hash)?;
    let base_nonce: u64 = next_nonce
        .trim()
        .parse()
        .map_err(|e| AppError::invalid_body(format!("Invalid transactionContext.nextNonce: {e}")))?;

    let mut digests = Vec::with_capacity(requests.len());
    for (i, (receiver_id, action_params)) in requests.iter().enumerate() {
        let actions = action_params
            .iter()
            .map(|p| p.to_action())
            .collect::<AppResult<Vec<_>>>()?;
        let tx = Transaction {
            signer_id: AccountId(signer_account_id.trim().to_string()),
            public_key: PublicKey::from_ed25519_bytes(&public_key_bytes),
            nonce: base_nonce.saturating_add(i as u64),
            receiver_id: AccountId(receiver_id.trim().to_string()),
            block_hash: CryptoHash(block_hash),
            actions,
        };
        digests.push(tx.signing_digest()?);
    }
    Ok(digests)
}

/// NEP-461: `sha256(u32le(prefix) || borsh(DelegateAction))`.
pub fn compute_delegate_signing_digest(delegate: &DelegateAction) -> AppResult<[u8; 32]> {
    let mut encoded = DELEGATE_ACTION_PREFIX.to_le_bytes().to_vec();
    let body = borsh::to_vec(delegate)
        .map_err(|e| AppError::internal(format!("Failed to serialize delegate action: {e}")))?;
    encoded.extend_from_slice(&body);
    Ok(Sha256::digest(&encoded).into())
}

/// NEP-413: `sha256(u32le(prefix) || borsh({message, recipient, nonce, state}))`.
pub fn compute_nep413_signing_digest(
    message: &str,
    recipient: &str,
    nonce: &[u8; 32],
    state: Option<&str>,
) -> AppResult<[u8; 32]> {
    #[derive(BorshSerialize)]
    struct Nep413Payload {
        message: String,
        recipient: String,
        nonce: [u8; 32],
        state: Option<String>,
    }

    let payload = Nep413Payload {
        message: message.to_string(),
        recipient: recipient.to_string(),
        nonce: *nonce,
        state: state.map(|s| s.to_string()),
    };
    let body = borsh::to_vec(&payload)
        .map_err(|e| AppError::internal(format!("Failed to serialize NEP-413 payload: {e}")))?;
    let mut encoded = NEP413_PREFIX.to_le_bytes().to_vec();
    encoded.extend_from_slice(&body);
    Ok(Sha256::digest(&encoded).into())
}
