use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{AppError, AppResult};
use crate::utils::encoding::{b64u_decode_32, b64u_encode, format_near_public_key};

/// Resolved key material for one group key. The signing share lives in a
/// zeroizing buffer: in derived mode it exists only for the duration of a
/// single handler call.
pub struct KeyMaterial {
    pub relayer_key_id: String,
    pub public_key: [u8; 32],
    pub server_signing_share: Zeroizing<[u8; 32]>,
    pub server_verifying_share: [u8; 32],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("relayer_key_id", &self.relayer_key_id)
            .field("public_key", &self.public_key)
            .field("server_signing_share", &"<redacted>")
            .field("server_verifying_share", &self.server_verifying_share)
            .finish()
    }
}

impl KeyMaterial {
    pub fn new(
        public_key: [u8; 32],
        server_signing_share: [u8; 32],
        server_verifying_share: [u8; 32],
    ) -> Self {
        // relayerKeyId := publicKey. Strategies refuse to operate on records
        // where the two disagree, so the equivalence is enforced at birth.
        Self {
            relayer_key_id: format_near_public_key(&public_key),
            public_key,
            server_signing_share: Zeroizing::new(server_signing_share),
            server_verifying_share,
        }
    }

    pub fn public_key_str(&self) -> String {
        format_near_public_key(&self.public_key)
    }

    pub fn server_verifying_share_b64u(&self) -> String {
        b64u_encode(&self.server_verifying_share)
    }
}

/// Persistent form of [`KeyMaterial`] for the KV-backed (stored) share mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeyMaterial {
    pub relayer_key_id: String,
    pub public_key: String,
    pub server_signing_share_b64u: String,
    pub server_verifying_share_b64u: String,
}

impl StoredKeyMaterial {
    pub fn from_material(material: &KeyMaterial) -> Self {
        Self {
            relayer_key_id: material.relayer_key_id.clone(),
            public_key: material.public_key_str(),
            server_signing_share_b64u: b64u_encode(material.server_signing_share.as_ref()),
            server_verifying_share_b64u: b64u_encode(&material.server_verifying_share),
        }
    }

    pub fn into_material(self) -> AppResult<KeyMaterial> {
        let public_key = crate::utils::encoding::parse_near_public_key(&self.public_key)?;
        let signing_share = b64u_decode_32(&self.server_signing_share_b64u)?;
        let verifying_share = b64u_decode_32(&self.server_verifying_share_b64u)?;
        let material = KeyMaterial::new(public_key, signing_share, verifying_share);
        if material.relayer_key_id != self.relayer_key_id {
            return Err(AppError::new(
                crate::error::ErrorCode::GroupPkMismatch,
                format!(
                    "Stored relayerKeyId {} does not match its public key {}",
                    self.relayer_key_id, material.relayer_key_id
                ),
            ));
        }
        Ok(material)
    }
}
