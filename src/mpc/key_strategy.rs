//! Key-material sources for the relayer participant.
//!
//! `kv` keeps a randomly generated signing share in the KeyStore. `derived`
//! recomputes the share on demand from a 32-byte master secret plus public
//! binding inputs (account id, rpId, client verifying share), so a stateless
//! relayer never persists secret material at all.

use std::sync::Arc;

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{AppError, AppResult, ErrorCode};
use crate::models::{KeyMaterial, StoredKeyMaterial};
use crate::mpc::frost;
use crate::stores::KeyStore;
use crate::utils::encoding::b64u_decode_32;

const RELAYER_SHARE_INFO_PREFIX_V1: &[u8] = b"w3a/threshold/relayer_share_v1";
const DERIVE_NONZERO_MAX_TRIES_V1: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    Auto,
    Kv,
    Derived,
}

impl ShareMode {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim() {
            "" | "auto" => Ok(ShareMode::Auto),
            "kv" => Ok(ShareMode::Kv),
            "derived" => Ok(ShareMode::Derived),
            other => Err(AppError::missing_config(format!(
                "THRESHOLD_ED25519_SHARE_MODE must be auto|kv|derived, got {other}"
            ))),
        }
    }
}

pub struct KeyStrategy {
    derived: bool,
    master_secret: Option<Zeroizing<[u8; 32]>>,
    client_participant_id: u16,
    relayer_participant_id: u16,
    key_store: Arc<dyn KeyStore>,
}

impl KeyStrategy {
    pub fn new(
        mode: ShareMode,
        master_secret: Option<[u8; 32]>,
        client_participant_id: u16,
        relayer_participant_id: u16,
        key_store: Arc<dyn KeyStore>,
    ) -> AppResult<Self> {
        if client_participant_id == 0 || relayer_participant_id == 0 {
            return Err(AppError::missing_config(
                "Participant ids must be integers in [1,65535]",
            ));
        }
        if client_participant_id == relayer_participant_id {
            return Err(AppError::missing_config(
                "clientParticipantId must differ from relayerParticipantId",
            ));
        }

        let derived = match mode {
            ShareMode::Auto => master_secret.is_some(),
            ShareMode::Derived => {
                if master_secret.is_none() {
                    return Err(AppError::missing_config(
                        "THRESHOLD_ED25519_MASTER_SECRET_B64U is required in derived mode",
                    ));
                }
                true
            }
            ShareMode::Kv => false,
        };

        Ok(Self {
            derived,
            master_secret: master_secret.map(Zeroizing::new),
            client_participant_id,
            relayer_participant_id,
            key_store,
        })
    }

    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn client_participant_id(&self) -> u16 {
        self.client_participant_id
    }

    pub fn relayer_participant_id(&self) -> u16 {
        self.relayer_participant_id
    }

    /// The 2-party signer set, sorted.
    pub fn participant_ids(&self) -> Vec<u16> {
        let mut ids = vec![self.client_participant_id, self.relayer_participant_id];
        ids.sort_unstable();
        ids
    }

    /// Create (or deterministically re-create) key material for a client
    /// verifying share. Derived mode binds account + rpId; stored mode
    /// generates a fresh random share and persists it.
    pub async fn keygen_from_client_verifying_share(
        &self,
        near_account_id: &str,
        rp_id: Option<&str>,
        client_verifying_share_b64u: &str,
    ) -> AppResult<KeyMaterial> {
        let client_bytes = b64u_decode_32(client_verifying_share_b64u)
            .map_err(|e| AppError::invalid_body(format!("Invalid clientVerifyingShareB64u: {}", e.message)))?;
        let client_point = CompressedEdwardsY(client_bytes)
            .decompress()
            .ok_or_else(|| AppError::invalid_body("Invalid client verifying share point"))?;

        let relayer_scalar = if self.derived {
            let rp_id = rp_id.ok_or_else(|| {
                AppError::invalid_body("rpId is required for derived-share keygen")
            })?;
            self.derive_relayer_share_scalar(near_account_id, rp_id, &client_bytes)?
        } else {
            random_nonzero_scalar()
        };

        let relayer_point = ED25519_BASEPOINT_POINT * relayer_scalar;
        let group_pk = frost::compute_group_public_key_2p(
            &client_point,
            &relayer_point,
            self.client_participant_id,
            self.relayer_participant_id,
        )?;

        let material = KeyMaterial::new(
            group_pk,
            relayer_scalar.to_bytes(),
            relayer_point.compress().to_bytes(),
        );

        if !self.derived {
            self.key_store
                .put(&material.relayer_key_id, &StoredKeyMaterial::from_material(&material))
                .await?;
        }

        tracing::debug!(
            relayer_key_id = %material.relayer_key_id,
            derived = self.derived,
            "Key material generated"
        );

        Ok(material)
    }

    /// Look up (stored) or recompute (derived) the key material for a
    /// signing request, failing closed on any mismatch.
    pub async fn resolve_key_material(
        &self,
        relayer_key_id: &str,
        near_account_id: &str,
        rp_id: Option<&str>,
        client_verifying_share_b64u: &str,
    ) -> AppResult<KeyMaterial> {
        if self.derived {
            let material = self
                .keygen_from_client_verifying_share(
                    near_account_id,
                    rp_id,
                    client_verifying_share_b64u,
                )
                .await?;
            if material.relayer_key_id != relayer_key_id.trim() {
                return Err(AppError::new(
                    ErrorCode::GroupPkMismatch,
                    format!(
                        "Derived group key {} does not match requested relayerKeyId {}",
                        material.relayer_key_id, relayer_key_id
                    ),
                ));
            }
            return Ok(material);
        }

        let stored = self
            .key_store
            .get(relayer_key_id.trim())
            .await?
            .ok_or_else(|| {
                AppError::missing_key(format!("No key material for relayerKeyId {relayer_key_id}"))
            })?;
        let material = stored.into_material()?;

        // A stored key only signs for the client share it was created with:
        // recombining with a different share must fail closed.
        let client_bytes = b64u_decode_32(client_verifying_share_b64u)
            .map_err(|e| AppError::invalid_body(format!("Invalid clientVerifyingShareB64u: {}", e.message)))?;
        let client_point = CompressedEdwardsY(client_bytes)
            .decompress()
            .ok_or_else(|| AppError::invalid_body("Invalid client verifying share point"))?;
        let relayer_point = CompressedEdwardsY(material.server_verifying_share)
            .decompress()
            .ok_or_else(|| AppError::internal("Stored relayer verifying share is invalid"))?;
        let expected_pk = frost::compute_group_public_key_2p(
            &client_point,
            &relayer_point,
            self.client_participant_id,
            self.relayer_participant_id,
        )?;
        if expected_pk != material.public_key {
            return Err(AppError::new(
                ErrorCode::GroupPkMismatch,
                "Client verifying share does not recombine to the stored group key",
            ));
        }

        Ok(material)
    }

    /// HKDF-SHA256 derivation of the relayer signing share.
    ///
    /// salt = SHA-256(clientVerifyingShare); ikm = master secret;
    /// info = prefix || 0 || nearAccountId || 0 || rpId || 0 || epoch || ctr.
    /// The zero separators prevent ambiguous concatenation; epoch is reserved
    /// for future rotations. `ctr` drives deterministic rejection sampling of
    /// the astronomically unlikely zero scalar.
    fn derive_relayer_share_scalar(
        &self,
        near_account_id: &str,
        rp_id: &str,
        client_verifying_share: &[u8; 32],
    ) -> AppResult<Scalar> {
        let master_secret = self
            .master_secret
            .as_ref()
            .ok_or_else(|| AppError::missing_config("Master secret is not configured"))?;

        let rp_id = rp_id.trim().to_ascii_lowercase();
        let near_account_id = near_account_id.trim();

        let salt = Sha256::digest(client_verifying_share);
        let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), master_secret.as_ref());

        let mut info: Vec<u8> = Vec::with_capacity(
            RELAYER_SHARE_INFO_PREFIX_V1.len() + near_account_id.len() + rp_id.len() + 15,
        );
        info.extend_from_slice(RELAYER_SHARE_INFO_PREFIX_V1);
        info.push(0);
        info.extend_from_slice(near_account_id.as_bytes());
        info.push(0);
        info.extend_from_slice(rp_id.as_bytes());
        info.push(0);
        info.extend_from_slice(&0u64.to_le_bytes()); // epoch (reserved)
        info.extend_from_slice(&0u32.to_le_bytes()); // ctr (overwritten per attempt)
        let ctr_offset = info.len() - 4;

        let mut okm = Zeroizing::new([0u8; 64]);
        for ctr in 0u32..DERIVE_NONZERO_MAX_TRIES_V1 {
            info[ctr_offset..].copy_from_slice(&ctr.to_le_bytes());
            hk.expand(&info, okm.as_mut_slice())
                .map_err(|_| AppError::internal("HKDF expand failed"))?;
            let scalar = Scalar::from_bytes_mod_order_wide(&okm);
            if scalar != Scalar::ZERO {
                return Ok(scalar);
            }
        }

        Err(AppError::internal(
            "Derived relayer signing share is zero; retry with a different master secret",
        ))
    }
}

fn random_nonzero_scalar() -> Scalar {
    use rand::RngCore;
    let mut rng = rand::rngs::OsRng;
    loop {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        let scalar = Scalar::from_bytes_mod_order_wide(&wide);
        if scalar != Scalar::ZERO {
            return scalar;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryStore;
    use crate::utils::encoding::b64u_encode;

    fn client_share_b64u(seed: u64) -> String {
        let point = ED25519_BASEPOINT_POINT * Scalar::from(seed);
        b64u_encode(&point.compress().to_bytes())
    }

    fn derived_strategy() -> KeyStrategy {
        KeyStrategy::new(
            ShareMode::Derived,
            Some([0x11; 32]),
            1,
            2,
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn share_mode_parsing() {
        assert_eq!(ShareMode::parse("auto").unwrap(), ShareMode::Auto);
        assert_eq!(ShareMode::parse("kv").unwrap(), ShareMode::Kv);
        assert_eq!(ShareMode::parse("derived").unwrap(), ShareMode::Derived);
        assert!(ShareMode::parse("other").is_err());
    }

    #[test]
    fn auto_mode_follows_master_secret() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
        let with_secret =
            KeyStrategy::new(ShareMode::Auto, Some([1u8; 32]), 1, 2, store.clone()).unwrap();
        assert!(with_secret.is_derived());
        let without_secret = KeyStrategy::new(ShareMode::Auto, None, 1, 2, store).unwrap();
        assert!(!without_secret.is_derived());
    }

    #[test]
    fn rejects_invalid_participant_config() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::new());
        assert!(KeyStrategy::new(ShareMode::Kv, None, 2, 2, store.clone()).is_err());
        assert!(KeyStrategy::new(ShareMode::Kv, None, 0, 2, store.clone()).is_err());
        assert!(KeyStrategy::new(ShareMode::Derived, None, 1, 2, store).is_err());
    }

    #[tokio::test]
    async fn derived_keygen_is_deterministic_and_binding() {
        let strategy = derived_strategy();
        let share = client_share_b64u(5);

        let first = strategy
            .keygen_from_client_verifying_share(
                "alice.testnet",
                Some("example.localhost"),
                &share,
            )
            .await
            .unwrap();
        let second = strategy
            .keygen_from_client_verifying_share(
                "alice.testnet",
                Some("example.localhost"),
                &share,
            )
            .await
            .unwrap();
        assert_eq!(first.public_key, second.public_key);
        assert_eq!(
            first.server_verifying_share_b64u(),
            second.server_verifying_share_b64u()
        );

        // A different rpId must bind to a different group key.
        let other_rp = strategy
            .keygen_from_client_verifying_share("alice.testnet", Some("other.localhost"), &share)
            .await
            .unwrap();
        assert_ne!(first.public_key, other_rp.public_key);

        // rpId is case-insensitive.
        let mixed_case = strategy
            .keygen_from_client_verifying_share(
                "alice.testnet",
                Some("Example.LOCALHOST"),
                &share,
            )
            .await
            .unwrap();
        assert_eq!(first.public_key, mixed_case.public_key);

        // A different account must bind to a different group key.
        let other_account = strategy
            .keygen_from_client_verifying_share("bob.testnet", Some("example.localhost"), &share)
            .await
            .unwrap();
        assert_ne!(first.public_key, other_account.public_key);
    }

    #[tokio::test]
    async fn derived_resolve_checks_requested_key_id() {
        let strategy = derived_strategy();
        let share = client_share_b64u(5);
        let material = strategy
            .keygen_from_client_verifying_share(
                "alice.testnet",
                Some("example.localhost"),
                &share,
            )
            .await
            .unwrap();

        let resolved = strategy
            .resolve_key_material(
                &material.relayer_key_id,
                "alice.testnet",
                Some("example.localhost"),
                &share,
            )
            .await
            .unwrap();
        assert_eq!(resolved.public_key, material.public_key);

        let err = strategy
            .resolve_key_material(
                &material.relayer_key_id,
                "alice.testnet",
                Some("other.localhost"),
                &share,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::GroupPkMismatch);
    }

    #[tokio::test]
    async fn stored_mode_persists_and_fails_closed_on_wrong_client_share() {
        let store = Arc::new(MemoryStore::new());
        let strategy =
            KeyStrategy::new(ShareMode::Kv, None, 1, 2, store.clone()).unwrap();
        let share = client_share_b64u(7);

        let material = strategy
            .keygen_from_client_verifying_share("alice.testnet", None, &share)
            .await
            .unwrap();

        let resolved = strategy
            .resolve_key_material(&material.relayer_key_id, "alice.testnet", None, &share)
            .await
            .unwrap();
        assert_eq!(resolved.public_key, material.public_key);

        let err = strategy
            .resolve_key_material(
                &material.relayer_key_id,
                "alice.testnet",
                None,
                &client_share_b64u(8),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::GroupPkMismatch);

        let err = strategy
            .resolve_key_material("ed25519:missing", "alice.testnet", None, &share)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingKey);
    }
}
