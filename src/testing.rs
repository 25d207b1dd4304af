//! Shared fixtures for service-level tests: an in-memory state, a
//! controllable NEAR client double, and helpers that produce well-formed
//! requests for the threshold flows.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::scalar::Scalar;
use serde_json::{json, Value};

use crate::config::{Config, NodeRole};
use crate::error::{AppError, AppResult};
use crate::models::{SigningPayload, SigningPurpose, VrfData};
use crate::mpc::key_strategy::{KeyStrategy, ShareMode};
use crate::near::rpc::{AccessKeyEntry, AccessKeyList, FinalExecutionOutcome, NearClient};
use crate::services::authorize::AuthorizeRequest;
use crate::stores::memory::MemoryStore;
use crate::stores::Stores;
use crate::utils::encoding::b64u_encode;
use crate::validation;
use crate::AppState;

pub const TEST_MASTER_SECRET: [u8; 32] = [0x11; 32];
pub const TEST_SHARED_SECRET: [u8; 32] = [0x42; 32];

// ---------------------------------------------------------------------------
// NEAR client double
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TestNear {
    pub access_keys: Mutex<Vec<String>>,
    pub tx_outcome: Option<Value>,
}

impl TestNear {
    pub fn add_access_key(&self, public_key: &str) {
        self.access_keys.lock().unwrap().push(public_key.to_string());
    }
}

#[async_trait]
impl NearClient for TestNear {
    async fn view_access_key_list(&self, _account_id: &str) -> AppResult<AccessKeyList> {
        Ok(AccessKeyList {
            keys: self
                .access_keys
                .lock()
                .unwrap()
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
        match &self.tx_outcome {
            Some(outcome) => serde_json::from_value(outcome.clone())
                .map_err(|e| AppError::internal(format!("bad test outcome: {e}"))),
            None => Err(AppError::internal("no tx outcome configured")),
        }
    }
}

// ---------------------------------------------------------------------------
// State construction
// ---------------------------------------------------------------------------

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        node_role: NodeRole::Coordinator,
        share_mode: "derived".into(),
        master_secret: Some(TEST_MASTER_SECRET),
        client_participant_id: 1,
        relayer_participant_id: 2,
        coordinator_peers: Vec::new(),
        cosigners: Vec::new(),
        cosigner_threshold: None,
        coordinator_shared_secret: Some(TEST_SHARED_SECRET),
        cosigner_timeout_ms: 10_000,
        key_prefix: "threshold:".into(),
        redis_url: None,
        upstash_redis_rest_url: None,
        upstash_redis_rest_token: None,
        near_rpc_url: "http://127.0.0.1:1/unused".into(),
        webauthn_verify_url: None,
        webauthn_contract_id: None,
        cors_origins: Vec::new(),
    }
}

pub async fn test_state(near: TestNear) -> AppState {
    test_state_shared(Arc::new(near)).await
}

pub async fn test_state_shared(near: Arc<TestNear>) -> AppState {
    test_state_with_config(near, test_config()).await
}

pub async fn test_state_with_config(near: Arc<TestNear>, config: Config) -> AppState {
    let memory = Arc::new(MemoryStore::new());
    let stores = Arc::new(Stores {
        keys: memory.clone(),
        mpc: memory.clone(),
        auth: memory.clone(),
        memory: Some(memory),
    });

    let strategy = Arc::new(
        KeyStrategy::new(
            ShareMode::parse(&config.share_mode).unwrap(),
            config.master_secret,
            config.client_participant_id,
            config.relayer_participant_id,
            stores.keys.clone(),
        )
        .unwrap(),
    );

    AppState {
        config: Arc::new(config),
        stores,
        strategy,
        near,
        webauthn: Arc::new(crate::webauthn::testing::StaticVerifier::approving()),
        http_client: reqwest::Client::new(),
    }
}

// ---------------------------------------------------------------------------
// Key + request fixtures
// ---------------------------------------------------------------------------

pub struct TestKey {
    pub relayer_key_id: String,
    pub public_key: String,
    pub client_share_b64u: String,
    pub client_scalar: Scalar,
}

pub fn test_client_scalar() -> Scalar {
    crate::mpc::scalar::hash_to_scalar(&[b"test client signing share"])
}

/// Derive the group key for the canonical test identity
/// (`alice.testnet` / `example.localhost`).
pub async fn keygen_test_key(state: &AppState) -> TestKey {
    let client_scalar = test_client_scalar();
    let client_share_b64u = b64u_encode(
        &(ED25519_BASEPOINT_POINT * client_scalar)
            .compress()
            .to_bytes(),
    );
    let material = state
        .strategy
        .keygen_from_client_verifying_share(
            "alice.testnet",
            Some("example.localhost"),
            &client_share_b64u,
        )
        .await
        .unwrap();
    TestKey {
        relayer_key_id: material.relayer_key_id.clone(),
        public_key: material.public_key_str(),
        client_share_b64u,
        client_scalar,
    }
}

/// A transfer payload signed with the group key itself as the transaction
/// signing key (so the expected-signing-key scope check passes).
pub fn signing_payload_value(key: &TestKey, deposit: &str) -> Value {
    json!({
        "txSigningRequests": [{
            "nearAccountId": "alice.testnet",
            "receiverId": "bob.testnet",
            "actions": [{"action_type": "Transfer", "deposit": deposit}]
        }],
        "transactionContext": {
            "nearPublicKeyStr": key.public_key,
            "nextNonce": "11",
            "txBlockHash": bs58::encode([7u8; 32]).into_string()
        }
    })
}

pub fn authorize_request_for(key: &TestKey, deposit: &str) -> AuthorizeRequest {
    let payload_value = signing_payload_value(key, deposit);
    let payload = SigningPayload::parse(SigningPurpose::NearTx, &payload_value).unwrap();
    let intent = validation::compute_intent_digest(&payload, "alice.testnet").unwrap();
    let signing = validation::compute_signing_digests(&payload).unwrap()[0];

    AuthorizeRequest {
        relayer_key_id: key.relayer_key_id.clone(),
        client_verifying_share_b64u: key.client_share_b64u.clone(),
        purpose: SigningPurpose::NearTx,
        signing_digest_32: signing.to_vec(),
        signing_payload: payload_value,
        vrf_data: serde_json::from_value(json!({
            "user_id": "alice.testnet",
            "rp_id": "example.localhost",
            "intent_digest_32": intent.to_vec(),
        }))
        .unwrap(),
        webauthn_authentication: json!({}),
    }
}

pub fn session_policy_value(key: &TestKey, session_id: &str, ttl_ms: u64, uses: u32) -> Value {
    json!({
        "version": "threshold_session_v1",
        "nearAccountId": "alice.testnet",
        "rpId": "example.localhost",
        "relayerKeyId": key.relayer_key_id,
        "sessionId": session_id,
        "ttlMs": ttl_ms,
        "remainingUses": uses,
    })
}

pub fn vrf_with_policy_digest(_key: &TestKey, digest: &[u8; 32]) -> VrfData {
    serde_json::from_value(json!({
        "user_id": "alice.testnet",
        "rp_id": "example.localhost",
        "session_policy_digest_32": digest.to_vec(),
    }))
    .unwrap()
}
