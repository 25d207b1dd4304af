use std::env;
use std::net::SocketAddr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

/// Whether this node serves the public signing surface or only the internal
/// co-sign endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Coordinator,
    Participant,
}

/// A peer relayer the coordinator can delegate a whole MPC session to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorPeer {
    pub id: u16,
    pub relayer_url: String,
}

/// A co-signer holding a Shamir sub-share of the relayer signing share.
/// Multiple entries with the same id act as alternate URLs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosignerPeer {
    pub cosigner_id: u16,
    pub relayer_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub node_role: NodeRole,

    // Threshold key material
    pub share_mode: String,
    pub master_secret: Option<[u8; 32]>,
    pub client_participant_id: u16,
    pub relayer_participant_id: u16,

    // Fan-out
    pub coordinator_peers: Vec<CoordinatorPeer>,
    pub cosigners: Vec<CosignerPeer>,
    pub cosigner_threshold: Option<u16>,
    pub coordinator_shared_secret: Option<[u8; 32]>,
    pub cosigner_timeout_ms: u64,

    // Stores
    pub key_prefix: String,
    pub redis_url: Option<String>,
    pub upstash_redis_rest_url: Option<String>,
    pub upstash_redis_rest_token: Option<String>,

    // External collaborators
    pub near_rpc_url: String,
    pub webauthn_verify_url: Option<String>,
    /// When set, registration transactions must target this contract.
    pub webauthn_contract_id: Option<String>,

    // CORS
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env("HOST", "0.0.0.0"),
            port: env("PORT", "3000").parse().expect("PORT must be a number"),
            node_role: parse_node_role(&env("THRESHOLD_NODE_ROLE", "coordinator")),

            share_mode: env("THRESHOLD_ED25519_SHARE_MODE", "auto"),
            master_secret: env_opt("THRESHOLD_ED25519_MASTER_SECRET_B64U")
                .map(|v| parse_secret_32("THRESHOLD_ED25519_MASTER_SECRET_B64U", &v)),
            client_participant_id: env("THRESHOLD_ED25519_CLIENT_PARTICIPANT_ID", "1")
                .parse()
                .expect("THRESHOLD_ED25519_CLIENT_PARTICIPANT_ID must be an integer in [1,65535]"),
            relayer_participant_id: env("THRESHOLD_ED25519_RELAYER_PARTICIPANT_ID", "2")
                .parse()
                .expect("THRESHOLD_ED25519_RELAYER_PARTICIPANT_ID must be an integer in [1,65535]"),

            coordinator_peers: env_opt("THRESHOLD_COORDINATOR_PEERS")
                .map(|v| parse_json_list::<CoordinatorPeer>("THRESHOLD_COORDINATOR_PEERS", &v))
                .unwrap_or_default()
                .into_iter()
                .map(|mut p| {
                    p.relayer_url = validate_url("THRESHOLD_COORDINATOR_PEERS", &p.relayer_url);
                    p
                })
                .collect(),
            cosigners: env_opt("THRESHOLD_ED25519_RELAYER_COSIGNERS")
                .map(|v| {
                    parse_json_list::<CosignerPeer>("THRESHOLD_ED25519_RELAYER_COSIGNERS", &v)
                })
                .unwrap_or_default()
                .into_iter()
                .map(|mut p| {
                    p.relayer_url =
                        validate_url("THRESHOLD_ED25519_RELAYER_COSIGNERS", &p.relayer_url);
                    p
                })
                .collect(),
            cosigner_threshold: env_opt("THRESHOLD_ED25519_RELAYER_COSIGNER_T").map(|v| {
                v.parse()
                    .expect("THRESHOLD_ED25519_RELAYER_COSIGNER_T must be an integer >= 1")
            }),
            coordinator_shared_secret: env_opt("THRESHOLD_COORDINATOR_SHARED_SECRET_B64U")
                .map(|v| parse_secret_32("THRESHOLD_COORDINATOR_SHARED_SECRET_B64U", &v)),
            cosigner_timeout_ms: env("COSIGNER_TIMEOUT_MS", "10000")
                .parse()
                .expect("COSIGNER_TIMEOUT_MS must be a number"),

            key_prefix: env("SESSION_KEY_PREFIX", "threshold:"),
            redis_url: env_opt("REDIS_URL"),
            upstash_redis_rest_url: env_opt("UPSTASH_REDIS_REST_URL"),
            upstash_redis_rest_token: env_opt("UPSTASH_REDIS_REST_TOKEN"),

            near_rpc_url: env("NEAR_RPC_URL", "https://rpc.testnet.near.org"),
            webauthn_verify_url: env_opt("WEBAUTHN_VERIFY_URL"),
            webauthn_contract_id: env_opt("WEBAUTHN_CONTRACT_ID"),

            cors_origins: env("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid address")
    }

    pub fn is_coordinator(&self) -> bool {
        self.node_role == NodeRole::Coordinator
    }
}

fn parse_node_role(value: &str) -> NodeRole {
    match value.trim() {
        "" | "coordinator" => NodeRole::Coordinator,
        "participant" => NodeRole::Participant,
        other => panic!("THRESHOLD_NODE_ROLE must be coordinator|participant, got {other}"),
    }
}

fn parse_secret_32(key: &str, value: &str) -> [u8; 32] {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim().as_bytes())
        .unwrap_or_else(|e| panic!("{key} is not valid base64url: {e}"));
    bytes
        .as_slice()
        .try_into()
        .unwrap_or_else(|_| panic!("{key} must decode to exactly 32 bytes, got {}", bytes.len()))
}

fn parse_json_list<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Vec<T> {
    serde_json::from_str(value).unwrap_or_else(|e| panic!("{key} is not a valid JSON array: {e}"))
}

fn validate_url(key: &str, value: &str) -> String {
    url::Url::parse(value).unwrap_or_else(|e| panic!("{key} contains an invalid URL {value}: {e}"));
    value.to_string()
}

fn env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}
