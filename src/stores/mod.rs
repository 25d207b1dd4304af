//! TTL-bounded key/value stores behind the session and key-material
//! lifecycles. Three interchangeable backends: in-memory (tests, Redis-less
//! deploys), Redis over TCP, and Redis over REST (serverless).
//!
//! The store contract is the service's only synchronization primitive:
//! `take_*` is an atomic get-and-delete observed by at most one caller per
//! id, and `consume_use` hands out at most `remaining_uses` successes across
//! all concurrent callers.

pub mod memory;
pub mod redis;
pub mod rest;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::AppResult;
use crate::models::{
    AuthSession, CoordinatorSigningSession, MpcSession, SigningSession, StoredKeyMaterial,
};

/// Persistent key material for the stored share mode. No TTL.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Idempotent upsert.
    async fn put(&self, relayer_key_id: &str, material: &StoredKeyMaterial) -> AppResult<()>;
    async fn get(&self, relayer_key_id: &str) -> AppResult<Option<StoredKeyMaterial>>;
}

/// Single-use MPC authorizations and two-round signing sessions.
#[async_trait]
pub trait MpcSessionStore: Send + Sync {
    async fn put_mpc(&self, id: &str, record: &MpcSession, ttl: Duration) -> AppResult<()>;
    async fn take_mpc(&self, id: &str) -> AppResult<Option<MpcSession>>;

    async fn put_signing(&self, id: &str, record: &SigningSession, ttl: Duration) -> AppResult<()>;
    async fn take_signing(&self, id: &str) -> AppResult<Option<SigningSession>>;

    async fn put_coordinator_signing(
        &self,
        id: &str,
        record: &CoordinatorSigningSession,
        ttl: Duration,
    ) -> AppResult<()>;
    async fn take_coordinator_signing(
        &self,
        id: &str,
    ) -> AppResult<Option<CoordinatorSigningSession>>;
}

/// Multi-use auth sessions with an atomic remaining-use budget.
#[async_trait]
pub trait AuthSessionStore: Send + Sync {
    async fn put_session(
        &self,
        id: &str,
        record: &AuthSession,
        ttl: Duration,
        remaining_uses: u32,
    ) -> AppResult<()>;
    async fn get_session(&self, id: &str) -> AppResult<Option<AuthSession>>;
    /// Read-only view of the remaining budget.
    async fn remaining_uses(&self, id: &str) -> AppResult<Option<u32>>;
    /// Atomically spend one use. Returns the record and the uses left after
    /// this call, or `None` when the budget is exhausted or the session is
    /// gone.
    async fn consume_use(&self, id: &str) -> AppResult<Option<(AuthSession, u32)>>;
}

/// The bundle of stores shared through `AppState`.
pub struct Stores {
    pub keys: Arc<dyn KeyStore>,
    pub mpc: Arc<dyn MpcSessionStore>,
    pub auth: Arc<dyn AuthSessionStore>,
    /// Present only for the in-memory backend, so the expiry sweeper can run.
    pub memory: Option<Arc<memory::MemoryStore>>,
}

/// Pick a backend: Upstash REST when configured (preferred for serverless),
/// then Redis over TCP, then process-local memory.
pub fn build_stores(
    config: &Config,
    http_client: &reqwest::Client,
    redis_pool: Option<crate::redis::RedisPool>,
) -> Stores {
    if let (Some(url), Some(token)) = (
        config.upstash_redis_rest_url.as_ref(),
        config.upstash_redis_rest_token.as_ref(),
    ) {
        tracing::info!("Using Redis REST session stores");
        let store = Arc::new(rest::RestStore::new(
            http_client.clone(),
            url.clone(),
            token.clone(),
            config.key_prefix.clone(),
        ));
        return Stores {
            keys: store.clone(),
            mpc: store.clone(),
            auth: store,
            memory: None,
        };
    }

    if let Some(pool) = redis_pool {
        tracing::info!("Using Redis session stores");
        let store = Arc::new(redis::RedisStore::new(pool, config.key_prefix.clone()));
        return Stores {
            keys: store.clone(),
            mpc: store.clone(),
            auth: store,
            memory: None,
        };
    }

    tracing::info!("Using in-memory session stores");
    let store = Arc::new(memory::MemoryStore::new());
    Stores {
        keys: store.clone(),
        mpc: store.clone(),
        auth: store.clone(),
        memory: Some(store),
    }
}

pub(crate) mod keys {
    //! Store key layout, shared by every backend.

    pub fn key_material(prefix: &str, relayer_key_id: &str) -> String {
        format!("{prefix}key:{relayer_key_id}")
    }

    pub fn mpc(prefix: &str, id: &str) -> String {
        format!("{prefix}mpc:{id}")
    }

    pub fn signing(prefix: &str, id: &str) -> String {
        format!("{prefix}signing:{id}")
    }

    pub fn coordinator_signing(prefix: &str, id: &str) -> String {
        format!("{prefix}coordsign:{id}")
    }

    pub fn auth_session(prefix: &str, id: &str) -> String {
        format!("{prefix}authsess:{id}")
    }

    pub fn auth_session_uses(prefix: &str, id: &str) -> String {
        format!("{prefix}authuses:{id}")
    }
}
