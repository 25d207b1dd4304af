//! Redis-over-TCP backend. `SET ... EX` bounds every session by its TTL,
//! `GETDEL` gives take-exactly-once, and the auth-session budget is an
//! `INCRBY key -1` counter compared after the decrement.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{
    AuthSession, CoordinatorSigningSession, MpcSession, SigningSession, StoredKeyMaterial,
};
use crate::stores::{keys, AuthSessionStore, KeyStore, MpcSessionStore};

pub struct RedisStore {
    pool: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub fn new(pool: ConnectionManager, prefix: String) -> Self {
        Self { pool, prefix }
    }

    async fn set_json<T: Serialize>(
        &self,
        key: &str,
        record: &T,
        ttl: Option<Duration>,
    ) -> AppResult<()> {
        let value = serde_json::to_string(record)
            .map_err(|e| AppError::internal(format!("Failed to serialize store record: {e}")))?;
        let mut conn = self.pool.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(&value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut conn = self.pool.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        parse_opt(value)
    }

    async fn take_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut conn = self.pool.clone();
        let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        parse_opt(value)
    }
}

fn parse_opt<T: DeserializeOwned>(value: Option<String>) -> AppResult<Option<T>> {
    match value {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| AppError::internal(format!("Corrupt store record: {e}"))),
    }
}

#[async_trait]
impl KeyStore for RedisStore {
    async fn put(&self, relayer_key_id: &str, material: &StoredKeyMaterial) -> AppResult<()> {
        self.set_json(&keys::key_material(&self.prefix, relayer_key_id), material, None)
            .await
    }

    async fn get(&self, relayer_key_id: &str) -> AppResult<Option<StoredKeyMaterial>> {
        self.get_json(&keys::key_material(&self.prefix, relayer_key_id))
            .await
    }
}

#[async_trait]
impl MpcSessionStore for RedisStore {
    async fn put_mpc(&self, id: &str, record: &MpcSession, ttl: Duration) -> AppResult<()> {
        self.set_json(&keys::mpc(&self.prefix, id), record, Some(ttl))
            .await
    }

    async fn take_mpc(&self, id: &str) -> AppResult<Option<MpcSession>> {
        self.take_json(&keys::mpc(&self.prefix, id)).await
    }

    async fn put_signing(&self, id: &str, record: &SigningSession, ttl: Duration) -> AppResult<()> {
        self.set_json(&keys::signing(&self.prefix, id), record, Some(ttl))
            .await
    }

    async fn take_signing(&self, id: &str) -> AppResult<Option<SigningSession>> {
        self.take_json(&keys::signing(&self.prefix, id)).await
    }

    async fn put_coordinator_signing(
        &self,
        id: &str,
        record: &CoordinatorSigningSession,
        ttl: Duration,
    ) -> AppResult<()> {
        self.set_json(&keys::coordinator_signing(&self.prefix, id), record, Some(ttl))
            .await
    }

    async fn take_coordinator_signing(
        &self,
        id: &str,
    ) -> AppResult<Option<CoordinatorSigningSession>> {
        self.take_json(&keys::coordinator_signing(&self.prefix, id))
            .await
    }
}

#[async_trait]
impl AuthSessionStore for RedisStore {
    async fn put_session(
        &self,
        id: &str,
        record: &AuthSession,
        ttl: Duration,
        remaining_uses: u32,
    ) -> AppResult<()> {
        self.set_json(&keys::auth_session(&self.prefix, id), record, Some(ttl))
            .await?;

        let mut conn = self.pool.clone();
        redis::cmd("SET")
            .arg(keys::auth_session_uses(&self.prefix, id))
            .arg(remaining_uses as i64)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> AppResult<Option<AuthSession>> {
        self.get_json(&keys::auth_session(&self.prefix, id)).await
    }

    async fn remaining_uses(&self, id: &str) -> AppResult<Option<u32>> {
        let mut conn = self.pool.clone();
        let value: Option<i64> = redis::cmd("GET")
            .arg(keys::auth_session_uses(&self.prefix, id))
            .query_async(&mut conn)
            .await?;
        Ok(value.map(|n| n.max(0) as u32))
    }

    async fn consume_use(&self, id: &str) -> AppResult<Option<(AuthSession, u32)>> {
        let Some(session) = self.get_session(id).await? else {
            return Ok(None);
        };

        let uses_key = keys::auth_session_uses(&self.prefix, id);
        let mut conn = self.pool.clone();

        // A non-integer reply here means the counter key was clobbered;
        // surface it instead of silently allowing the consume.
        let remaining: redis::Value = redis::cmd("INCRBY")
            .arg(&uses_key)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        let remaining = match remaining {
            redis::Value::Int(n) => n,
            other => {
                return Err(AppError::internal(format!(
                    "Non-integer INCRBY reply for {uses_key}: {other:?}"
                )))
            }
        };

        if remaining < 0 {
            // Overdrawn: give the use back so the counter stays at zero.
            let _: i64 = redis::cmd("INCRBY")
                .arg(&uses_key)
                .arg(1)
                .query_async(&mut conn)
                .await?;
            return Ok(None);
        }

        Ok(Some((session, remaining as u32)))
    }
}
