//! Redis-over-REST backend (Upstash wire shape): one command per `POST`,
//! bearer-token auth, `{"result": ...}` replies.
//!
//! REST has no `GETDEL`, so `take_*` is a read followed by a delete. Between
//! the two, one concurrent caller can observe the same record; that single
//! race per session id is an accepted limitation of this backend. A Lua
//! script or lease would close it on servers that support one.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::{
    AuthSession, CoordinatorSigningSession, MpcSession, SigningSession, StoredKeyMaterial,
};
use crate::stores::{keys, AuthSessionStore, KeyStore, MpcSessionStore};

pub struct RestStore {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
    prefix: String,
}

#[derive(Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestStore {
    pub fn new(
        http_client: reqwest::Client,
        base_url: String,
        token: String,
        prefix: String,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            prefix,
        }
    }

    async fn command(&self, command: &[&str]) -> AppResult<Value> {
        let response = self
            .http_client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await
            .map_err(|e| AppError::internal(format!("Redis REST request failed: {e}")))?;

        let status = response.status();
        let reply: RestReply = response
            .json()
            .await
            .map_err(|e| AppError::internal(format!("Redis REST reply was not JSON: {e}")))?;

        if let Some(error) = reply.error {
            return Err(AppError::internal(format!("Redis REST error: {error}")));
        }
        if !status.is_success() {
            return Err(AppError::internal(format!(
                "Redis REST returned HTTP {status}"
            )));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }

    async fn set_json<T: Serialize>(
        &self,
        key: &str,
        record: &T,
        ttl: Option<Duration>,
    ) -> AppResult<()> {
        let value = serde_json::to_string(record)
            .map_err(|e| AppError::internal(format!("Failed to serialize store record: {e}")))?;
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1).to_string();
                self.command(&["SET", key, &value, "EX", &secs]).await?;
            }
            None => {
                self.command(&["SET", key, &value]).await?;
            }
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            Value::String(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AppError::internal(format!("Corrupt store record: {e}"))),
            other => Err(AppError::internal(format!(
                "Unexpected GET reply shape: {other}"
            ))),
        }
    }

    /// Read-then-delete. See the module docs for the accepted race.
    async fn take_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let Some(record) = self.get_json::<T>(key).await? else {
            return Ok(None);
        };
        self.command(&["DEL", key]).await?;
        Ok(Some(record))
    }

    fn integer_reply(value: Value, context: &str) -> AppResult<i64> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| AppError::internal(format!("Non-integer {context} reply: {n}"))),
            other => Err(AppError::internal(format!(
                "Non-integer {context} reply: {other}"
            ))),
        }
    }
}

#[async_trait]
impl KeyStore for RestStore {
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
impl MpcSessionStore for RestStore {
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
impl AuthSessionStore for RestStore {
    async fn put_session(
        &self,
        id: &str,
        record: &AuthSession,
        ttl: Duration,
        remaining_uses: u32,
    ) -> AppResult<()> {
        self.set_json(&keys::auth_session(&self.prefix, id), record, Some(ttl))
            .await?;
        let secs = ttl.as_secs().max(1).to_string();
        let uses = remaining_uses.to_string();
        self.command(&[
            "SET",
            &keys::auth_session_uses(&self.prefix, id),
            &uses,
            "EX",
            &secs,
        ])
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> AppResult<Option<AuthSession>> {
        self.get_json(&keys::auth_session(&self.prefix, id)).await
    }

    async fn remaining_uses(&self, id: &str) -> AppResult<Option<u32>> {
        match self
            .command(&["GET", &keys::auth_session_uses(&self.prefix, id)])
            .await?
        {
            Value::Null => Ok(None),
            Value::String(raw) => {
                let n: i64 = raw.parse().map_err(|_| {
                    AppError::internal(format!("Non-integer use counter: {raw}"))
                })?;
                Ok(Some(n.max(0) as u32))
            }
            other => Err(AppError::internal(format!(
                "Unexpected GET reply shape: {other}"
            ))),
        }
    }

    async fn consume_use(&self, id: &str) -> AppResult<Option<(AuthSession, u32)>> {
        let Some(session) = self.get_session(id).await? else {
            return Ok(None);
        };

        let uses_key = keys::auth_session_uses(&self.prefix, id);
        let reply = self.command(&["INCRBY", &uses_key, "-1"]).await?;
        let remaining = Self::integer_reply(reply, "INCRBY")?;

        if remaining < 0 {
            let reply = self.command(&["INCRBY", &uses_key, "1"]).await?;
            Self::integer_reply(reply, "INCRBY")?;
            return Ok(None);
        }

        Ok(Some((session, remaining as u32)))
    }
}
