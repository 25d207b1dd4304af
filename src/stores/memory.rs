//! Process-local store used in tests and when no Redis backend is
//! configured. A mutex-protected map gives `take_*` and `consume_use` their
//! exactly-once semantics.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{
    AuthSession, CoordinatorSigningSession, MpcSession, SigningSession, StoredKeyMaterial,
};
use crate::stores::{keys, AuthSessionStore, KeyStore, MpcSessionStore};

struct Entry {
    value: String,
    /// `None` means no TTL (key material).
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    uses: HashMap<String, (i64, Instant)>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means another holder panicked; the map itself is
        // still structurally sound for session bookkeeping.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn put_json<T: Serialize>(&self, key: String, record: &T, ttl: Option<Duration>) -> AppResult<()> {
        let value = serde_json::to_string(record)
            .map_err(|e| AppError::internal(format!("Failed to serialize store record: {e}")))?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock().entries.insert(key, Entry { value, expires_at });
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let now = Instant::now();
        let guard = self.lock();
        let Some(entry) = guard.entries.get(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            return Ok(None);
        }
        let parsed = serde_json::from_str(&entry.value)
            .map_err(|e| AppError::internal(format!("Corrupt store record: {e}")))?;
        Ok(Some(parsed))
    }

    fn take_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let now = Instant::now();
        let mut guard = self.lock();
        let Some(entry) = guard.entries.remove(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            return Ok(None);
        }
        let parsed = serde_json::from_str(&entry.value)
            .map_err(|e| AppError::internal(format!("Corrupt store record: {e}")))?;
        Ok(Some(parsed))
    }

    /// Drop expired sessions and use counters. Returns how many were purged.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.lock();
        let before = guard.entries.len() + guard.uses.len();
        guard.entries.retain(|_, entry| !entry.is_expired(now));
        guard.uses.retain(|_, (_, at)| *at > now);
        before - (guard.entries.len() + guard.uses.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn put(&self, relayer_key_id: &str, material: &StoredKeyMaterial) -> AppResult<()> {
        self.put_json(keys::key_material("", relayer_key_id), material, None)
    }

    async fn get(&self, relayer_key_id: &str) -> AppResult<Option<StoredKeyMaterial>> {
        self.get_json(&keys::key_material("", relayer_key_id))
    }
}

#[async_trait]
impl MpcSessionStore for MemoryStore {
    async fn put_mpc(&self, id: &str, record: &MpcSession, ttl: Duration) -> AppResult<()> {
        self.put_json(keys::mpc("", id), record, Some(ttl))
    }

    async fn take_mpc(&self, id: &str) -> AppResult<Option<MpcSession>> {
        self.take_json(&keys::mpc("", id))
    }

    async fn put_signing(&self, id: &str, record: &SigningSession, ttl: Duration) -> AppResult<()> {
        self.put_json(keys::signing("", id), record, Some(ttl))
    }

    async fn take_signing(&self, id: &str) -> AppResult<Option<SigningSession>> {
        self.take_json(&keys::signing("", id))
    }

    async fn put_coordinator_signing(
        &self,
        id: &str,
        record: &CoordinatorSigningSession,
        ttl: Duration,
    ) -> AppResult<()> {
        self.put_json(keys::coordinator_signing("", id), record, Some(ttl))
    }

    async fn take_coordinator_signing(
        &self,
        id: &str,
    ) -> AppResult<Option<CoordinatorSigningSession>> {
        self.take_json(&keys::coordinator_signing("", id))
    }
}

#[async_trait]
impl AuthSessionStore for MemoryStore {
    async fn put_session(
        &self,
        id: &str,
        record: &AuthSession,
        ttl: Duration,
        remaining_uses: u32,
    ) -> AppResult<()> {
        self.put_json(keys::auth_session("", id), record, Some(ttl))?;
        let expires_at = Instant::now() + ttl;
        self.lock()
            .uses
            .insert(keys::auth_session_uses("", id), (remaining_uses as i64, expires_at));
        Ok(())
    }

    async fn get_session(&self, id: &str) -> AppResult<Option<AuthSession>> {
        self.get_json(&keys::auth_session("", id))
    }

    async fn remaining_uses(&self, id: &str) -> AppResult<Option<u32>> {
        let now = Instant::now();
        let guard = self.lock();
        Ok(guard
            .uses
            .get(&keys::auth_session_uses("", id))
            .filter(|(_, at)| *at > now)
            .map(|(remaining, _)| (*remaining).max(0) as u32))
    }

    async fn consume_use(&self, id: &str) -> AppResult<Option<(AuthSession, u32)>> {
        let now = Instant::now();
        let session_key = keys::auth_session("", id);
        let uses_key = keys::auth_session_uses("", id);

        let mut guard = self.lock();

        let Some(entry) = guard.entries.get(&session_key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            return Ok(None);
        }
        let session: AuthSession = serde_json::from_str(&entry.value)
            .map_err(|e| AppError::internal(format!("Corrupt auth session: {e}")))?;

        let Some((remaining, expires_at)) = guard.uses.get_mut(&uses_key) else {
            return Ok(None);
        };
        if *expires_at <= now || *remaining <= 0 {
            return Ok(None);
        }
        *remaining -= 1;
        let left = *remaining as u32;

        Ok(Some((session, left)))
    }
}
