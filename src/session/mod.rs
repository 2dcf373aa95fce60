//! Server-side sessions
//!
//! A [`Session`] is created once per successful callback and stored as JSON
//! under `session:<session_id>` in a [`SessionCache`]. The cache is a narrow
//! get/set/delete capability with two backends: [`RedisCache`] for
//! deployments and [`MemoryCache`] for development and tests.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::oidc::Claims;

pub use self::memory::{MemoryCache, spawn_reaper};
pub use self::redis::RedisCache;

/// Session cache backend failure.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Redis connection or command failure
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Any other backend failure
    #[error("{0}")]
    Backend(String),
}

/// TTL-keyed byte cache backing server-side sessions.
///
/// Implementations must be `Send + Sync` because the cache is shared
/// across request tasks.
#[async_trait]
pub trait SessionCache: Send + Sync + 'static {
    /// Fetch the value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque id, also the cookie value
    pub session_id: String,
    /// `iss` claim
    pub issuer: String,
    /// `sub` claim
    pub subject: String,
    /// `email` claim
    pub email: String,
    /// Human readable name
    pub display_name: String,
    /// All claims as received
    pub claims: Claims,
    /// Expiry, Unix epoch seconds
    pub expires_at: i64,
}

impl Session {
    /// Cache key for a session id.
    #[must_use]
    pub fn cache_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        unix_now() >= self.expires_at
    }

    /// Seconds left before expiry, at least one.
    #[must_use]
    pub fn remaining_ttl(&self) -> Duration {
        let secs = (self.expires_at - unix_now()).max(1);
        Duration::from_secs(secs.unsigned_abs())
    }
}

/// Current time as Unix epoch seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Typed session access on top of a [`SessionCache`].
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn SessionCache>,
}

impl SessionStore {
    /// Wrap a cache backend.
    pub fn new(cache: Arc<dyn SessionCache>) -> Self {
        Self { cache }
    }

    /// Look up a session by id.
    ///
    /// Entries that fail to decode or have already expired are treated as
    /// absent, exactly like a cache miss.
    pub async fn load(&self, session_id: &str) -> Result<Option<Session>, CacheError> {
        let Some(bytes) = self.cache.get(&Session::cache_key(session_id)).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<Session>(&bytes) {
            Ok(session) if session.is_expired() => Ok(None),
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Discarding undecodable session entry");
                Ok(None)
            }
        }
    }

    /// Persist a session until its expiry.
    pub async fn save(&self, session: &Session) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(session).map_err(|e| CacheError::Backend(e.to_string()))?;
        self.cache
            .set(
                &Session::cache_key(&session.session_id),
                bytes,
                session.remaining_ttl(),
            )
            .await
    }

    /// Delete a session by id.
    pub async fn remove(&self, session_id: &str) -> Result<(), CacheError> {
        self.cache.delete(&Session::cache_key(session_id)).await
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}
