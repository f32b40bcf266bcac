//! Cache storage contract and implementations.
//!
//! One backend-agnostic contract covers entity snapshots, counter deltas,
//! the dirty-id set, and rate-limit windows. `MemoryCache` is the shared
//! in-process backend; `NoOpCache` disables caching without changing any
//! caller code path.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use super::keys;

/// A panic while holding the dirty lock must not wedge reconciliation; a
/// recovered set is at worst missing marks whose counter keys still exist.
fn lock_dirty<'a>(
    dirty: &'a Mutex<HashSet<i64>>,
    op: &'static str,
) -> MutexGuard<'a, HashSet<i64>> {
    match dirty.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(op, "recovered poisoned dirty-set lock");
            poisoned.into_inner()
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("failed to serialize cache value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed cache payload for key `{key}`: {detail}")]
    Payload { key: String, detail: String },
    #[error("cache operation timed out")]
    Timeout,
}

impl CacheError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn payload(key: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::Payload {
            key: key.into(),
            detail: detail.to_string(),
        }
    }
}

/// Key-value cache contract shared by counters, snapshots, and rate limiting.
///
/// Absence of a key is a normal state, never an error: `get` yields `None`,
/// integer reads yield 0. Every mutation of a counter value goes through
/// [`increment`](Cache::increment); no caller performs read-modify-write on
/// its own.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch raw bytes. `Ok(None)` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store raw bytes; `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove a key. Removing an absent key is success.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Atomically add `delta` to an integer key and return the new value.
    ///
    /// When `key` has counter shape (`note:<id>:views|likes`) the owning
    /// note id is marked dirty as a detached best-effort side effect.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Read an integer key without clearing it; 0 when absent.
    async fn get_integer(&self, key: &str) -> Result<i64, CacheError>;

    /// Atomically read an integer key and remove it; 0 when absent.
    async fn get_and_clear(&self, key: &str) -> Result<i64, CacheError>;

    /// Set the TTL of an existing key; a no-op when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Atomically take and empty the dirty note-id set.
    async fn pop_dirty_ids(&self) -> Result<HashSet<i64>, CacheError>;
}

/// JSON convenience layer over the raw byte contract.
#[async_trait]
pub trait CacheExt: Cache {
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(err) => Err(CacheError::payload(key, err)),
            },
            None => Ok(None),
        }
    }

    async fn set_json<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value).map_err(CacheError::Encode)?;
        self.set(key, &bytes, ttl).await
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn integer(value: i64) -> Self {
        Self {
            value: value.to_string().into_bytes(),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn parse_integer(key: &str, value: &[u8]) -> Result<i64, CacheError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| CacheError::payload(key, "expected an integer value"))
}

/// Shared in-process cache backend.
///
/// Entries expire lazily: an expired entry reads as a miss and is dropped on
/// the next touch. Integer keys are stored as decimal text so they share the
/// byte-valued entry shape with JSON snapshots.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    dirty: Arc<Mutex<HashSet<i64>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            dirty: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Best-effort, non-blocking dirty marking.
    ///
    /// Detached on purpose: a marking lost to a racing pop only delays
    /// reconciliation by one cycle, because the counter key itself stays in
    /// the cache until a sync cycle clears it.
    fn mark_dirty(&self, note_id: i64) {
        let dirty = Arc::clone(&self.dirty);
        tokio::spawn(async move {
            lock_dirty(&dirty, "mark_dirty").insert(note_id);
        });
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let now = Instant::now();
        let next = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::integer(0));
            if entry.is_expired(now) {
                *entry = Entry::integer(0);
            }
            let current = parse_integer(key, &entry.value)?;
            let next = current + delta;
            entry.value = next.to_string().into_bytes();
            next
        };

        if let Some((note_id, _)) = keys::parse_counter_key(key) {
            self.mark_dirty(note_id);
        }

        Ok(next)
    }

    async fn get_integer(&self, key: &str) -> Result<i64, CacheError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => parse_integer(key, &entry.value),
            _ => Ok(0),
        }
    }

    async fn get_and_clear(&self, key: &str) -> Result<i64, CacheError> {
        let now = Instant::now();
        match self.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired(now) => parse_integer(key, &entry.value),
            _ => Ok(0),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn pop_dirty_ids(&self) -> Result<HashSet<i64>, CacheError> {
        Ok(std::mem::take(&mut *lock_dirty(
            &self.dirty,
            "pop_dirty_ids",
        )))
    }
}

/// Cache variant for deployments without a cache backend.
///
/// All operations succeed trivially and persist nothing, so counters,
/// cache-aside reads, and rate limiting degrade to pass-through while the
/// durable store stays authoritative.
pub struct NoOpCache;

#[async_trait]
impl Cache for NoOpCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(None)
    }

    async fn set(
        &self,
        _key: &str,
        _value: &[u8],
        _ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn increment(&self, _key: &str, _delta: i64) -> Result<i64, CacheError> {
        Ok(0)
    }

    async fn get_integer(&self, _key: &str) -> Result<i64, CacheError> {
        Ok(0)
    }

    async fn get_and_clear(&self, _key: &str) -> Result<i64, CacheError> {
        Ok(0)
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn pop_dirty_ids(&self) -> Result<HashSet<i64>, CacheError> {
        Ok(HashSet::new())
    }
}
