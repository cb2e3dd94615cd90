use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use moka::{sync::Cache, Expiry};
use thiserror::Error;

/// Common result alias for TTL store operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed cache entry `{key}`: {reason}")]
    Malformed { key: String, reason: String },
}

/// Key/value store with per-key expiration, used for ingestion dedup and
/// short-lived staging. Implementations must make `set_if_absent` atomic.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Stores `value` under `key` unless the key is already present. Returns
    /// `true` when this call created the entry.
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Lists live keys starting with `prefix`. Order is unspecified.
    async fn scan_keys(&self, prefix: &str) -> CacheResult<Vec<String>>;
}

#[derive(Debug, Clone)]
struct TtlEntry {
    value: Arc<[u8]>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, TtlEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TtlEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local TTL store backed by a bounded moka cache.
pub struct InMemoryTtlStore {
    entries: Cache<String, TtlEntry>,
}

impl InMemoryTtlStore {
    pub const DEFAULT_CAPACITY: u64 = 200_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for InMemoryTtlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtlStore for InMemoryTtlStore {
    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<bool> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| TtlEntry {
                value: value.into(),
                ttl,
            });
        Ok(entry.is_fresh())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.contains_key(key))
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value.to_vec()))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.invalidate(key);
        Ok(())
    }

    async fn scan_keys(&self, prefix: &str) -> CacheResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.to_string())
            .collect())
    }
}
