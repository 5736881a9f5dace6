//! Cache layer / 缓存层
//!
//! Key-value store with JSON (de)serialization, gzip compression for large
//! payloads and dynamic TTLs. The store is injected as a trait object so
//! tests can substitute their own; a cache failure is never allowed to fail
//! a search - reads degrade to [`CacheOutcome::Unavailable`], writes are
//! logged and dropped.

pub mod codec;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

pub use codec::cache_key;

/// Store-level failure; callers above [`SearchCache`] never see it
#[derive(Debug, thiserror::Error)]
#[error("cache store error: {0}")]
pub struct CacheError(pub String);

/// Explicit read outcome so "no cache available" is a visible branch
/// instead of a swallowed exception / 显式缓存读取结果
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome<T> {
    Hit(T),
    Miss,
    Unavailable,
}

/// Minimal key-value contract the search layer relies on / 键值存储契约
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process TTL store / 进程内 TTL 存储
///
/// Entry count is capped; expired entries are swept when the cap is hit.
/// Overwrites are idempotent - keys are pure functions of the filter set.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|(_, deadline)| Instant::now() < *deadline)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            let now = Instant::now();
            entries.retain(|_, (_, deadline)| now < *deadline);
            // Still full after the sweep: evict the soonest-to-expire entry
            if entries.len() >= self.max_entries {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, (_, deadline))| *deadline)
                    .map(|(k, _)| k.clone());
                if let Some(k) = victim {
                    entries.remove(&k);
                }
            }
        }
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Read/write-through wrapper around a [`CacheStore`] handling the JSON
/// codec, compression threshold and TTL policy / 搜索缓存封装
#[derive(Clone)]
pub struct SearchCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    compress_threshold: usize,
}

impl SearchCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl_secs: u64, compress_threshold: usize) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(ttl_secs),
            compress_threshold,
        }
    }

    /// Read-through. Decode failures count as misses; store failures
    /// surface as `Unavailable` and the caller falls through to a live
    /// backend call.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheOutcome<T> {
        match self.store.get(key).await {
            Ok(Some(payload)) => match codec::decode_value(&payload)
                .and_then(|json| {
                    serde_json::from_str::<T>(&json).map_err(|e| CacheError(e.to_string()))
                }) {
                Ok(value) => {
                    tracing::debug!(key, "cache hit");
                    CacheOutcome::Hit(value)
                }
                Err(e) => {
                    tracing::debug!(key, error = %e, "cache payload undecodable, treating as miss");
                    CacheOutcome::Miss
                }
            },
            Ok(None) => CacheOutcome::Miss,
            Err(e) => {
                tracing::debug!(key, error = %e, "cache read failed");
                CacheOutcome::Unavailable
            }
        }
    }

    /// Write-through; compressed payloads get a doubled TTL since large
    /// aggregation payloads are the expensive ones to recompute. Failures
    /// are logged and dropped.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::debug!(key, error = %e, "cache serialize failed");
                return;
            }
        };
        let (payload, compressed) = match codec::encode_value(&json, self.compress_threshold) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(key, error = %e, "cache encode failed");
                return;
            }
        };
        let ttl = if compressed { self.ttl * 2 } else { self.ttl };
        if let Err(e) = self.store.set(key, payload, ttl).await {
            tracing::debug!(key, error = %e, "cache write failed");
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.store.del(key).await {
            tracing::debug!(key, error = %e, "cache delete failed");
        }
    }
}
