//! Response cache.
//!
//! Maps a query fingerprint to a validated descriptor. Three interchangeable
//! backends share one contract (`get`, `set`, `delete`, `clear`, `stats`,
//! `purge_expired`):
//!
//! - `memory`: bounded in-process map, evicts the oldest-created entry.
//! - `file`: one JSON file per entry, atomic writes, write errors dropped.
//! - `remote`: Redis with native key TTL, errors counted in stats.
//!
//! None of the backends surface I/O errors to callers. Consistency across
//! backends is best-effort and bounded by the entry TTL.

pub mod file;
pub mod memory;
pub mod remote;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::descriptor::PersonalityDescriptor;
use crate::error::Result;
use crate::storage::config::{CacheBackendKind, CacheSettings};
use crate::util::normalize_query;

pub use file::FileCache;
pub use memory::MemoryCache;
pub use remote::RemoteCache;

/// Fingerprint component used when no provider was requested.
const ANY_PROVIDER: &str = "auto";
/// Fingerprint component used when no model was requested.
const ANY_MODEL: &str = "default";

/// Deterministic cache key for a query.
#[must_use]
pub fn fingerprint(description: &str, provider: Option<&str>, model: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(description).as_bytes());
    hasher.update(b"|");
    hasher.update(provider.unwrap_or(ANY_PROVIDER).to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(model.unwrap_or(ANY_MODEL).to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// One cached research result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub fingerprint: String,
    pub descriptor: PersonalityDescriptor,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub provider: String,
    pub model: String,
}

impl CachedResponse {
    /// Fresh entry expiring `ttl` from now. Non-positive TTLs are raised to one second.
    #[must_use]
    pub fn new(
        fingerprint: impl Into<String>,
        descriptor: PersonalityDescriptor,
        provider: impl Into<String>,
        model: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let ttl = ttl.max(Duration::seconds(1));
        Self {
            fingerprint: fingerprint.into(),
            descriptor,
            created_at,
            expires_at: created_at + ttl,
            hit_count: 1,
            provider: provider.into(),
            model: model.into(),
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Point-in-time counters for one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub hit_rate: f64,
    /// Backend I/O errors swallowed so far.
    pub errors: u64,
}

/// Shared atomic counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    errors: AtomicU64,
}

impl CacheCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup that found an expired entry.
    pub fn expired_lookup(&self) {
        self.expiration();
        self.miss();
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.expirations,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self, size: usize) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Configured cache backend.
#[derive(Debug)]
pub enum ResponseCache {
    Memory(MemoryCache),
    File(FileCache),
    Remote(RemoteCache),
}

impl ResponseCache {
    /// Build the configured backend, or `None` when caching is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote URL cannot be parsed or the cache
    /// directory cannot be created.
    pub fn from_settings(settings: &CacheSettings) -> Result<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }
        let cache = match settings.backend {
            CacheBackendKind::Memory => Self::Memory(MemoryCache::new(settings.max_size)),
            CacheBackendKind::File => Self::File(FileCache::new(
                settings.resolved_cache_dir(),
                settings.max_size,
            )?),
            CacheBackendKind::Remote => {
                let url = settings.connection_url.as_deref().unwrap_or_default();
                Self::Remote(RemoteCache::new(url, &settings.key_prefix)?)
            }
        };
        tracing::debug!(backend = cache.kind().as_str(), "Response cache ready");
        Ok(Some(cache))
    }

    #[must_use]
    pub const fn kind(&self) -> CacheBackendKind {
        match self {
            Self::Memory(_) => CacheBackendKind::Memory,
            Self::File(_) => CacheBackendKind::File,
            Self::Remote(_) => CacheBackendKind::Remote,
        }
    }

    /// Look up a live entry; counts a hit, miss or expiration.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        match self {
            Self::Memory(c) => c.get(key),
            Self::File(c) => c.get(key).await,
            Self::Remote(c) => c.get(key).await,
        }
    }

    /// Insert or replace an entry, evicting the oldest-created one when full.
    pub async fn set(&self, key: &str, value: CachedResponse) {
        match self {
            Self::Memory(c) => c.set(key, value),
            Self::File(c) => c.set(key, value).await,
            Self::Remote(c) => c.set(key, value).await,
        }
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        match self {
            Self::Memory(c) => c.delete(key),
            Self::File(c) => c.delete(key).await,
            Self::Remote(c) => c.delete(key).await,
        }
    }

    /// Drop every entry and reset the counters.
    pub async fn clear(&self) {
        match self {
            Self::Memory(c) => c.clear(),
            Self::File(c) => c.clear().await,
            Self::Remote(c) => c.clear().await,
        }
    }

    pub async fn stats(&self) -> CacheStats {
        match self {
            Self::Memory(c) => c.stats(),
            Self::File(c) => c.stats().await,
            Self::Remote(c) => c.stats().await,
        }
    }

    /// Remove expired entries; returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        match self {
            Self::Memory(c) => c.purge_expired(),
            Self::File(c) => c.purge_expired().await,
            // Redis expires keys natively.
            Self::Remote(_) => 0,
        }
    }
}
