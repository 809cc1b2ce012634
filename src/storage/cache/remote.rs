//! Redis cache backend.
//!
//! Entries are stored as JSON under `<key_prefix><fingerprint>` with a native
//! TTL matching `expires_at`. Every Redis failure is logged and counted in
//! [`CacheStats::errors`]; callers only ever observe a miss.

use std::time::Duration;

use chrono::Utc;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};

use super::{CacheCounters, CacheStats, CachedResponse};
use crate::error::{PersonaError, Result};

/// Upper bound on establishing a connection before giving up on an operation.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 100;

pub struct RemoteCache {
    client: Client,
    key_prefix: String,
    counters: CacheCounters,
}

impl std::fmt::Debug for RemoteCache {
    // The connection URL may embed a password.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RemoteCache {
    /// Parse the URL. No connection is made until the first operation.
    ///
    /// # Errors
    ///
    /// Returns [`PersonaError::Cache`] if the URL is not a valid Redis URL.
    pub fn new(connection_url: &str, key_prefix: &str) -> Result<Self> {
        // The error text can echo the URL, so only the kind is kept.
        let client = Client::open(connection_url).map_err(|e| {
            PersonaError::Cache(format!("invalid remote cache URL ({:?})", e.kind()))
        })?;
        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
            counters: CacheCounters::default(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    fn record_error(&self, operation: &str, error: &dyn std::fmt::Display) {
        self.counters.error();
        tracing::warn!(operation, error = %error, "Remote cache operation failed");
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        match tokio::time::timeout(
            CONNECT_TIMEOUT,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => Some(conn),
            Ok(Err(e)) => {
                self.record_error("connect", &e);
                None
            }
            Err(_) => {
                self.record_error("connect", &"timed out");
                None
            }
        }
    }

    /// Whole seconds until `value` expires, at least one.
    fn remaining_ttl(value: &CachedResponse) -> u64 {
        let secs = (value.expires_at - Utc::now()).num_seconds();
        u64::try_from(secs).unwrap_or(0).max(1)
    }

    async fn store(&self, conn: &mut MultiplexedConnection, key: &str, value: &CachedResponse) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.record_error("serialize", &e);
                return;
            }
        };
        let result: redis::RedisResult<()> = conn
            .set_ex(self.full_key(key), payload, Self::remaining_ttl(value))
            .await;
        if let Err(e) = result {
            self.record_error("set", &e);
        }
    }

    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let Some(mut conn) = self.connection().await else {
            self.counters.miss();
            return None;
        };
        let raw = match conn.get::<_, Option<String>>(self.full_key(key)).await {
            Ok(raw) => raw,
            Err(e) => {
                self.record_error("get", &e);
                self.counters.miss();
                return None;
            }
        };
        let Some(raw) = raw else {
            self.counters.miss();
            return None;
        };
        let mut entry: CachedResponse = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                self.record_error("decode", &e);
                self.counters.miss();
                return None;
            }
        };
        // Native TTL normally removes the key first; this covers clock skew.
        if entry.is_expired_at(Utc::now()) {
            let _: redis::RedisResult<i64> = conn.del(self.full_key(key)).await;
            self.counters.expired_lookup();
            return None;
        }
        entry.hit_count += 1;
        self.counters.hit();
        self.store(&mut conn, key, &entry).await;
        Some(entry)
    }

    pub async fn set(&self, key: &str, value: CachedResponse) {
        if let Some(mut conn) = self.connection().await {
            self.store(&mut conn, key, &value).await;
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match conn.del::<_, i64>(self.full_key(key)).await {
            Ok(count) => count > 0,
            Err(e) => {
                self.record_error("del", &e);
                false
            }
        }
    }

    /// Keys under this cache's prefix, via cursor-based SCAN.
    async fn prefixed_keys(&self, conn: &mut MultiplexedConnection) -> Option<Vec<String>> {
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let reply: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await;
            match reply {
                Ok((next, batch)) => {
                    keys.extend(batch);
                    if next == 0 {
                        return Some(keys);
                    }
                    cursor = next;
                }
                Err(e) => {
                    self.record_error("scan", &e);
                    return None;
                }
            }
        }
    }

    /// Delete only this cache's keys; other tenants of the database are untouched.
    pub async fn clear(&self) {
        if let Some(mut conn) = self.connection().await
            && let Some(keys) = self.prefixed_keys(&mut conn).await
        {
            for chunk in keys.chunks(SCAN_BATCH) {
                if let Err(e) = conn.del::<_, i64>(chunk).await {
                    self.record_error("del", &e);
                }
            }
        }
        self.counters.reset();
    }

    pub async fn stats(&self) -> CacheStats {
        let size = match self.connection().await {
            Some(mut conn) => self
                .prefixed_keys(&mut conn)
                .await
                .map_or(0, |keys| keys.len()),
            None => 0,
        };
        self.counters.snapshot(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_descriptor;

    #[test]
    fn rejects_non_redis_url() {
        let err = RemoteCache::new("not a url", "persona:").expect_err("invalid");
        assert!(matches!(err, PersonaError::Cache(_)));
    }

    #[test]
    fn debug_hides_connection_url() {
        let cache = RemoteCache::new("redis://:hunter2@localhost:6379", "p:").expect("valid url");
        assert!(!format!("{cache:?}").contains("hunter2"));
    }

    #[test]
    fn remaining_ttl_is_at_least_one_second() {
        let mut value = CachedResponse::new(
            "k",
            sample_descriptor("Ada"),
            "openai",
            "m",
            chrono::Duration::hours(1),
        );
        assert!(RemoteCache::remaining_ttl(&value) > 3_500);
        value.expires_at = Utc::now() - chrono::Duration::seconds(5);
        assert_eq!(RemoteCache::remaining_ttl(&value), 1);
    }

    #[tokio::test]
    async fn unreachable_server_counts_errors_and_misses() {
        // Port 1 is never a Redis server.
        let cache = RemoteCache::new("redis://127.0.0.1:1", "p:").expect("valid url");
        assert!(cache.get("k").await.is_none());
        cache
            .set(
                "k",
                CachedResponse::new("k", sample_descriptor("Ada"), "openai", "m", chrono::Duration::hours(1)),
            )
            .await;
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert!(stats.errors >= 2);
        assert_eq!(stats.size, 0);
    }
}
