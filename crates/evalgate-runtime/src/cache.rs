//! Result caching for evalgate-runtime.
//!
//! Completed evaluation records are cached under their cache key so repeat
//! inputs skip every judge. The service only talks to [`ResultCache`]; the
//! in-memory [`MokaResultCache`] is the default.

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::CacheConfig;
use crate::service::EvaluationRecord;

/// Errors from a cache backend. The service logs them and carries on.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cached record could not be decoded: {0}")]
    Corrupt(String),
}

/// Key/value store for finished evaluation records.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<EvaluationRecord>, CacheError>;

    async fn set(&self, key: &str, record: &EvaluationRecord, ttl: Duration)
        -> Result<(), CacheError>;
}

#[derive(Clone)]
struct CachedEntry {
    record: Arc<EvaluationRecord>,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with.
struct PerEntryTtl;

impl Expiry<String, CachedEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory result cache using moka.
pub struct MokaResultCache {
    cache: Cache<String, CachedEntry>,
}

impl MokaResultCache {
    /// Create a cache holding at most `max_entries` records.
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Clear the cache.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flush pending maintenance so counts and expiry are current.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for MokaResultCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[async_trait]
impl ResultCache for MokaResultCache {
    async fn get(&self, key: &str) -> Result<Option<EvaluationRecord>, CacheError> {
        Ok(self
            .cache
            .get(key)
            .await
            .map(|entry| entry.record.as_ref().clone()))
    }

    async fn set(
        &self,
        key: &str,
        record: &EvaluationRecord,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CachedEntry {
            record: Arc::new(record.clone()),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::sample_record;

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = MokaResultCache::new(100);
        let record = sample_record("schema_v1|eval_v3|policy_1|judge_gpt-4o-mini:abc");
        let key = record.identity.cache_key.clone();

        assert!(cache.get(&key).await.unwrap().is_none());

        cache
            .set(&key, &record, Duration::from_secs(60))
            .await
            .unwrap();

        let cached = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(cached, record);

        cache.sync().await;
        assert_eq!(cache.entry_count(), 1);

        cache.invalidate_all();
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_after_their_own_ttl() {
        let cache = MokaResultCache::new(100);
        let short = sample_record("k-short");
        let long = sample_record("k-long");

        cache
            .set("k-short", &short, Duration::from_millis(50))
            .await
            .unwrap();
        cache
            .set("k-long", &long, Duration::from_secs(600))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        cache.sync().await;

        assert!(cache.get("k-short").await.unwrap().is_none());
        assert!(cache.get("k-long").await.unwrap().is_some());
    }
}
