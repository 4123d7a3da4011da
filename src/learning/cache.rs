//! Pattern Cache - bounded per-user read-through cache over derived patterns
//!
//! Owned by the learning engine and passed around explicitly. Entries expire
//! after a TTL and are replaced whenever the analyzer writes new patterns.
//! Concurrent population for the same user is last-writer-wins.

use anyhow::Result;
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::CacheConfig;
use crate::types::LearningPattern;

struct CachedPatterns {
    patterns: Vec<LearningPattern>,
    stored_at: Instant,
}

pub struct PatternCache {
    entries: Mutex<LruCache<String, CachedPatterns>>,
    ttl: Duration,
}

impl PatternCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_secs))
    }

    /// Cached patterns for a user, dropping the entry if it has expired
    pub async fn get(&self, user_id: &str) -> Option<Vec<LearningPattern>> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(user_id) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => return Some(entry.patterns.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("Pattern cache entry for {} expired", user_id);
            entries.pop(user_id);
        }
        None
    }

    pub async fn insert(&self, user_id: &str, patterns: Vec<LearningPattern>) {
        self.entries.lock().await.put(
            user_id.to_string(),
            CachedPatterns {
                patterns,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.entries.lock().await.pop(user_id);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Read-through lookup. The lock is not held while `compute` runs.
    pub async fn get_or_compute<F, Fut>(&self, user_id: &str, compute: F) -> Result<Vec<LearningPattern>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<LearningPattern>>>,
    {
        if let Some(patterns) = self.get(user_id).await {
            return Ok(patterns);
        }
        let patterns = compute().await?;
        self.insert(user_id, patterns.clone()).await;
        Ok(patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, PatternType};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample(user: &str) -> Vec<LearningPattern> {
        vec![LearningPattern::new(user, PatternType::Temporal, 0.8, 0.5, 4, Utc::now(), Payload::new())]
    }

    #[test]
    fn test_insert_and_get_blocking() {
        let cache = PatternCache::new(4, Duration::from_secs(60));
        tokio_test::block_on(cache.insert("u1", sample("u1")));
        let cached = tokio_test::block_on(cache.get("u1")).unwrap();
        assert_eq!(cached.len(), 1);
        assert!(tokio_test::block_on(cache.get("u2")).is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let cache = PatternCache::new(2, Duration::from_secs(60));
        cache.insert("a", sample("a")).await;
        cache.insert("b", sample("b")).await;
        cache.get("a").await;
        cache.insert("c", sample("c")).await;
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("a").await.is_some());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let cache = PatternCache::new(4, Duration::ZERO);
        cache.insert("u1", sample("u1")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("u1").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_or_compute_only_computes_on_miss() {
        let cache = PatternCache::new(4, Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let patterns = cache
                .get_or_compute("u1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(sample("u1"))
                })
                .await
                .unwrap();
            assert_eq!(patterns.len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate("u1").await;
        cache
            .get_or_compute("u1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_compute_failure_leaves_cache_empty() {
        let cache = PatternCache::new(4, Duration::from_secs(60));
        let result = cache
            .get_or_compute("u1", || async { Err(anyhow::anyhow!("store offline")) })
            .await;
        assert!(result.is_err());
        assert!(cache.get("u1").await.is_none());
    }
}
