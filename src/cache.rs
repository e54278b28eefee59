//! Single-slot result cache
//!
//! Holds the most recent aggregated table with a bounded lifetime. The TTL
//! here is independent of the freshness gate: the gate decides whether the
//! upstream data is current, the TTL bounds how long a stale table may keep
//! serving as a degraded fallback.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::aggregate::StretchResult;

/// Default slot lifetime, matching the upstream feed's own retention
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// One complete aggregation cycle's output plus its metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Aggregated table, in stretch-definition order
    pub results: Vec<StretchResult>,
    /// Upstream modification timestamp the cycle was derived from
    pub last_modified: Option<DateTime<Utc>>,
    /// When the entry was stored
    pub stored_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CacheEntry {
    pub fn new(
        results: Vec<StretchResult>,
        last_modified: Option<DateTime<Utc>>,
        ttl: Duration,
    ) -> Self {
        Self {
            results,
            last_modified,
            stored_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Process-wide slot for the latest aggregated table
///
/// `put` replaces the slot wholesale; readers always see either the previous
/// complete entry or the new one, never a mix.
#[derive(Debug, Default)]
pub struct ResultCache {
    slot: RwLock<Option<CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached entry if one exists and its TTL has not elapsed
    ///
    /// The expired entry itself stays in the slot so the degraded path can
    /// still reach it via `get_even_expired`.
    pub async fn get(&self) -> Option<CacheEntry> {
        let slot = self.slot.read().await;
        slot.as_ref().filter(|e| !e.is_expired()).cloned()
    }

    /// Returns whatever the slot holds, even past its TTL
    ///
    /// Used for the degraded path when upstream says not-modified or the local
    /// backoff refused a fetch: stale data beats no data.
    pub async fn get_even_expired(&self) -> Option<CacheEntry> {
        self.slot.read().await.clone()
    }

    /// Replaces the slot with a new entry
    pub async fn put(&self, entry: CacheEntry) {
        *self.slot.write().await = Some(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> Vec<StretchResult> {
        vec![StretchResult {
            name: "s".to_string(),
            time_now: 4,
            time_normal: 4,
            delay: 0,
            time_now_seconds: 238,
            time_normal_seconds: 240,
            delay_seconds: -2,
        }]
    }

    #[tokio::test]
    async fn test_empty_cache_returns_none() {
        let cache = ResultCache::new();
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_put_then_get_returns_entry() {
        let cache = ResultCache::new();
        cache
            .put(CacheEntry::new(results(), None, DEFAULT_TTL))
            .await;

        let entry = cache.get().await.expect("entry should be live");
        assert_eq!(entry.results.len(), 1);
        assert_eq!(entry.results[0].time_now_seconds, 238);
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let cache = ResultCache::new();
        cache
            .put(CacheEntry::new(results(), None, Duration::ZERO))
            .await;

        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_still_available_for_degraded_path() {
        let cache = ResultCache::new();
        cache
            .put(CacheEntry::new(results(), None, Duration::ZERO))
            .await;

        let entry = cache.get_even_expired().await;
        assert!(entry.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_survives_a_regular_get() {
        let cache = ResultCache::new();
        cache
            .put(CacheEntry::new(results(), None, Duration::ZERO))
            .await;

        assert!(cache.get().await.is_none());
        // Still reachable for the degraded path afterwards
        assert!(cache.get_even_expired().await.is_some());
    }

    #[tokio::test]
    async fn test_put_overwrites_previous_entry() {
        let cache = ResultCache::new();
        cache
            .put(CacheEntry::new(results(), None, DEFAULT_TTL))
            .await;

        let mut newer = results();
        newer[0].time_now_seconds = 999;
        cache.put(CacheEntry::new(newer, None, DEFAULT_TTL)).await;

        let entry = cache.get().await.unwrap();
        assert_eq!(entry.results[0].time_now_seconds, 999);
    }
}
