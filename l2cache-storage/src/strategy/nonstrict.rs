//! Strategy for rarely updated data that tolerates brief staleness.
//!
//! No locks are taken. Every update path evicts the item instead of
//! writing the new state, so the next read goes to the database.

use std::fmt;
use std::sync::Arc;

use l2cache_core::{
    CacheKey, CacheResult, ConcurrencyStrategyKind, Timestamp, VersionComparator,
};
use serde_json::Value;

use super::{ConcurrencyStrategy, SoftLock};
use crate::region::TransactionalDataRegion;
use crate::stats::{CacheStats, StatsRecorder};

pub struct NonstrictReadWriteCache<R: TransactionalDataRegion + ?Sized> {
    region: Arc<R>,
    stats: StatsRecorder,
}

impl<R: TransactionalDataRegion + ?Sized> NonstrictReadWriteCache<R> {
    pub fn new(region: Arc<R>) -> Self {
        Self {
            region,
            stats: StatsRecorder::new(),
        }
    }

    pub fn region(&self) -> &Arc<R> {
        &self.region
    }

    fn invalidate(&self, key: &CacheKey) -> CacheResult<()> {
        tracing::debug!(region = %self.region.name(), key = %key, "Invalidating");
        self.region.evict(key)?;
        self.stats.record_eviction();
        Ok(())
    }
}

impl<R: TransactionalDataRegion + ?Sized> fmt::Debug for NonstrictReadWriteCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonstrictReadWriteCache")
            .field("region", &self.region.name())
            .finish()
    }
}

impl<R: TransactionalDataRegion + ?Sized> ConcurrencyStrategy for NonstrictReadWriteCache<R> {
    fn kind(&self) -> ConcurrencyStrategyKind {
        ConcurrencyStrategyKind::NonstrictReadWrite
    }

    fn region_name(&self) -> &str {
        self.region.name()
    }

    fn get(&self, key: &CacheKey, tx_timestamp: Timestamp) -> CacheResult<Option<Value>> {
        let cached = self.region.get(key)?;
        if cached.is_some() {
            self.stats.record_hit();
            tracing::debug!(key = %key, tx_timestamp, "Cache hit");
        } else {
            self.stats.record_miss();
            tracing::debug!(key = %key, tx_timestamp, "Cache miss");
        }
        Ok(cached)
    }

    fn put(
        &self,
        key: &CacheKey,
        value: Value,
        tx_timestamp: Timestamp,
        _version: Option<&Value>,
        _version_comparator: Option<&dyn VersionComparator>,
        minimal_put: bool,
    ) -> CacheResult<bool> {
        tracing::debug!(key = %key, tx_timestamp, "Caching");
        if minimal_put {
            if !self.region.put_if_absent(key.clone(), value)? {
                tracing::debug!(key = %key, "Item already cached");
                return Ok(false);
            }
        } else {
            self.region.put(key.clone(), value)?;
        }
        self.stats.record_put();
        Ok(true)
    }

    fn lock(&self, _key: &CacheKey, _version: Option<&Value>) -> CacheResult<Option<SoftLock>> {
        Ok(None)
    }

    fn release(&self, key: &CacheKey, _lock: Option<SoftLock>) -> CacheResult<()> {
        self.invalidate(key)
    }

    fn insert(
        &self,
        _key: &CacheKey,
        _value: Value,
        _current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        Ok(false)
    }

    fn after_insert(
        &self,
        _key: &CacheKey,
        _value: Value,
        _version: Option<&Value>,
    ) -> CacheResult<bool> {
        Ok(false)
    }

    fn update(
        &self,
        key: &CacheKey,
        _value: Value,
        _current_version: Option<&Value>,
        _previous_version: Option<&Value>,
    ) -> CacheResult<bool> {
        self.invalidate(key)?;
        Ok(false)
    }

    fn after_update(
        &self,
        key: &CacheKey,
        _value: Value,
        _version: Option<&Value>,
        _lock: Option<SoftLock>,
    ) -> CacheResult<bool> {
        self.invalidate(key)?;
        Ok(false)
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        self.invalidate(key)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.invalidate(key)
    }

    fn clear(&self) -> CacheResult<()> {
        self.region.evict_all()
    }

    fn destroy(&self) -> CacheResult<()> {
        self.region.destroy()
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(&*self.region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::InMemoryRegion;
    use l2cache_core::{BasicType, CacheDataDescription, EntityMode, MonotonicTimestamper};
    use serde_json::json;
    use std::time::Duration;

    fn key(id: i64) -> CacheKey {
        CacheKey::new(json!(id), Arc::new(BasicType::Long), "Product", EntityMode::Typed)
    }

    fn strategy() -> NonstrictReadWriteCache<InMemoryRegion<CacheKey, Value>> {
        let region = InMemoryRegion::new(
            "products",
            Arc::new(MonotonicTimestamper::new()),
            Duration::from_secs(60),
        )
        .with_description(CacheDataDescription::mutable());
        NonstrictReadWriteCache::new(Arc::new(region))
    }

    #[test]
    fn test_update_evicts() {
        let cache = strategy();
        cache.put(&key(1), json!({"price": 10}), 100, None, None, false).unwrap();

        assert!(!cache.update(&key(1), json!({"price": 12}), None, None).unwrap());
        assert_eq!(cache.get(&key(1), 101).unwrap(), None);
    }

    #[test]
    fn test_after_update_evicts_again() {
        let cache = strategy();
        cache.put(&key(1), json!("stale"), 100, None, None, false).unwrap();
        assert!(!cache.after_update(&key(1), json!("fresh"), None, None).unwrap());
        assert_eq!(cache.get(&key(1), 101).unwrap(), None);
    }

    #[test]
    fn test_lock_returns_no_lock_and_release_evicts() {
        let cache = strategy();
        cache.put(&key(1), json!("a"), 100, None, None, false).unwrap();
        let lock = cache.lock(&key(1), None).unwrap();
        assert!(lock.is_none());
        // Locking alone does not drop the item.
        assert_eq!(cache.get(&key(1), 101).unwrap(), Some(json!("a")));

        cache.release(&key(1), lock).unwrap();
        assert_eq!(cache.get(&key(1), 102).unwrap(), None);
    }

    #[test]
    fn test_inserts_are_never_cached() {
        let cache = strategy();
        assert!(!cache.insert(&key(5), json!("new"), None).unwrap());
        assert!(!cache.after_insert(&key(5), json!("new"), None).unwrap());
        assert_eq!(cache.get(&key(5), 101).unwrap(), None);
    }

    #[test]
    fn test_minimal_put() {
        let cache = strategy();
        assert!(cache.put(&key(1), json!("a"), 100, None, None, true).unwrap());
        assert!(!cache.put(&key(1), json!("b"), 100, None, None, true).unwrap());
        assert_eq!(cache.get(&key(1), 101).unwrap(), Some(json!("a")));
    }

    #[test]
    fn test_concurrent_minimal_puts_write_once() {
        let cache = Arc::new(strategy());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.put(&key(3), json!(n), 100, None, None, true).unwrap()
                })
            })
            .collect();
        let written = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|w| *w)
            .count();
        assert_eq!(written, 1);
        assert_eq!(cache.stats().puts, 1);
    }

    #[test]
    fn test_stats_track_hits_and_evictions() {
        let cache = strategy();
        cache.put(&key(1), json!("a"), 100, None, None, false).unwrap();
        cache.get(&key(1), 101).unwrap();
        cache.get(&key(2), 101).unwrap();
        cache.remove(&key(1)).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.element_count, 0);
    }
}
