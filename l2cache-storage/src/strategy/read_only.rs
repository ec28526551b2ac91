//! Strategy for data that is never updated.
//!
//! Loads and newly committed inserts are cached. Any attempt to update an
//! item through this strategy is a caller bug and fails with
//! [`StrategyError::UnsupportedOperation`].

use std::fmt;
use std::sync::Arc;

use l2cache_core::{
    CacheError, CacheKey, CacheResult, ConcurrencyStrategyKind, StrategyError, Timestamp,
    VersionComparator,
};
use serde_json::Value;

use super::{ConcurrencyStrategy, SoftLock};
use crate::region::TransactionalDataRegion;
use crate::stats::{CacheStats, StatsRecorder};

pub struct ReadOnlyCache<R: TransactionalDataRegion + ?Sized> {
    region: Arc<R>,
    stats: StatsRecorder,
}

impl<R: TransactionalDataRegion + ?Sized> ReadOnlyCache<R> {
    pub fn new(region: Arc<R>) -> Self {
        if region.cache_data_description().is_mutable() {
            tracing::warn!(region = %region.name(), "read-only cache configured for mutable data");
        }
        Self {
            region,
            stats: StatsRecorder::new(),
        }
    }

    pub fn region(&self) -> &Arc<R> {
        &self.region
    }

    fn log_edit_attempt(&self, operation: &str, key: &CacheKey) {
        tracing::error!(
            region = %self.region.name(),
            key = %key,
            operation,
            "Application attempted to edit read only item"
        );
    }

    fn unsupported(&self, operation: &str, key: &CacheKey) -> CacheError {
        self.log_edit_attempt(operation, key);
        StrategyError::UnsupportedOperation {
            strategy: ConcurrencyStrategyKind::ReadOnly.as_str().to_string(),
            operation: operation.to_string(),
            key: key.to_string(),
        }
        .into()
    }
}

impl<R: TransactionalDataRegion + ?Sized> fmt::Debug for ReadOnlyCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyCache")
            .field("region", &self.region.name())
            .finish()
    }
}

impl<R: TransactionalDataRegion + ?Sized> ConcurrencyStrategy for ReadOnlyCache<R> {
    fn kind(&self) -> ConcurrencyStrategyKind {
        ConcurrencyStrategyKind::ReadOnly
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
        _minimal_put: bool,
    ) -> CacheResult<bool> {
        // Cached read-only state is never replaced by a load.
        tracing::debug!(key = %key, tx_timestamp, "Caching");
        if !self.region.put_if_absent(key.clone(), value)? {
            tracing::debug!(key = %key, "Item already cached");
            return Ok(false);
        }
        self.stats.record_put();
        Ok(true)
    }

    fn lock(&self, key: &CacheKey, _version: Option<&Value>) -> CacheResult<Option<SoftLock>> {
        Err(self.unsupported("lock", key))
    }

    fn release(&self, key: &CacheKey, _lock: Option<SoftLock>) -> CacheResult<()> {
        // Nothing was locked; report the misuse and carry on.
        self.log_edit_attempt("release", key);
        Ok(())
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
        key: &CacheKey,
        value: Value,
        _version: Option<&Value>,
    ) -> CacheResult<bool> {
        tracing::debug!(key = %key, "Caching after insert");
        self.region.put(key.clone(), value)?;
        self.stats.record_put();
        Ok(true)
    }

    fn update(
        &self,
        key: &CacheKey,
        _value: Value,
        _current_version: Option<&Value>,
        _previous_version: Option<&Value>,
    ) -> CacheResult<bool> {
        Err(self.unsupported("update", key))
    }

    fn after_update(
        &self,
        key: &CacheKey,
        _value: Value,
        _version: Option<&Value>,
        _lock: Option<SoftLock>,
    ) -> CacheResult<bool> {
        Err(self.unsupported("after_update", key))
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        self.region.evict(key)?;
        self.stats.record_eviction();
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.evict(key)
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
        CacheKey::new(json!(id), Arc::new(BasicType::Long), "Country", EntityMode::Typed)
    }

    fn strategy() -> ReadOnlyCache<InMemoryRegion<CacheKey, Value>> {
        let region = InMemoryRegion::new(
            "countries",
            Arc::new(MonotonicTimestamper::new()),
            Duration::from_secs(60),
        )
        .with_description(CacheDataDescription::immutable());
        ReadOnlyCache::new(Arc::new(region))
    }

    #[test]
    fn test_put_then_get() {
        let cache = strategy();
        let state = json!({"code": "NZ"});
        assert!(cache.put(&key(1), state.clone(), 100, None, None, false).unwrap());
        assert_eq!(cache.get(&key(1), 101).unwrap(), Some(state));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.puts, 1);
    }

    #[test]
    fn test_put_never_replaces_cached_item() {
        let cache = strategy();
        assert!(cache.put(&key(1), json!("a"), 100, None, None, true).unwrap());
        assert!(!cache.put(&key(1), json!("b"), 100, None, None, true).unwrap());
        assert_eq!(cache.get(&key(1), 101).unwrap(), Some(json!("a")));

        assert!(!cache.put(&key(1), json!("c"), 101, None, None, false).unwrap());
        assert_eq!(cache.get(&key(1), 102).unwrap(), Some(json!("a")));
        assert_eq!(cache.stats().puts, 1);
    }

    #[test]
    fn test_concurrent_loads_cache_one_value() {
        let cache = Arc::new(strategy());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.put(&key(5), json!(n), 100, None, None, false).unwrap()
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
    fn test_update_paths_are_refused() {
        let cache = strategy();
        cache.put(&key(1), json!("a"), 100, None, None, false).unwrap();

        assert!(cache.lock(&key(1), None).unwrap_err().is_unsupported_operation());
        assert!(cache
            .update(&key(1), json!("b"), None, None)
            .unwrap_err()
            .is_unsupported_operation());
        assert!(cache
            .after_update(&key(1), json!("b"), None, None)
            .unwrap_err()
            .is_unsupported_operation());

        // The cached value is untouched.
        assert_eq!(cache.get(&key(1), 101).unwrap(), Some(json!("a")));
    }

    #[test]
    fn test_release_does_not_fail() {
        let cache = strategy();
        cache.release(&key(1), None).unwrap();
    }

    #[test]
    fn test_insert_is_deferred_until_after_commit() {
        let cache = strategy();
        assert!(!cache.insert(&key(2), json!("new"), None).unwrap());
        assert_eq!(cache.get(&key(2), 100).unwrap(), None);

        assert!(cache.after_insert(&key(2), json!("new"), None).unwrap());
        assert_eq!(cache.get(&key(2), 101).unwrap(), Some(json!("new")));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = strategy();
        cache.put(&key(1), json!("a"), 100, None, None, false).unwrap();
        cache.put(&key(2), json!("b"), 100, None, None, false).unwrap();

        cache.remove(&key(1)).unwrap();
        assert_eq!(cache.get(&key(1), 101).unwrap(), None);

        cache.clear().unwrap();
        assert_eq!(cache.get(&key(2), 101).unwrap(), None);
        assert_eq!(cache.stats().evictions, 1);
    }
}
