//! Version-aware writes.
//!
//! [`OptimisticCache`] is a capability a region may offer alongside its
//! plain key/value operations: writes that carry the version of the state
//! being written, so that an older version never overwrites a newer one.
//! [`OptimisticStrategy`] routes loads, inserts and updates through that
//! capability when the region's data is versioned.

use std::fmt;
use std::sync::Arc;

use l2cache_core::{
    CacheKey, CacheResult, ConcurrencyStrategyKind, StrategyError, Timestamp, VersionComparator,
};
use serde_json::Value;

use super::{ConcurrencyStrategy, SoftLock};
use crate::region::TransactionalDataRegion;
use crate::stats::{CacheStats, StatsRecorder};

/// Write-time hooks for version-aware transactional writes.
///
/// Each returns whether the cache was written.
pub trait OptimisticCache: Send + Sync {
    /// Cache a newly inserted item.
    fn write_insert(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool>;

    /// Cache an updated item.
    fn write_update(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
        previous_version: Option<&Value>,
    ) -> CacheResult<bool>;

    /// Cache an item just loaded from the database.
    fn write_load(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool>;

    /// Cache a loaded item only when nothing is cached under `key`.
    fn write_load_if_absent(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool>;
}

/// Strategy over regions offering [`OptimisticCache`].
///
/// Transaction-aware regions are written during the transaction; otherwise
/// writes wait for `after_insert`/`after_update`. No locks are taken.
pub struct OptimisticStrategy<R: TransactionalDataRegion + ?Sized> {
    region: Arc<R>,
    stats: StatsRecorder,
}

impl<R: TransactionalDataRegion + ?Sized> OptimisticStrategy<R> {
    /// Fails with [`StrategyError::OptimisticUnsupported`] when the region
    /// cannot take version-aware writes.
    pub fn new(region: Arc<R>) -> CacheResult<Self> {
        if region.as_optimistic().is_none() {
            return Err(StrategyError::OptimisticUnsupported {
                region: region.name().to_string(),
            }
            .into());
        }
        Ok(Self {
            region,
            stats: StatsRecorder::new(),
        })
    }

    pub fn region(&self) -> &Arc<R> {
        &self.region
    }

    fn is_versioned(&self) -> bool {
        self.region.cache_data_description().is_versioned()
    }

    fn optimistic(&self) -> CacheResult<&dyn OptimisticCache> {
        self.region.as_optimistic().ok_or_else(|| {
            StrategyError::OptimisticUnsupported {
                region: self.region.name().to_string(),
            }
            .into()
        })
    }

    fn record(&self, written: bool) -> bool {
        if written {
            self.stats.record_put();
        }
        written
    }

    fn plain_put(&self, key: &CacheKey, value: Value) -> CacheResult<bool> {
        self.region.put(key.clone(), value)?;
        Ok(true)
    }
}

impl<R: TransactionalDataRegion + ?Sized> fmt::Debug for OptimisticStrategy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticStrategy")
            .field("region", &self.region.name())
            .field("transaction_aware", &self.region.is_transaction_aware())
            .finish()
    }
}

impl<R: TransactionalDataRegion + ?Sized> OptimisticCache for OptimisticStrategy<R> {
    fn write_insert(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        let written = if self.is_versioned() {
            self.optimistic()?.write_insert(key, value, current_version)?
        } else {
            self.plain_put(key, value)?
        };
        Ok(self.record(written))
    }

    fn write_update(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
        previous_version: Option<&Value>,
    ) -> CacheResult<bool> {
        let written = if self.is_versioned() {
            self.optimistic()?
                .write_update(key, value, current_version, previous_version)?
        } else {
            self.plain_put(key, value)?
        };
        Ok(self.record(written))
    }

    fn write_load(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        let written = if self.is_versioned() {
            self.optimistic()?.write_load(key, value, current_version)?
        } else {
            self.plain_put(key, value)?
        };
        Ok(self.record(written))
    }

    fn write_load_if_absent(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        let written = if self.is_versioned() {
            self.optimistic()?
                .write_load_if_absent(key, value, current_version)?
        } else {
            self.region.put_if_absent(key.clone(), value)?
        };
        Ok(self.record(written))
    }
}

impl<R: TransactionalDataRegion + ?Sized> ConcurrencyStrategy for OptimisticStrategy<R> {
    fn kind(&self) -> ConcurrencyStrategyKind {
        ConcurrencyStrategyKind::Optimistic
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
        version: Option<&Value>,
        _version_comparator: Option<&dyn VersionComparator>,
        minimal_put: bool,
    ) -> CacheResult<bool> {
        tracing::debug!(key = %key, tx_timestamp, version = ?version, "Caching");
        if minimal_put {
            let written = self.write_load_if_absent(key, value, version)?;
            if !written {
                tracing::debug!(key = %key, "Item already cached");
            }
            return Ok(written);
        }
        self.write_load(key, value, version)
    }

    fn lock(&self, _key: &CacheKey, _version: Option<&Value>) -> CacheResult<Option<SoftLock>> {
        Ok(None)
    }

    fn release(&self, _key: &CacheKey, _lock: Option<SoftLock>) -> CacheResult<()> {
        Ok(())
    }

    fn insert(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        if !self.region.is_transaction_aware() {
            return Ok(false);
        }
        self.write_insert(key, value, current_version)
    }

    fn after_insert(
        &self,
        key: &CacheKey,
        value: Value,
        version: Option<&Value>,
    ) -> CacheResult<bool> {
        if self.region.is_transaction_aware() {
            return Ok(false);
        }
        self.write_insert(key, value, version)
    }

    fn update(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
        previous_version: Option<&Value>,
    ) -> CacheResult<bool> {
        if !self.region.is_transaction_aware() {
            return Ok(false);
        }
        self.write_update(key, value, current_version, previous_version)
    }

    fn after_update(
        &self,
        key: &CacheKey,
        value: Value,
        version: Option<&Value>,
        _lock: Option<SoftLock>,
    ) -> CacheResult<bool> {
        if self.region.is_transaction_aware() {
            return Ok(false);
        }
        self.write_update(key, value, version, None)
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
