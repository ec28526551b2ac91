//! Concurrency strategies.
//!
//! A strategy mediates every read and write between the session layer and
//! a transactional region. It decides which writes happen immediately, which
//! are deferred until after commit, and which are refused outright.

pub mod nonstrict;
pub mod optimistic;
pub mod read_only;

use std::fmt;
use std::sync::Arc;

use l2cache_core::{
    CacheKey, CacheResult, ConcurrencyStrategyKind, ConfigError, Timestamp, VersionComparator,
};
use serde_json::Value;

use crate::region::TransactionalDataRegion;
use crate::stats::CacheStats;

pub use nonstrict::NonstrictReadWriteCache;
pub use optimistic::{OptimisticCache, OptimisticStrategy};
pub use read_only::ReadOnlyCache;

/// Opaque token returned by [`ConcurrencyStrategy::lock`] and handed back
/// to [`ConcurrencyStrategy::release`] or
/// [`ConcurrencyStrategy::after_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftLock {
    key: String,
    version: Option<Value>,
}

impl SoftLock {
    pub fn new(key: &CacheKey, version: Option<Value>) -> Self {
        Self {
            key: key.to_string(),
            version,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> Option<&Value> {
        self.version.as_ref()
    }
}

/// Per-region policy for reads and writes of entity and collection state.
///
/// Return values of the write operations report whether the cache was
/// actually written.
pub trait ConcurrencyStrategy: Send + Sync {
    fn kind(&self) -> ConcurrencyStrategyKind;

    fn region_name(&self) -> &str;

    /// Look up cached state. `tx_timestamp` is when the reading
    /// transaction started.
    fn get(&self, key: &CacheKey, tx_timestamp: Timestamp) -> CacheResult<Option<Value>>;

    /// Cache state just loaded from the database. With `minimal_put` the
    /// write is skipped when the key is already cached.
    fn put(
        &self,
        key: &CacheKey,
        value: Value,
        tx_timestamp: Timestamp,
        version: Option<&Value>,
        version_comparator: Option<&dyn VersionComparator>,
        minimal_put: bool,
    ) -> CacheResult<bool>;

    /// Called before the item is updated in the database.
    fn lock(&self, key: &CacheKey, version: Option<&Value>) -> CacheResult<Option<SoftLock>>;

    /// Called when an update did not complete.
    fn release(&self, key: &CacheKey, lock: Option<SoftLock>) -> CacheResult<()>;

    /// Called after a new item is inserted in the database, before commit.
    fn insert(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool>;

    /// Called after the transaction inserting the item has committed.
    fn after_insert(
        &self,
        key: &CacheKey,
        value: Value,
        version: Option<&Value>,
    ) -> CacheResult<bool>;

    /// Called after an item is updated in the database, before commit.
    fn update(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
        previous_version: Option<&Value>,
    ) -> CacheResult<bool>;

    /// Called after the transaction updating the item has committed.
    fn after_update(
        &self,
        key: &CacheKey,
        value: Value,
        version: Option<&Value>,
        lock: Option<SoftLock>,
    ) -> CacheResult<bool>;

    /// Drop the item, for example because it was found to be stale.
    fn evict(&self, key: &CacheKey) -> CacheResult<()>;

    /// Called after the item is deleted from the database.
    fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Drop everything in the region.
    fn clear(&self) -> CacheResult<()>;

    /// Release the region's resources.
    fn destroy(&self) -> CacheResult<()>;

    fn stats(&self) -> CacheStats;
}

/// Strategy chosen by [`ConcurrencyStrategyKind`], over any transactional
/// region type.
pub enum AccessStrategy<R: TransactionalDataRegion + ?Sized = dyn TransactionalDataRegion> {
    ReadOnly(ReadOnlyCache<R>),
    NonstrictReadWrite(NonstrictReadWriteCache<R>),
    Optimistic(OptimisticStrategy<R>),
}

impl<R: TransactionalDataRegion + ?Sized> AccessStrategy<R> {
    /// Build the strategy for `kind` over `region`.
    ///
    /// `read-write` and `transactional` are recognised names but have no
    /// implementation here.
    pub fn build(kind: ConcurrencyStrategyKind, region: Arc<R>) -> CacheResult<Self> {
        match kind {
            ConcurrencyStrategyKind::ReadOnly => Ok(Self::ReadOnly(ReadOnlyCache::new(region))),
            ConcurrencyStrategyKind::NonstrictReadWrite => {
                Ok(Self::NonstrictReadWrite(NonstrictReadWriteCache::new(region)))
            }
            ConcurrencyStrategyKind::Optimistic => {
                Ok(Self::Optimistic(OptimisticStrategy::new(region)?))
            }
            ConcurrencyStrategyKind::ReadWrite | ConcurrencyStrategyKind::Transactional => {
                Err(ConfigError::UnknownStrategy {
                    name: kind.as_str().to_string(),
                }
                .into())
            }
        }
    }

    fn inner(&self) -> &dyn ConcurrencyStrategy {
        match self {
            AccessStrategy::ReadOnly(s) => s,
            AccessStrategy::NonstrictReadWrite(s) => s,
            AccessStrategy::Optimistic(s) => s,
        }
    }
}

impl<R: TransactionalDataRegion + ?Sized> fmt::Debug for AccessStrategy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessStrategy")
            .field("kind", &self.kind())
            .field("region", &self.region_name())
            .finish()
    }
}

impl<R: TransactionalDataRegion + ?Sized> ConcurrencyStrategy for AccessStrategy<R> {
    fn kind(&self) -> ConcurrencyStrategyKind {
        self.inner().kind()
    }

    fn region_name(&self) -> &str {
        self.inner().region_name()
    }

    fn get(&self, key: &CacheKey, tx_timestamp: Timestamp) -> CacheResult<Option<Value>> {
        self.inner().get(key, tx_timestamp)
    }

    fn put(
        &self,
        key: &CacheKey,
        value: Value,
        tx_timestamp: Timestamp,
        version: Option<&Value>,
        version_comparator: Option<&dyn VersionComparator>,
        minimal_put: bool,
    ) -> CacheResult<bool> {
        self.inner()
            .put(key, value, tx_timestamp, version, version_comparator, minimal_put)
    }

    fn lock(&self, key: &CacheKey, version: Option<&Value>) -> CacheResult<Option<SoftLock>> {
        self.inner().lock(key, version)
    }

    fn release(&self, key: &CacheKey, lock: Option<SoftLock>) -> CacheResult<()> {
        self.inner().release(key, lock)
    }

    fn insert(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        self.inner().insert(key, value, current_version)
    }

    fn after_insert(
        &self,
        key: &CacheKey,
        value: Value,
        version: Option<&Value>,
    ) -> CacheResult<bool> {
        self.inner().after_insert(key, value, version)
    }

    fn update(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
        previous_version: Option<&Value>,
    ) -> CacheResult<bool> {
        self.inner()
            .update(key, value, current_version, previous_version)
    }

    fn after_update(
        &self,
        key: &CacheKey,
        value: Value,
        version: Option<&Value>,
        lock: Option<SoftLock>,
    ) -> CacheResult<bool> {
        self.inner().after_update(key, value, version, lock)
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        self.inner().evict(key)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.inner().remove(key)
    }

    fn clear(&self) -> CacheResult<()> {
        self.inner().clear()
    }

    fn destroy(&self) -> CacheResult<()> {
        self.inner().destroy()
    }

    fn stats(&self) -> CacheStats {
        self.inner().stats()
    }
}
