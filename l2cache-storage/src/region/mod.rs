//! Region contracts.
//!
//! A region is a named, independently configured cache store. Regions come
//! in four flavours:
//!
//! - entity and collection regions hold disassembled state keyed by
//!   [`CacheKey`] and are driven through a concurrency strategy
//! - the query results region holds [`QueryResultEntry`] values keyed by
//!   [`QueryKey`]
//! - the timestamps region maps table-space names to the last invalidation
//!   timestamp
//!
//! Every operation on a destroyed region fails with
//! [`RegionError::Destroyed`](l2cache_core::RegionError::Destroyed).

pub mod directory;
pub mod factory;
pub mod memory;

use std::collections::BTreeMap;

use l2cache_core::{CacheDataDescription, CacheKey, CacheResult, QueryKey, Timestamp};
use serde_json::Value;

use crate::query::QueryResultEntry;
use crate::strategy::OptimisticCache;

pub use directory::{DirectoryBoundRegionFactory, DirectoryService};
pub use factory::{build_region_factory, NoCachingRegionFactory, RegionFactory};
pub use memory::{InMemoryRegion, InMemoryRegionFactory, VersionedRegion};

/// Returned by size and count queries the store cannot answer.
pub const UNKNOWN_SIZE: i64 = -1;

/// Behaviour shared by every region.
pub trait Region: Send + Sync {
    /// Fully qualified region name.
    fn name(&self) -> &str;

    /// Release all resources. Subsequent operations fail.
    fn destroy(&self) -> CacheResult<()>;

    /// Next value from the region's timestamp source.
    fn next_timestamp(&self) -> Timestamp;

    /// Lock timeout, in timestamp units.
    fn timeout(&self) -> i64;

    fn size_in_memory(&self) -> i64 {
        UNKNOWN_SIZE
    }

    fn element_count_in_memory(&self) -> i64 {
        UNKNOWN_SIZE
    }

    fn element_count_on_disk(&self) -> i64 {
        UNKNOWN_SIZE
    }

    /// Snapshot of the region contents for diagnostics.
    fn to_map(&self) -> CacheResult<BTreeMap<String, Value>> {
        Ok(BTreeMap::new())
    }
}

/// Plain key/value region without transactional semantics.
pub trait GeneralDataRegion<K, V>: Region {
    fn get(&self, key: &K) -> CacheResult<Option<V>>;

    fn put(&self, key: K, value: V) -> CacheResult<()>;

    /// Store `value` only when `key` has no entry, atomically with respect
    /// to other writers. Returns whether the write happened.
    fn put_if_absent(&self, key: K, value: V) -> CacheResult<bool>;

    fn evict(&self, key: &K) -> CacheResult<()>;

    fn evict_all(&self) -> CacheResult<()>;
}

/// Region whose writes are coordinated by a concurrency strategy.
pub trait TransactionalDataRegion: GeneralDataRegion<CacheKey, Value> {
    /// Whether writes to this region take effect synchronously with the
    /// surrounding transaction. Asynchronous regions only see writes once
    /// the commit is certain.
    fn is_transaction_aware(&self) -> bool;

    fn cache_data_description(&self) -> &CacheDataDescription;

    /// Version-aware write capability, when the region stores versions.
    fn as_optimistic(&self) -> Option<&dyn OptimisticCache> {
        None
    }
}

/// Region holding entity state.
pub trait EntityRegion: TransactionalDataRegion {}

/// Region holding collection state.
pub trait CollectionRegion: TransactionalDataRegion {}

/// Region holding cached query results.
pub trait QueryResultsRegion: GeneralDataRegion<QueryKey, QueryResultEntry> {}

/// Region holding per-space invalidation timestamps.
pub trait TimestampsRegion: GeneralDataRegion<String, Timestamp> {}
