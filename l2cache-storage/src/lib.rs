//! l2cache Storage - Regions, Strategies and the Query Cache
//!
//! Everything that holds cached state lives here:
//!
//! - [`region`]: region contracts, the in-memory store and region factories
//! - [`strategy`]: read-only, nonstrict read-write and optimistic
//!   concurrency strategies
//! - [`timestamps`]: the update timestamps ledger
//! - [`query`]: the query result cache
//! - [`manager`]: lifecycle and the per-region registry

pub mod manager;
pub mod query;
pub mod region;
pub mod stats;
pub mod strategy;
pub mod timestamps;

pub use manager::{CacheManager, CollectionStrategy, EntityStrategy, UPDATE_TIMESTAMPS_REGION};
pub use query::{
    QueryCache, QueryCacheFactory, QueryResultEntry, StandardQueryCache,
    StandardQueryCacheFactory, DEFAULT_QUERY_RESULTS_REGION,
};
pub use region::{
    build_region_factory, CollectionRegion, DirectoryBoundRegionFactory, DirectoryService,
    EntityRegion, GeneralDataRegion, InMemoryRegion, InMemoryRegionFactory,
    NoCachingRegionFactory, QueryResultsRegion, Region, RegionFactory, TimestampsRegion,
    TransactionalDataRegion, VersionedRegion, UNKNOWN_SIZE,
};
pub use stats::{CacheStats, StatsRecorder};
pub use strategy::{
    AccessStrategy, ConcurrencyStrategy, NonstrictReadWriteCache, OptimisticCache,
    OptimisticStrategy, ReadOnlyCache, SoftLock,
};
pub use timestamps::UpdateTimestampsCache;
