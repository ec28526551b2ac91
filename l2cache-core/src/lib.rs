//! l2cache Core - Keys, Timestamps and Contracts
//!
//! Pure data types shared by the second-level cache. All other crates depend
//! on this. Region storage, concurrency strategies and the query cache live
//! in `l2cache-storage`.

pub mod cache_key;
pub mod config;
pub mod error;
pub mod identity;
pub mod query_key;
pub mod timestamp;
pub mod types;

pub use cache_key::CacheKey;
pub use config::{
    CacheSettings, ConcurrencyStrategyKind, DirectorySettings, RegionFactoryKind,
    UnknownSpacePolicy, DEFAULT_REGION_TIMEOUT_MS, DIRECTORY_PROPERTY_PREFIX,
};
pub use error::{
    AssemblyError, CacheError, CacheResult, ConfigError, RegionError, StrategyError,
};
pub use identity::{combine_hash, compute_content_hash, stable_hash, ContentHash, Timestamp};
pub use query_key::{FilterKey, QueryKey, QueryParameters, RowSelection, TypedValue};
pub use timestamp::{MonotonicTimestamper, TimestampSource, TICKS_PER_MS};
pub use types::{
    BasicType, CacheDataDescription, EntityMode, NumericVersionComparator, SessionContext,
    TypeDescriptor, VersionComparator,
};
