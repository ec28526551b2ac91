//! Region factories.

use std::sync::Arc;

use l2cache_core::{
    CacheDataDescription, CacheError, CacheResult, CacheSettings, ConfigError,
    MonotonicTimestamper, RegionFactoryKind, Timestamp, TimestampSource,
};

use super::{
    CollectionRegion, DirectoryBoundRegionFactory, DirectoryService, EntityRegion,
    InMemoryRegionFactory, QueryResultsRegion, TimestampsRegion,
};

/// Pluggable provider of regions.
///
/// A factory is started once before any region is built and stopped when
/// the owning [`CacheManager`](crate::CacheManager) shuts down.
pub trait RegionFactory: Send + Sync {
    fn start(&self, settings: &CacheSettings) -> CacheResult<()>;

    fn stop(&self);

    /// Whether puts should skip keys already present unless configured
    /// otherwise. Worth enabling for stores where writes are expensive.
    fn is_minimal_puts_enabled_by_default(&self) -> bool;

    fn next_timestamp(&self) -> Timestamp;

    fn build_entity_region(
        &self,
        name: &str,
        settings: &CacheSettings,
        description: CacheDataDescription,
    ) -> CacheResult<Arc<dyn EntityRegion>>;

    fn build_collection_region(
        &self,
        name: &str,
        settings: &CacheSettings,
        description: CacheDataDescription,
    ) -> CacheResult<Arc<dyn CollectionRegion>>;

    fn build_query_results_region(
        &self,
        name: &str,
        settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn QueryResultsRegion>>;

    fn build_timestamps_region(
        &self,
        name: &str,
        settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn TimestampsRegion>>;
}

/// Factory used when caching is switched off. Every build fails.
#[derive(Debug, Default)]
pub struct NoCachingRegionFactory {
    timestamps: MonotonicTimestamper,
}

impl NoCachingRegionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn disabled() -> CacheError {
        CacheError::CachingDisabled {
            reason: "no region factory is configured; set l2cache.region_factory to enable \
                     the second-level or query cache"
                .to_string(),
        }
    }
}

impl RegionFactory for NoCachingRegionFactory {
    fn start(&self, _settings: &CacheSettings) -> CacheResult<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn is_minimal_puts_enabled_by_default(&self) -> bool {
        false
    }

    fn next_timestamp(&self) -> Timestamp {
        self.timestamps.next_timestamp()
    }

    fn build_entity_region(
        &self,
        _name: &str,
        _settings: &CacheSettings,
        _description: CacheDataDescription,
    ) -> CacheResult<Arc<dyn EntityRegion>> {
        Err(Self::disabled())
    }

    fn build_collection_region(
        &self,
        _name: &str,
        _settings: &CacheSettings,
        _description: CacheDataDescription,
    ) -> CacheResult<Arc<dyn CollectionRegion>> {
        Err(Self::disabled())
    }

    fn build_query_results_region(
        &self,
        _name: &str,
        _settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn QueryResultsRegion>> {
        Err(Self::disabled())
    }

    fn build_timestamps_region(
        &self,
        _name: &str,
        _settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn TimestampsRegion>> {
        Err(Self::disabled())
    }
}

/// Build the factory selected by `settings.region_factory`.
///
/// The directory-bound factory needs a [`DirectoryService`]; asking for it
/// without one is a configuration error.
pub fn build_region_factory(
    settings: &CacheSettings,
    directory: Option<Arc<dyn DirectoryService>>,
) -> CacheResult<Arc<dyn RegionFactory>> {
    match settings.region_factory {
        RegionFactoryKind::InMemory => Ok(Arc::new(InMemoryRegionFactory::new())),
        RegionFactoryKind::NoCaching => Ok(Arc::new(NoCachingRegionFactory::new())),
        RegionFactoryKind::Directory => match directory {
            Some(directory) => Ok(Arc::new(DirectoryBoundRegionFactory::new(directory))),
            None => Err(ConfigError::MissingRequired {
                field: "directory service".to_string(),
            }
            .into()),
        },
    }
}
