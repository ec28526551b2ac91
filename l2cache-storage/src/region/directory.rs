//! Region factory located through an external directory service.
//!
//! The directory is consulted once, at start. Lookup failures are fatal to
//! starting the cache; they are logged and surfaced as
//! [`RegionError::DirectoryLookup`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use l2cache_core::{
    CacheDataDescription, CacheError, CacheResult, CacheSettings, ConfigError,
    MonotonicTimestamper, RegionError, Timestamp, TimestampSource,
};

use super::{CollectionRegion, EntityRegion, QueryResultsRegion, RegionFactory, TimestampsRegion};

/// Name under which the region factory is bound in the directory.
pub const REGION_FACTORY_BINDING: &str = "region-factory";

/// Naming/directory service able to hand out a bound region factory.
pub trait DirectoryService: Send + Sync {
    /// Look up the region factory bound in `namespace`. The connection
    /// properties come from `l2cache.directory.*` settings.
    fn lookup(
        &self,
        namespace: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Arc<dyn RegionFactory>, String>;
}

/// Delegates to a region factory found in a [`DirectoryService`].
pub struct DirectoryBoundRegionFactory {
    directory: Arc<dyn DirectoryService>,
    located: RwLock<Option<Arc<dyn RegionFactory>>>,
    fallback_timestamps: MonotonicTimestamper,
}

impl DirectoryBoundRegionFactory {
    pub fn new(directory: Arc<dyn DirectoryService>) -> Self {
        Self {
            directory,
            located: RwLock::new(None),
            fallback_timestamps: MonotonicTimestamper::new(),
        }
    }

    /// The located factory, once started.
    pub fn located(&self) -> Option<Arc<dyn RegionFactory>> {
        self.located.read().ok().and_then(|guard| guard.clone())
    }

    fn require_located(&self) -> CacheResult<Arc<dyn RegionFactory>> {
        self.located().ok_or_else(|| CacheError::CachingDisabled {
            reason: "directory-bound region factory has not been started".to_string(),
        })
    }
}

impl RegionFactory for DirectoryBoundRegionFactory {
    fn start(&self, settings: &CacheSettings) -> CacheResult<()> {
        let directory = settings
            .directory
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "directory.namespace".to_string(),
            })?;

        let factory = match self
            .directory
            .lookup(&directory.namespace, &directory.properties)
        {
            Ok(factory) => factory,
            Err(reason) => {
                tracing::error!(
                    namespace = %directory.namespace,
                    error = %reason,
                    "Could not locate region factory in directory"
                );
                return Err(RegionError::DirectoryLookup {
                    namespace: directory.namespace.clone(),
                    name: REGION_FACTORY_BINDING.to_string(),
                    reason,
                }
                .into());
            }
        };

        factory.start(settings)?;
        tracing::info!(namespace = %directory.namespace, "Located region factory in directory");

        let mut located = self.located.write().map_err(|_| RegionError::LockPoisoned {
            region: REGION_FACTORY_BINDING.to_string(),
        })?;
        *located = Some(factory);
        Ok(())
    }

    fn stop(&self) {
        let taken = match self.located.write() {
            Ok(mut located) => located.take(),
            Err(_) => None,
        };
        if let Some(factory) = taken {
            factory.stop();
        }
    }

    fn is_minimal_puts_enabled_by_default(&self) -> bool {
        // Remote stores make writes expensive.
        self.located()
            .map(|f| f.is_minimal_puts_enabled_by_default())
            .unwrap_or(true)
    }

    fn next_timestamp(&self) -> Timestamp {
        match self.located() {
            Some(factory) => factory.next_timestamp(),
            None => self.fallback_timestamps.next_timestamp(),
        }
    }

    fn build_entity_region(
        &self,
        name: &str,
        settings: &CacheSettings,
        description: CacheDataDescription,
    ) -> CacheResult<Arc<dyn EntityRegion>> {
        self.require_located()?
            .build_entity_region(name, settings, description)
    }

    fn build_collection_region(
        &self,
        name: &str,
        settings: &CacheSettings,
        description: CacheDataDescription,
    ) -> CacheResult<Arc<dyn CollectionRegion>> {
        self.require_located()?
            .build_collection_region(name, settings, description)
    }

    fn build_query_results_region(
        &self,
        name: &str,
        settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn QueryResultsRegion>> {
        self.require_located()?.build_query_results_region(name, settings)
    }

    fn build_timestamps_region(
        &self,
        name: &str,
        settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn TimestampsRegion>> {
        self.require_located()?.build_timestamps_region(name, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::InMemoryRegionFactory;
    use l2cache_core::DirectorySettings;

    struct StaticDirectory {
        namespace: String,
    }

    impl DirectoryService for StaticDirectory {
        fn lookup(
            &self,
            namespace: &str,
            _properties: &HashMap<String, String>,
        ) -> Result<Arc<dyn RegionFactory>, String> {
            if namespace == self.namespace {
                Ok(Arc::new(InMemoryRegionFactory::new()))
            } else {
                Err(format!("nothing bound under {}", namespace))
            }
        }
    }

    fn settings(namespace: &str) -> CacheSettings {
        CacheSettings::default().with_directory(DirectorySettings {
            namespace: namespace.to_string(),
            properties: HashMap::new(),
        })
    }

    fn factory() -> DirectoryBoundRegionFactory {
        DirectoryBoundRegionFactory::new(Arc::new(StaticDirectory {
            namespace: "cache/primary".to_string(),
        }))
    }

    #[test]
    fn test_start_delegates_to_located_factory() {
        let factory = factory();
        let settings = settings("cache/primary");
        factory.start(&settings).unwrap();
        assert!(factory.located().is_some());
        assert!(!factory.is_minimal_puts_enabled_by_default());

        let region = factory
            .build_entity_region("widgets", &settings, CacheDataDescription::mutable())
            .unwrap();
        assert_eq!(region.name(), "widgets");

        factory.stop();
        assert!(factory.located().is_none());
    }

    #[test]
    fn test_failed_lookup_is_fatal() {
        let factory = factory();
        let err = factory.start(&settings("cache/missing")).unwrap_err();
        match err {
            CacheError::Region(RegionError::DirectoryLookup {
                namespace, reason, ..
            }) => {
                assert_eq!(namespace, "cache/missing");
                assert!(reason.contains("nothing bound"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unstarted_factory_refuses_regions() {
        let factory = factory();
        let settings = settings("cache/primary");
        assert!(factory
            .build_timestamps_region("ts", &settings)
            .is_err());
        assert!(factory.is_minimal_puts_enabled_by_default());
        let a = factory.next_timestamp();
        assert!(factory.next_timestamp() > a);
    }
}
