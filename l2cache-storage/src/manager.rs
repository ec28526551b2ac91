//! Cache lifecycle and region registry.
//!
//! The manager starts the region factory, builds the update timestamps
//! ledger and default query cache when the query cache is enabled, and
//! hands out one strategy per entity or collection region. Stopping is
//! idempotent and best-effort: failures to destroy individual regions are
//! logged and do not prevent the rest from shutting down.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use l2cache_core::{
    CacheDataDescription, CacheError, CacheResult, CacheSettings, ConcurrencyStrategyKind,
    RegionError, Timestamp,
};

use crate::query::{
    QueryCache, QueryCacheFactory, StandardQueryCacheFactory, DEFAULT_QUERY_RESULTS_REGION,
};
use crate::region::{
    build_region_factory, CollectionRegion, DirectoryService, EntityRegion, RegionFactory,
};
use crate::stats::CacheStats;
use crate::strategy::{AccessStrategy, ConcurrencyStrategy};
use crate::timestamps::UpdateTimestampsCache;

/// Region name of the update timestamps ledger.
pub const UPDATE_TIMESTAMPS_REGION: &str = "l2cache.UpdateTimestampsCache";

pub type EntityStrategy = AccessStrategy<dyn EntityRegion>;
pub type CollectionStrategy = AccessStrategy<dyn CollectionRegion>;

type Registry<T> = RwLock<HashMap<String, Arc<T>>>;

pub struct CacheManager {
    settings: CacheSettings,
    region_factory: Arc<dyn RegionFactory>,
    query_cache_factory: Arc<dyn QueryCacheFactory>,
    minimal_puts: bool,
    update_timestamps: Option<Arc<UpdateTimestampsCache>>,
    default_query_cache: Option<Arc<dyn QueryCache>>,
    query_caches: Registry<dyn QueryCache>,
    entity_strategies: Registry<EntityStrategy>,
    collection_strategies: Registry<CollectionStrategy>,
    stopped: AtomicBool,
}

impl CacheManager {
    /// Start with the region factory selected by `settings`.
    pub fn from_settings(
        settings: CacheSettings,
        directory: Option<Arc<dyn DirectoryService>>,
    ) -> CacheResult<Self> {
        let region_factory = build_region_factory(&settings, directory)?;
        Self::start(settings, region_factory)
    }

    /// Start with an explicit region factory and the standard query cache.
    pub fn start(
        settings: CacheSettings,
        region_factory: Arc<dyn RegionFactory>,
    ) -> CacheResult<Self> {
        Self::start_with_query_cache_factory(
            settings,
            region_factory,
            Arc::new(StandardQueryCacheFactory),
        )
    }

    pub fn start_with_query_cache_factory(
        settings: CacheSettings,
        region_factory: Arc<dyn RegionFactory>,
        query_cache_factory: Arc<dyn QueryCacheFactory>,
    ) -> CacheResult<Self> {
        settings.validate()?;
        region_factory.start(&settings)?;

        let minimal_puts = settings
            .use_minimal_puts
            .unwrap_or_else(|| region_factory.is_minimal_puts_enabled_by_default());

        tracing::info!(
            second_level_cache = settings.use_second_level_cache,
            query_cache = settings.use_query_cache,
            minimal_puts,
            region_factory = %settings.region_factory,
            region_prefix = settings.region_prefix.as_deref().unwrap_or(""),
            "Starting second-level cache"
        );

        let (update_timestamps, default_query_cache) = if settings.use_query_cache {
            let ts_region = region_factory.build_timestamps_region(
                &settings.qualify_region_name(UPDATE_TIMESTAMPS_REGION),
                &settings,
            )?;
            let ledger = Arc::new(UpdateTimestampsCache::new(
                ts_region,
                settings.unknown_space_policy,
            ));
            let query_cache = query_cache_factory.build_query_cache(
                &settings.qualify_region_name(DEFAULT_QUERY_RESULTS_REGION),
                Arc::clone(&ledger),
                &settings,
                region_factory.as_ref(),
            )?;
            (Some(ledger), Some(query_cache))
        } else {
            (None, None)
        };

        Ok(Self {
            settings,
            region_factory,
            query_cache_factory,
            minimal_puts,
            update_timestamps,
            default_query_cache,
            query_caches: RwLock::new(HashMap::new()),
            entity_strategies: RwLock::new(HashMap::new()),
            collection_strategies: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Whether sessions should pass `minimal_put = true` on loads.
    pub fn is_minimal_puts_enabled(&self) -> bool {
        self.minimal_puts
    }

    pub fn next_timestamp(&self) -> Timestamp {
        self.region_factory.next_timestamp()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Strategy for the entity region `name`, built on first use.
    ///
    /// Later calls for the same region return the existing strategy and
    /// ignore `kind` and `description`.
    pub fn entity_strategy(
        &self,
        name: &str,
        kind: ConcurrencyStrategyKind,
        description: CacheDataDescription,
    ) -> CacheResult<Arc<EntityStrategy>> {
        self.ensure_second_level_cache()?;
        let region_name = self.settings.qualify_region_name(name);
        get_or_build(&self.entity_strategies, &region_name, || {
            tracing::debug!(region = %region_name, strategy = %kind, "Building entity region");
            let region =
                self.region_factory
                    .build_entity_region(&region_name, &self.settings, description)?;
            Ok(Arc::new(AccessStrategy::build(kind, region)?))
        })
    }

    /// Strategy for the collection region `name`, built on first use.
    pub fn collection_strategy(
        &self,
        name: &str,
        kind: ConcurrencyStrategyKind,
        description: CacheDataDescription,
    ) -> CacheResult<Arc<CollectionStrategy>> {
        self.ensure_second_level_cache()?;
        let region_name = self.settings.qualify_region_name(name);
        get_or_build(&self.collection_strategies, &region_name, || {
            tracing::debug!(region = %region_name, strategy = %kind, "Building collection region");
            let region = self.region_factory.build_collection_region(
                &region_name,
                &self.settings,
                description,
            )?;
            Ok(Arc::new(AccessStrategy::build(kind, region)?))
        })
    }

    /// The default query cache, or the named one built on first use.
    pub fn query_cache(&self, region: Option<&str>) -> CacheResult<Arc<dyn QueryCache>> {
        self.ensure_running()?;
        let (ledger, default) = match (&self.update_timestamps, &self.default_query_cache) {
            (Some(ledger), Some(default)) => (ledger, default),
            _ => {
                return Err(CacheError::CachingDisabled {
                    reason: "the query cache is not enabled".to_string(),
                })
            }
        };

        let name = match region {
            None => return Ok(Arc::clone(default)),
            Some(name) => self.settings.qualify_region_name(name),
        };
        if name == default.region_name() {
            return Ok(Arc::clone(default));
        }

        get_or_build(&self.query_caches, &name, || {
            self.query_cache_factory.build_query_cache(
                &name,
                Arc::clone(ledger),
                &self.settings,
                self.region_factory.as_ref(),
            )
        })
    }

    /// The update timestamps ledger, present when the query cache is enabled.
    pub fn update_timestamps(&self) -> Option<Arc<UpdateTimestampsCache>> {
        self.update_timestamps.clone()
    }

    /// Drop everything cached in the entity region `name`.
    pub fn evict_entity_region(&self, name: &str) -> CacheResult<()> {
        let region_name = self.settings.qualify_region_name(name);
        if let Some(strategy) = lookup(&self.entity_strategies, &region_name)? {
            tracing::debug!(region = %region_name, "Evicting entity region");
            strategy.clear()?;
        }
        Ok(())
    }

    /// Drop everything cached in the collection region `name`.
    pub fn evict_collection_region(&self, name: &str) -> CacheResult<()> {
        let region_name = self.settings.qualify_region_name(name);
        if let Some(strategy) = lookup(&self.collection_strategies, &region_name)? {
            tracing::debug!(region = %region_name, "Evicting collection region");
            strategy.clear()?;
        }
        Ok(())
    }

    /// Drop cached query results, from the default query cache or the
    /// named one.
    pub fn evict_queries(&self, region: Option<&str>) -> CacheResult<()> {
        if self.default_query_cache.is_none() || self.is_stopped() {
            return Ok(());
        }
        self.query_cache(region)?.clear()
    }

    /// Statistics for every region the manager knows of, keyed by region
    /// name.
    pub fn statistics(&self) -> CacheResult<BTreeMap<String, CacheStats>> {
        let mut stats = BTreeMap::new();
        for (name, strategy) in snapshot(&self.entity_strategies)? {
            stats.insert(name, strategy.stats());
        }
        for (name, strategy) in snapshot(&self.collection_strategies)? {
            stats.insert(name, strategy.stats());
        }
        if let Some(default) = &self.default_query_cache {
            stats.insert(default.region_name().to_string(), default.stats());
        }
        for (name, cache) in snapshot(&self.query_caches)? {
            stats.insert(name, cache.stats());
        }
        if let Some(ledger) = &self.update_timestamps {
            stats.insert(ledger.region().name().to_string(), ledger.stats());
        }
        Ok(stats)
    }

    /// Destroy every region and stop the region factory. Safe to call more
    /// than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        for (name, strategy) in drain(&self.entity_strategies) {
            if let Err(e) = strategy.destroy() {
                tracing::warn!(region = %name, error = %e, "Unable to destroy cache");
            }
        }
        for (name, strategy) in drain(&self.collection_strategies) {
            if let Err(e) = strategy.destroy() {
                tracing::warn!(region = %name, error = %e, "Unable to destroy cache");
            }
        }
        for (name, cache) in drain(&self.query_caches) {
            if let Err(e) = cache.destroy() {
                tracing::warn!(region = %name, error = %e, "Unable to destroy query cache");
            }
        }
        if let Some(default) = &self.default_query_cache {
            if let Err(e) = default.destroy() {
                tracing::warn!(
                    region = %default.region_name(),
                    error = %e,
                    "Unable to destroy query cache"
                );
            }
        }
        if let Some(ledger) = &self.update_timestamps {
            if let Err(e) = ledger.destroy() {
                tracing::warn!(error = %e, "Unable to destroy update timestamps cache");
            }
        }

        self.region_factory.stop();
        tracing::info!("Stopped second-level cache");
    }

    fn ensure_running(&self) -> CacheResult<()> {
        if self.is_stopped() {
            return Err(CacheError::CachingDisabled {
                reason: "the cache manager has been stopped".to_string(),
            });
        }
        Ok(())
    }

    fn ensure_second_level_cache(&self) -> CacheResult<()> {
        self.ensure_running()?;
        if !self.settings.use_second_level_cache {
            return Err(CacheError::CachingDisabled {
                reason: "the second-level cache is not enabled".to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("settings", &self.settings)
            .field("minimal_puts", &self.minimal_puts)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn poisoned(registry: &str) -> CacheError {
    RegionError::LockPoisoned {
        region: registry.to_string(),
    }
    .into()
}

fn get_or_build<T: ?Sized, F>(registry: &Registry<T>, name: &str, build: F) -> CacheResult<Arc<T>>
where
    F: FnOnce() -> CacheResult<Arc<T>>,
{
    if let Some(existing) = lookup(registry, name)? {
        return Ok(existing);
    }
    let mut entries = registry.write().map_err(|_| poisoned(name))?;
    if let Some(existing) = entries.get(name) {
        return Ok(Arc::clone(existing));
    }
    let built = build()?;
    entries.insert(name.to_string(), Arc::clone(&built));
    Ok(built)
}

fn lookup<T: ?Sized>(registry: &Registry<T>, name: &str) -> CacheResult<Option<Arc<T>>> {
    let entries = registry.read().map_err(|_| poisoned(name))?;
    Ok(entries.get(name).cloned())
}

fn snapshot<T: ?Sized>(registry: &Registry<T>) -> CacheResult<Vec<(String, Arc<T>)>> {
    let entries = registry.read().map_err(|_| poisoned("registry"))?;
    Ok(entries
        .iter()
        .map(|(name, value)| (name.clone(), Arc::clone(value)))
        .collect())
}

fn drain<T: ?Sized>(registry: &Registry<T>) -> Vec<(String, Arc<T>)> {
    match registry.write() {
        Ok(mut entries) => entries.drain().collect(),
        Err(poisoned) => poisoned.into_inner().drain().collect(),
    }
}
