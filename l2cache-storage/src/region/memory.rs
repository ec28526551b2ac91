//! In-process region store.
//!
//! Entries live in a `HashMap` behind a `RwLock`. Statistics about the
//! store itself (element counts, approximate size) are derived on demand;
//! hit and miss accounting lives with the strategies and the query cache.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use l2cache_core::{
    CacheDataDescription, CacheError, CacheKey, CacheResult, CacheSettings, MonotonicTimestamper,
    QueryKey, RegionError, Timestamp, TimestampSource,
};
use serde::Serialize;
use serde_json::Value;

use super::{
    CollectionRegion, EntityRegion, GeneralDataRegion, QueryResultsRegion, Region,
    RegionFactory, TimestampsRegion, TransactionalDataRegion,
};
use crate::query::QueryResultEntry;
use crate::strategy::OptimisticCache;

// ============================================================================
// IN-MEMORY REGION
// ============================================================================

/// Region backed by a process-local hash map.
pub struct InMemoryRegion<K, V> {
    name: String,
    entries: RwLock<HashMap<K, V>>,
    destroyed: AtomicBool,
    timestamps: Arc<dyn TimestampSource>,
    timeout: i64,
    transaction_aware: bool,
    description: CacheDataDescription,
}

impl<K, V> InMemoryRegion<K, V>
where
    K: Eq + Hash,
{
    pub fn new(
        name: impl Into<String>,
        timestamps: Arc<dyn TimestampSource>,
        timeout: Duration,
    ) -> Self {
        let timeout = timestamps.timeout_units(timeout);
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            timestamps,
            timeout,
            transaction_aware: false,
            description: CacheDataDescription::default(),
        }
    }

    pub fn with_description(mut self, description: CacheDataDescription) -> Self {
        self.description = description;
        self
    }

    pub fn with_transaction_aware(mut self, transaction_aware: bool) -> Self {
        self.transaction_aware = transaction_aware;
        self
    }

    /// Atomically replace the entry for `key` when `should_replace` approves
    /// of the current entry. Returns whether the write happened.
    pub fn put_if<F>(&self, key: K, value: V, should_replace: F) -> CacheResult<bool>
    where
        F: FnOnce(Option<&V>) -> bool,
    {
        let mut entries = self.write_entries()?;
        if !should_replace(entries.get(&key)) {
            return Ok(false);
        }
        entries.insert(key, value);
        Ok(true)
    }

    fn ensure_live(&self) -> CacheResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RegionError::Destroyed {
                region: self.name.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn poisoned(&self) -> CacheError {
        RegionError::LockPoisoned {
            region: self.name.clone(),
        }
        .into()
    }

    fn read_entries(&self) -> CacheResult<RwLockReadGuard<'_, HashMap<K, V>>> {
        self.ensure_live()?;
        self.entries.read().map_err(|_| self.poisoned())
    }

    fn write_entries(&self) -> CacheResult<RwLockWriteGuard<'_, HashMap<K, V>>> {
        self.ensure_live()?;
        self.entries.write().map_err(|_| self.poisoned())
    }
}

impl<K, V> fmt::Debug for InMemoryRegion<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRegion")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("transaction_aware", &self.transaction_aware)
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, V> Region for InMemoryRegion<K, V>
where
    K: Eq + Hash + fmt::Display + Send + Sync,
    V: Clone + Serialize + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn destroy(&self) -> CacheResult<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut entries = self.entries.write().map_err(|_| self.poisoned())?;
        entries.clear();
        tracing::debug!(region = %self.name, "Destroyed in-memory region");
        Ok(())
    }

    fn next_timestamp(&self) -> Timestamp {
        self.timestamps.next_timestamp()
    }

    fn timeout(&self) -> i64 {
        self.timeout
    }

    fn size_in_memory(&self) -> i64 {
        match self.read_entries() {
            Ok(entries) => entries
                .iter()
                .map(|(k, v)| {
                    let value_len = serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0);
                    (k.to_string().len() + value_len) as i64
                })
                .sum(),
            Err(_) => super::UNKNOWN_SIZE,
        }
    }

    fn element_count_in_memory(&self) -> i64 {
        match self.read_entries() {
            Ok(entries) => entries.len() as i64,
            Err(_) => super::UNKNOWN_SIZE,
        }
    }

    fn element_count_on_disk(&self) -> i64 {
        0
    }

    fn to_map(&self) -> CacheResult<BTreeMap<String, Value>> {
        let entries = self.read_entries()?;
        entries
            .iter()
            .map(|(k, v)| -> CacheResult<(String, Value)> {
                let value = serde_json::to_value(v).map_err(|e| RegionError::StoreFailure {
                    region: self.name.clone(),
                    reason: e.to_string(),
                })?;
                Ok((k.to_string(), value))
            })
            .collect()
    }
}

impl<K, V> GeneralDataRegion<K, V> for InMemoryRegion<K, V>
where
    K: Eq + Hash + fmt::Display + Send + Sync,
    V: Clone + Serialize + Send + Sync,
{
    fn get(&self, key: &K) -> CacheResult<Option<V>> {
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn put(&self, key: K, value: V) -> CacheResult<()> {
        self.write_entries()?.insert(key, value);
        Ok(())
    }

    fn put_if_absent(&self, key: K, value: V) -> CacheResult<bool> {
        self.put_if(key, value, |existing| existing.is_none())
    }

    fn evict(&self, key: &K) -> CacheResult<()> {
        self.write_entries()?.remove(key);
        Ok(())
    }

    fn evict_all(&self) -> CacheResult<()> {
        self.write_entries()?.clear();
        Ok(())
    }
}

impl TransactionalDataRegion for InMemoryRegion<CacheKey, Value> {
    fn is_transaction_aware(&self) -> bool {
        self.transaction_aware
    }

    fn cache_data_description(&self) -> &CacheDataDescription {
        &self.description
    }
}

impl EntityRegion for InMemoryRegion<CacheKey, Value> {}
impl CollectionRegion for InMemoryRegion<CacheKey, Value> {}
impl QueryResultsRegion for InMemoryRegion<QueryKey, QueryResultEntry> {}
impl TimestampsRegion for InMemoryRegion<String, Timestamp> {}

// ============================================================================
// VERSIONED REGION
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct VersionedEntry {
    value: Value,
    version: Option<Value>,
}

/// Region that remembers the version each entry was written with and only
/// lets newer versions replace it.
#[derive(Debug)]
pub struct VersionedRegion {
    inner: InMemoryRegion<CacheKey, VersionedEntry>,
}

impl VersionedRegion {
    pub fn new(
        name: impl Into<String>,
        timestamps: Arc<dyn TimestampSource>,
        timeout: Duration,
        description: CacheDataDescription,
    ) -> Self {
        Self {
            inner: InMemoryRegion::new(name, timestamps, timeout).with_description(description),
        }
    }

    pub fn with_transaction_aware(mut self, transaction_aware: bool) -> Self {
        self.inner = self.inner.with_transaction_aware(transaction_aware);
        self
    }

    /// Version stored alongside the entry for `key`.
    pub fn version_of(&self, key: &CacheKey) -> CacheResult<Option<Value>> {
        Ok(self.inner.get(key)?.and_then(|entry| entry.version))
    }

    /// Write unless the cached entry carries a version at least as new as
    /// `version`.
    fn write_versioned(
        &self,
        key: &CacheKey,
        value: Value,
        version: Option<&Value>,
    ) -> CacheResult<bool> {
        let comparator = self.inner.description.version_comparator().cloned();
        let entry = VersionedEntry {
            value,
            version: version.cloned(),
        };
        let written = self.inner.put_if(key.clone(), entry, |existing| {
            match (existing.and_then(|e| e.version.as_ref()), version, &comparator) {
                (Some(cached), Some(incoming), Some(cmp)) => {
                    cmp.compare(cached, incoming) == std::cmp::Ordering::Less
                }
                _ => true,
            }
        })?;
        if !written {
            tracing::debug!(
                region = %self.inner.name,
                key = %key,
                "Cached version is not older than incoming version, skipping write"
            );
        }
        Ok(written)
    }
}

impl Region for VersionedRegion {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn destroy(&self) -> CacheResult<()> {
        self.inner.destroy()
    }

    fn next_timestamp(&self) -> Timestamp {
        self.inner.next_timestamp()
    }

    fn timeout(&self) -> i64 {
        self.inner.timeout()
    }

    fn size_in_memory(&self) -> i64 {
        self.inner.size_in_memory()
    }

    fn element_count_in_memory(&self) -> i64 {
        self.inner.element_count_in_memory()
    }

    fn element_count_on_disk(&self) -> i64 {
        self.inner.element_count_on_disk()
    }

    fn to_map(&self) -> CacheResult<BTreeMap<String, Value>> {
        self.inner.to_map()
    }
}

impl GeneralDataRegion<CacheKey, Value> for VersionedRegion {
    fn get(&self, key: &CacheKey) -> CacheResult<Option<Value>> {
        Ok(self.inner.get(key)?.map(|entry| entry.value))
    }

    fn put(&self, key: CacheKey, value: Value) -> CacheResult<()> {
        self.inner.put(key, VersionedEntry { value, version: None })
    }

    fn put_if_absent(&self, key: CacheKey, value: Value) -> CacheResult<bool> {
        self.inner
            .put_if_absent(key, VersionedEntry { value, version: None })
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        self.inner.evict(key)
    }

    fn evict_all(&self) -> CacheResult<()> {
        self.inner.evict_all()
    }
}

impl TransactionalDataRegion for VersionedRegion {
    fn is_transaction_aware(&self) -> bool {
        self.inner.transaction_aware
    }

    fn cache_data_description(&self) -> &CacheDataDescription {
        &self.inner.description
    }

    fn as_optimistic(&self) -> Option<&dyn OptimisticCache> {
        Some(self)
    }
}

impl OptimisticCache for VersionedRegion {
    fn write_insert(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        self.write_versioned(key, value, current_version)
    }

    fn write_update(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
        previous_version: Option<&Value>,
    ) -> CacheResult<bool> {
        tracing::trace!(
            region = %self.inner.name,
            key = %key,
            previous_version = ?previous_version,
            current_version = ?current_version,
            "Versioned update"
        );
        self.write_versioned(key, value, current_version)
    }

    fn write_load(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        self.write_versioned(key, value, current_version)
    }
    fn write_load_if_absent(
        &self,
        key: &CacheKey,
        value: Value,
        current_version: Option<&Value>,
    ) -> CacheResult<bool> {
        let entry = VersionedEntry {
            value,
            version: current_version.cloned(),
        };
        self.inner.put_if_absent(key.clone(), entry)
    }
}

impl EntityRegion for VersionedRegion {}
impl CollectionRegion for VersionedRegion {}

// ============================================================================
// FACTORY
// ============================================================================

/// Builds [`InMemoryRegion`]s, or [`VersionedRegion`]s for versioned data.
#[derive(Debug)]
pub struct InMemoryRegionFactory {
    timestamps: Arc<dyn TimestampSource>,
    transaction_aware: bool,
    started: AtomicBool,
}

impl Default for InMemoryRegionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegionFactory {
    pub fn new() -> Self {
        Self::with_timestamp_source(Arc::new(MonotonicTimestamper::new()))
    }

    pub fn with_timestamp_source(timestamps: Arc<dyn TimestampSource>) -> Self {
        Self {
            timestamps,
            transaction_aware: false,
            started: AtomicBool::new(false),
        }
    }

    /// Mark built entity and collection regions as transaction-aware.
    pub fn with_transaction_aware(mut self, transaction_aware: bool) -> Self {
        self.transaction_aware = transaction_aware;
        self
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn build_transactional(
        &self,
        name: &str,
        settings: &CacheSettings,
        description: CacheDataDescription,
    ) -> Arc<VersionedOrPlain> {
        let timestamps = Arc::clone(&self.timestamps);
        let timeout = settings.default_timeout;
        if description.is_versioned() {
            Arc::new(VersionedOrPlain::Versioned(
                VersionedRegion::new(name, timestamps, timeout, description)
                    .with_transaction_aware(self.transaction_aware),
            ))
        } else {
            Arc::new(VersionedOrPlain::Plain(
                InMemoryRegion::new(name, timestamps, timeout)
                    .with_description(description)
                    .with_transaction_aware(self.transaction_aware),
            ))
        }
    }
}

impl RegionFactory for InMemoryRegionFactory {
    fn start(&self, settings: &CacheSettings) -> CacheResult<()> {
        if !self.started.swap(true, Ordering::AcqRel) {
            tracing::info!(
                timeout_ms = settings.default_timeout.as_millis() as u64,
                "Started in-memory region factory"
            );
        }
        Ok(())
    }

    fn stop(&self) {
        if self.started.swap(false, Ordering::AcqRel) {
            tracing::info!("Stopped in-memory region factory");
        }
    }

    fn is_minimal_puts_enabled_by_default(&self) -> bool {
        false
    }

    fn next_timestamp(&self) -> Timestamp {
        self.timestamps.next_timestamp()
    }

    fn build_entity_region(
        &self,
        name: &str,
        settings: &CacheSettings,
        description: CacheDataDescription,
    ) -> CacheResult<Arc<dyn EntityRegion>> {
        Ok(self.build_transactional(name, settings, description))
    }

    fn build_collection_region(
        &self,
        name: &str,
        settings: &CacheSettings,
        description: CacheDataDescription,
    ) -> CacheResult<Arc<dyn CollectionRegion>> {
        Ok(self.build_transactional(name, settings, description))
    }

    fn build_query_results_region(
        &self,
        name: &str,
        settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn QueryResultsRegion>> {
        Ok(Arc::new(InMemoryRegion::<QueryKey, QueryResultEntry>::new(
            name,
            Arc::clone(&self.timestamps),
            settings.default_timeout,
        )))
    }

    fn build_timestamps_region(
        &self,
        name: &str,
        settings: &CacheSettings,
    ) -> CacheResult<Arc<dyn TimestampsRegion>> {
        Ok(Arc::new(InMemoryRegion::<String, Timestamp>::new(
            name,
            Arc::clone(&self.timestamps),
            settings.default_timeout,
        )))
    }
}

/// Entity/collection region chosen by whether the data is versioned.
#[derive(Debug)]
enum VersionedOrPlain {
    Plain(InMemoryRegion<CacheKey, Value>),
    Versioned(VersionedRegion),
}

impl VersionedOrPlain {
    fn region(&self) -> &dyn TransactionalDataRegion {
        match self {
            VersionedOrPlain::Plain(r) => r,
            VersionedOrPlain::Versioned(r) => r,
        }
    }
}

impl Region for VersionedOrPlain {
    fn name(&self) -> &str {
        self.region().name()
    }

    fn destroy(&self) -> CacheResult<()> {
        self.region().destroy()
    }

    fn next_timestamp(&self) -> Timestamp {
        self.region().next_timestamp()
    }

    fn timeout(&self) -> i64 {
        self.region().timeout()
    }

    fn size_in_memory(&self) -> i64 {
        self.region().size_in_memory()
    }

    fn element_count_in_memory(&self) -> i64 {
        self.region().element_count_in_memory()
    }

    fn element_count_on_disk(&self) -> i64 {
        self.region().element_count_on_disk()
    }

    fn to_map(&self) -> CacheResult<BTreeMap<String, Value>> {
        self.region().to_map()
    }
}

impl GeneralDataRegion<CacheKey, Value> for VersionedOrPlain {
    fn get(&self, key: &CacheKey) -> CacheResult<Option<Value>> {
        self.region().get(key)
    }

    fn put(&self, key: CacheKey, value: Value) -> CacheResult<()> {
        self.region().put(key, value)
    }

    fn put_if_absent(&self, key: CacheKey, value: Value) -> CacheResult<bool> {
        self.region().put_if_absent(key, value)
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        self.region().evict(key)
    }

    fn evict_all(&self) -> CacheResult<()> {
        self.region().evict_all()
    }
}

impl TransactionalDataRegion for VersionedOrPlain {
    fn is_transaction_aware(&self) -> bool {
        self.region().is_transaction_aware()
    }

    fn cache_data_description(&self) -> &CacheDataDescription {
        self.region().cache_data_description()
    }

    fn as_optimistic(&self) -> Option<&dyn OptimisticCache> {
        self.region().as_optimistic()
    }
}

impl EntityRegion for VersionedOrPlain {}
impl CollectionRegion for VersionedOrPlain {}

#[cfg(test)]
mod tests {
    use super::*;
    use l2cache_core::{BasicType, EntityMode, NumericVersionComparator};
    use serde_json::json;

    fn key(id: i64) -> CacheKey {
        CacheKey::new(json!(id), Arc::new(BasicType::Long), "Widget", EntityMode::Typed)
    }

    fn plain_region() -> InMemoryRegion<CacheKey, Value> {
        InMemoryRegion::new(
            "widgets",
            Arc::new(MonotonicTimestamper::new()),
            Duration::from_secs(60),
        )
    }

    fn versioned_region() -> VersionedRegion {
        VersionedRegion::new(
            "versioned",
            Arc::new(MonotonicTimestamper::new()),
            Duration::from_secs(60),
            CacheDataDescription::versioned(Arc::new(NumericVersionComparator)),
        )
    }

    #[test]
    fn test_put_get_evict() {
        let region = plain_region();
        region.put(key(1), json!({"name": "one"})).unwrap();
        region.put(key(2), json!({"name": "two"})).unwrap();
        assert_eq!(region.get(&key(1)).unwrap(), Some(json!({"name": "one"})));
        assert_eq!(region.element_count_in_memory(), 2);

        region.evict(&key(1)).unwrap();
        assert_eq!(region.get(&key(1)).unwrap(), None);

        region.evict_all().unwrap();
        assert_eq!(region.element_count_in_memory(), 0);
    }

    #[test]
    fn test_destroyed_region_rejects_operations() {
        let region = plain_region();
        region.put(key(1), json!(1)).unwrap();
        region.destroy().unwrap();

        let err = region.get(&key(1)).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Region(RegionError::Destroyed { .. })
        ));
        assert!(region.put(key(1), json!(1)).is_err());
        assert_eq!(region.element_count_in_memory(), crate::region::UNKNOWN_SIZE);
        // Destroying twice is harmless.
        region.destroy().unwrap();
    }

    #[test]
    fn test_timeout_in_timestamp_units() {
        let region = plain_region();
        assert_eq!(region.timeout(), 60_000 * l2cache_core::TICKS_PER_MS);
    }

    #[test]
    fn test_to_map_and_size() {
        let region = plain_region();
        region.put(key(7), json!("seven")).unwrap();
        let map = region.to_map().unwrap();
        assert_eq!(map.get("Widget#7"), Some(&json!("seven")));
        assert!(region.size_in_memory() > 0);
        assert_eq!(region.element_count_on_disk(), 0);
    }

    #[test]
    fn test_put_if_consults_existing_entry() {
        let region = plain_region();
        assert!(region.put_if(key(1), json!(1), |e| e.is_none()).unwrap());
        assert!(!region.put_if(key(1), json!(2), |e| e.is_none()).unwrap());
        assert_eq!(region.get(&key(1)).unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_put_if_absent_has_one_winner_across_threads() {
        let region = Arc::new(plain_region());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let region = Arc::clone(&region);
                std::thread::spawn(move || region.put_if_absent(key(1), json!(n)).unwrap())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|written| *written)
            .count();
        assert_eq!(winners, 1);

        let versioned = versioned_region();
        assert!(versioned.put_if_absent(key(2), json!("a")).unwrap());
        assert!(!versioned.put_if_absent(key(2), json!("b")).unwrap());
        assert_eq!(versioned.get(&key(2)).unwrap(), Some(json!("a")));
    }

    #[test]
    fn test_versioned_region_rejects_stale_versions() {
        let region = versioned_region();
        assert!(region.write_load(&key(1), json!("v2"), Some(&json!(2))).unwrap());
        assert!(!region.write_load(&key(1), json!("v1"), Some(&json!(1))).unwrap());
        assert!(!region.write_update(&key(1), json!("v2b"), Some(&json!(2)), Some(&json!(1))).unwrap());
        assert_eq!(region.get(&key(1)).unwrap(), Some(json!("v2")));

        assert!(region.write_update(&key(1), json!("v3"), Some(&json!(3)), Some(&json!(2))).unwrap());
        assert_eq!(region.get(&key(1)).unwrap(), Some(json!("v3")));
        assert_eq!(region.version_of(&key(1)).unwrap(), Some(json!(3)));
    }

    #[test]
    fn test_versioned_region_unversioned_put_overwrites() {
        let region = versioned_region();
        region.write_insert(&key(1), json!("v5"), Some(&json!(5))).unwrap();
        region.put(key(1), json!("plain")).unwrap();
        assert_eq!(region.get(&key(1)).unwrap(), Some(json!("plain")));
        assert_eq!(region.version_of(&key(1)).unwrap(), None);
    }

    #[test]
    fn test_factory_picks_region_by_description() {
        let factory = InMemoryRegionFactory::new();
        let settings = CacheSettings::default();
        factory.start(&settings).unwrap();
        assert!(factory.is_started());

        let plain = factory
            .build_entity_region("plain", &settings, CacheDataDescription::mutable())
            .unwrap();
        assert!(plain.as_optimistic().is_none());
        assert_eq!(plain.name(), "plain");

        let versioned = factory
            .build_entity_region(
                "versioned",
                &settings,
                CacheDataDescription::versioned(Arc::new(NumericVersionComparator)),
            )
            .unwrap();
        assert!(versioned.as_optimistic().is_some());
        assert!(versioned.cache_data_description().is_versioned());

        factory.stop();
        assert!(!factory.is_started());
    }

    #[test]
    fn test_factory_transaction_awareness() {
        let factory = InMemoryRegionFactory::new().with_transaction_aware(true);
        let settings = CacheSettings::default();
        let region = factory
            .build_collection_region("items", &settings, CacheDataDescription::mutable())
            .unwrap();
        assert!(region.is_transaction_aware());
        assert!(!factory.is_minimal_puts_enabled_by_default());
    }
}
