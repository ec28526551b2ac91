//! l2cache Test Utilities
//!
//! Centralized test infrastructure for the l2cache workspace:
//! - A hand-driven timestamp source and a map-backed session
//! - Proptest generators for keys and query parameters
//! - Test fixtures for common scenarios
//! - Custom assertions for l2cache-specific errors

// Re-export core types for convenience
pub use l2cache_core::{
    AssemblyError, BasicType, CacheDataDescription, CacheError, CacheKey, CacheResult,
    CacheSettings, ConcurrencyStrategyKind, EntityMode, QueryKey, QueryParameters,
    SessionContext, StrategyError, Timestamp, TimestampSource, TypeDescriptor,
};
pub use l2cache_storage::{CacheManager, DirectoryService, InMemoryRegionFactory, RegionFactory};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

// ============================================================================
// MOCKS
// ============================================================================

/// Timestamp source that only moves when told to.
///
/// One timestamp unit is one millisecond, so a 100ms timeout is 100 units.
#[derive(Debug, Default)]
pub struct ManualTimestampSource {
    now: AtomicI64,
}

impl ManualTimestampSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: i64) -> Timestamp {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

impl TimestampSource for ManualTimestampSource {
    fn next_timestamp(&self) -> Timestamp {
        self.now()
    }

    fn timeout_units(&self, timeout: Duration) -> i64 {
        i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Session backed by an in-memory table of live entities.
///
/// Entities are JSON objects identified by their `"id"` field.
#[derive(Debug, Clone, Default)]
pub struct MapSession {
    timestamp: Timestamp,
    entities: HashMap<(String, String), Value>,
}

impl MapSession {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            entities: HashMap::new(),
        }
    }

    pub fn with_entity(mut self, entity_name: &str, identifier: Value, entity: Value) -> Self {
        self.entities
            .insert((entity_name.to_string(), identifier.to_string()), entity);
        self
    }

    pub fn remove_entity(&mut self, entity_name: &str, identifier: &Value) {
        self.entities
            .remove(&(entity_name.to_string(), identifier.to_string()));
    }
}

impl SessionContext for MapSession {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn identifier_of(&self, entity_name: &str, entity: &Value) -> CacheResult<Value> {
        entity.get("id").cloned().ok_or_else(|| {
            AssemblyError::TypeMismatch {
                type_name: entity_name.to_string(),
                value: entity.to_string(),
            }
            .into()
        })
    }

    fn resolve(&self, entity_name: &str, identifier: &Value) -> CacheResult<Option<Value>> {
        Ok(self
            .entities
            .get(&(entity_name.to_string(), identifier.to_string()))
            .cloned())
    }
}

/// Directory with region factories bound under fixed namespaces.
#[derive(Default)]
pub struct StaticDirectory {
    bindings: HashMap<String, Arc<dyn RegionFactory>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, namespace: &str, factory: Arc<dyn RegionFactory>) -> Self {
        self.bindings.insert(namespace.to_string(), factory);
        self
    }
}

impl DirectoryService for StaticDirectory {
    fn lookup(
        &self,
        namespace: &str,
        _properties: &HashMap<String, String>,
    ) -> Result<Arc<dyn RegionFactory>, String> {
        self.bindings
            .get(namespace)
            .cloned()
            .ok_or_else(|| format!("no region factory bound under {}", namespace))
    }
}

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber. Honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and query inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// Generate a role (entity name or collection role).
    pub fn arb_role() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,8}(\\.[a-z]{2,6})?"
    }

    /// Generate a table space name.
    pub fn arb_space() -> impl Strategy<Value = String> {
        "[a-z]{3,10}"
    }

    /// Generate a scalar type together with a value of that type.
    pub fn arb_typed_scalar() -> impl Strategy<Value = (BasicType, Value)> {
        prop_oneof![
            any::<i64>().prop_map(|v| (BasicType::Long, json!(v))),
            (-1.0e9f64..1.0e9).prop_map(|v| (BasicType::Double, json!(v))),
            any::<bool>().prop_map(|v| (BasicType::Boolean, json!(v))),
            "[a-zA-Z0-9 ]{0,16}".prop_map(|v| (BasicType::Text, json!(v))),
        ]
    }

    /// Generate a key with a `Long` identifier.
    pub fn arb_long_key() -> impl Strategy<Value = CacheKey> {
        (any::<i64>(), arb_role()).prop_map(|(id, role)| fixtures::long_key(&role, id))
    }

    /// Generate positional query parameters.
    pub fn arb_query_parameters() -> impl Strategy<Value = QueryParameters> {
        prop::collection::vec(arb_typed_scalar(), 0..4).prop_map(|values| {
            values
                .into_iter()
                .fold(QueryParameters::new(), |params, (ty, value)| {
                    params.with_positional(ty, value)
                })
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made values for common test scenarios.

    use super::*;
    use serde_json::json;

    /// Key with a `Long` identifier under `role`.
    pub fn long_key(role: &str, id: i64) -> CacheKey {
        CacheKey::new(json!(id), Arc::new(BasicType::Long), role, EntityMode::Typed)
    }

    /// Settings with the query cache switched on.
    pub fn query_cache_settings() -> CacheSettings {
        CacheSettings::default().with_query_cache(true)
    }

    /// Manager over an in-memory factory driven by `clock`.
    pub fn in_memory_manager(
        settings: CacheSettings,
        clock: Arc<ManualTimestampSource>,
    ) -> CacheManager {
        let factory = InMemoryRegionFactory::with_timestamp_source(clock);
        match CacheManager::start(settings, Arc::new(factory)) {
            Ok(manager) => manager,
            Err(e) => panic!("failed to start cache manager: {}", e),
        }
    }

    /// Result type descriptors from basic types.
    pub fn result_types(types: &[BasicType]) -> Vec<Arc<dyn TypeDescriptor>> {
        types
            .iter()
            .cloned()
            .map(|ty| Arc::new(ty) as Arc<dyn TypeDescriptor>)
            .collect()
    }

    /// Key for `query` with the given positional parameters.
    pub fn query_key(query: &str, params: &QueryParameters, session: &MapSession) -> QueryKey {
        match QueryKey::generate(query, params, &[], EntityMode::Typed, session) {
            Ok(key) => key,
            Err(e) => panic!("failed to build query key: {}", e),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertions for l2cache error kinds.

    use super::*;

    /// Assert that a result is the read-only write rejection.
    pub fn assert_unsupported_operation<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.is_unsupported_operation() => {}
            other => panic!("expected unsupported operation, got {:?}", other),
        }
    }

    /// Assert that a result reports caching as disabled.
    pub fn assert_caching_disabled<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::CachingDisabled { .. }) => {}
            other => panic!("expected caching disabled, got {:?}", other),
        }
    }

    /// Assert that a result is an unresolvable reference.
    pub fn assert_unresolvable<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.is_unresolvable_object() => {}
            other => panic!("expected unresolvable object, got {:?}", other),
        }
    }

    /// Assert that a result is a configuration error.
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Config(_)) => {}
            other => panic!("expected config error, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manual_clock() {
        let clock = ManualTimestampSource::new(10);
        assert_eq!(clock.next_timestamp(), 10);
        assert_eq!(clock.next_timestamp(), 10);
        assert_eq!(clock.advance(5), 15);
        clock.set(3);
        assert_eq!(clock.now(), 3);
        assert_eq!(clock.timeout_units(Duration::from_millis(250)), 250);
    }

    #[test]
    fn test_map_session_resolution() {
        let mut session = MapSession::new(1).with_entity("Customer", json!(7), json!({"id": 7}));
        assert_eq!(
            session.identifier_of("Customer", &json!({"id": 7})).unwrap(),
            json!(7)
        );
        assert_eq!(
            session.resolve("Customer", &json!(7)).unwrap(),
            Some(json!({"id": 7}))
        );
        session.remove_entity("Customer", &json!(7));
        assert_eq!(session.resolve("Customer", &json!(7)).unwrap(), None);
        assert!(session.identifier_of("Customer", &json!({})).is_err());
    }
}
