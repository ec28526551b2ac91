//! End-to-end scenarios through the cache manager.

use std::collections::HashMap;
use std::sync::Arc;

use l2cache_core::{
    BasicType, CacheDataDescription, CacheSettings, ConcurrencyStrategyKind, DirectorySettings,
    NumericVersionComparator, QueryParameters, RegionError,
};
use l2cache_storage::{CacheManager, ConcurrencyStrategy, InMemoryRegionFactory};
use l2cache_test_utils::assertions::{
    assert_caching_disabled, assert_config_error, assert_unsupported_operation,
};
use l2cache_test_utils::fixtures::{
    in_memory_manager, long_key, query_cache_settings, query_key, result_types,
};
use l2cache_test_utils::{init_tracing, CacheError, ManualTimestampSource, MapSession, StaticDirectory};
use serde_json::json;

#[test]
fn read_only_entity_round_trip() {
    init_tracing();
    let clock = Arc::new(ManualTimestampSource::new(100));
    let manager = in_memory_manager(CacheSettings::default(), clock);
    let countries = manager
        .entity_strategy(
            "Widget",
            ConcurrencyStrategyKind::ReadOnly,
            CacheDataDescription::immutable(),
        )
        .unwrap();

    let key = long_key("Widget", 7);
    let state = json!({"name": "sprocket", "teeth": 12});
    assert!(countries.put(&key, state.clone(), 100, None, None, false).unwrap());
    assert_eq!(countries.get(&key, 101).unwrap(), Some(state));

    assert_unsupported_operation(&countries.update(&key, json!({}), None, None));
    assert_unsupported_operation(&countries.lock(&key, None));
}

#[test]
fn nonstrict_update_forces_reload() {
    init_tracing();
    let clock = Arc::new(ManualTimestampSource::new(100));
    let manager = in_memory_manager(CacheSettings::default(), clock);
    let products = manager
        .entity_strategy(
            "Product",
            ConcurrencyStrategyKind::NonstrictReadWrite,
            CacheDataDescription::mutable(),
        )
        .unwrap();

    let key = long_key("Product", 1);
    products.put(&key, json!({"price": 10}), 100, None, None, false).unwrap();

    let lock = products.lock(&key, None).unwrap();
    assert!(!products.update(&key, json!({"price": 11}), None, None).unwrap());
    assert_eq!(products.get(&key, 106).unwrap(), None);
    assert!(!products
        .after_update(&key, json!({"price": 11}), None, lock)
        .unwrap());

    // The next load repopulates the region.
    assert!(products.put(&key, json!({"price": 11}), 107, None, None, false).unwrap());
    assert_eq!(products.get(&key, 108).unwrap(), Some(json!({"price": 11})));
}

#[test]
fn query_results_invalidated_by_table_update() {
    init_tracing();
    let clock = Arc::new(ManualTimestampSource::new(0));
    let manager = in_memory_manager(query_cache_settings(), Arc::clone(&clock));
    let query_cache = manager.query_cache(None).unwrap();
    let ledger = manager.update_timestamps().unwrap();

    let session = MapSession::new(50);
    let params = QueryParameters::new().with_positional(BasicType::Long, json!(18));
    let key = query_key("select p.name from Person p where p.age > ?", &params, &session);
    let types = result_types(&[BasicType::Text]);
    let spaces = vec!["people".to_string()];

    query_cache
        .put(&key, &types, &[json!("Ann"), json!("Bob")], false, &session)
        .unwrap();
    assert!(query_cache
        .get(&key, &types, false, &spaces, &session)
        .unwrap()
        .is_some());

    clock.set(60);
    ledger.invalidate(&spaces).unwrap();

    let later = MapSession::new(70);
    assert_eq!(
        query_cache.get(&key, &types, false, &spaces, &later).unwrap(),
        None
    );

    // Re-running the query at 70 caches results that are fresh again.
    query_cache
        .put(&key, &types, &[json!("Ann")], false, &later)
        .unwrap();
    assert_eq!(
        query_cache.get(&key, &types, false, &spaces, &later).unwrap(),
        Some(vec![json!("Ann")])
    );
}

#[test]
fn preinvalidation_hides_results_cached_during_a_write() {
    init_tracing();
    let clock = Arc::new(ManualTimestampSource::new(1_000));
    let manager = in_memory_manager(query_cache_settings(), Arc::clone(&clock));
    let query_cache = manager.query_cache(None).unwrap();
    let ledger = manager.update_timestamps().unwrap();
    let spaces = vec!["orders".to_string()];
    let types = result_types(&[BasicType::Long]);

    // A writer is about to touch orders.
    ledger.preinvalidate(&spaces).unwrap();

    // A concurrent reader caches results mid-transaction.
    let reader = MapSession::new(1_005);
    let key = query_key("select count(o) from Order o", &QueryParameters::new(), &reader);
    query_cache.put(&key, &types, &[json!(41)], false, &reader).unwrap();
    assert_eq!(
        query_cache.get(&key, &types, false, &spaces, &reader).unwrap(),
        None
    );

    // The writer commits; results read after the commit are usable.
    clock.set(1_010);
    ledger.invalidate(&spaces).unwrap();
    let after = MapSession::new(1_020);
    query_cache.put(&key, &types, &[json!(42)], false, &after).unwrap();
    assert_eq!(
        query_cache.get(&key, &types, false, &spaces, &after).unwrap(),
        Some(vec![json!(42)])
    );
}

#[test]
fn natural_key_lookup_of_deleted_row_is_dropped() {
    init_tracing();
    let clock = Arc::new(ManualTimestampSource::new(0));
    let manager = in_memory_manager(query_cache_settings(), clock);
    let query_cache = manager.query_cache(Some("natural-ids")).unwrap();

    let session = MapSession::new(10)
        .with_entity("User", json!(5), json!({"id": 5, "login": "ann"}));
    let params = QueryParameters::new().with_positional(BasicType::Text, json!("ann"));
    let key = query_key("select u from User u where u.login = ?", &params, &session);
    let types = result_types(&[BasicType::entity("User")]);
    let spaces = vec!["users".to_string()];

    query_cache
        .put(&key, &types, &[json!({"id": 5, "login": "ann"})], true, &session)
        .unwrap();
    assert_eq!(
        query_cache.get(&key, &types, true, &spaces, &session).unwrap(),
        Some(vec![json!({"id": 5, "login": "ann"})])
    );

    let mut after_delete = session.clone();
    after_delete.remove_entity("User", &json!(5));
    assert_eq!(
        query_cache.get(&key, &types, true, &spaces, &after_delete).unwrap(),
        None
    );
    // Gone for good, even for a session that can still resolve the row.
    assert_eq!(
        query_cache.get(&key, &types, true, &spaces, &session).unwrap(),
        None
    );
}

#[test]
fn optimistic_strategy_over_versioned_region() {
    init_tracing();
    let clock = Arc::new(ManualTimestampSource::new(0));
    let manager = in_memory_manager(CacheSettings::default(), clock);
    let accounts = manager
        .entity_strategy(
            "Account",
            ConcurrencyStrategyKind::Optimistic,
            CacheDataDescription::versioned(Arc::new(NumericVersionComparator)),
        )
        .unwrap();

    let key = long_key("Account", 9);
    accounts
        .put(&key, json!({"balance": 5}), 1, Some(&json!(2)), None, false)
        .unwrap();
    // A load that read an older version loses.
    assert!(!accounts
        .put(&key, json!({"balance": 1}), 2, Some(&json!(1)), None, false)
        .unwrap());
    assert!(accounts
        .after_update(&key, json!({"balance": 7}), Some(&json!(3)), None)
        .unwrap());
    assert_eq!(accounts.get(&key, 3).unwrap(), Some(json!({"balance": 7})));
}

#[test]
fn optimistic_strategy_needs_versioned_data() {
    let clock = Arc::new(ManualTimestampSource::new(0));
    let manager = in_memory_manager(CacheSettings::default(), clock);
    let err = manager
        .entity_strategy(
            "Account",
            ConcurrencyStrategyKind::Optimistic,
            CacheDataDescription::mutable(),
        )
        .unwrap_err();
    assert!(matches!(err, CacheError::Strategy(_)));
}

#[test]
fn unsupported_strategy_names_are_rejected() {
    let clock = Arc::new(ManualTimestampSource::new(0));
    let manager = in_memory_manager(CacheSettings::default(), clock);
    assert_config_error(&manager.entity_strategy(
        "Account",
        ConcurrencyStrategyKind::ReadWrite,
        CacheDataDescription::mutable(),
    ));
}

#[test]
fn directory_bound_factory_start_and_failure() {
    init_tracing();
    let directory = Arc::new(
        StaticDirectory::new().bind("java:cache/primary", Arc::new(InMemoryRegionFactory::new())),
    );
    let settings = CacheSettings::default().with_directory(DirectorySettings {
        namespace: "java:cache/primary".to_string(),
        properties: HashMap::new(),
    });
    let manager = CacheManager::from_settings(settings, Some(directory.clone())).unwrap();
    assert!(!manager.is_minimal_puts_enabled());
    manager
        .entity_strategy(
            "Widget",
            ConcurrencyStrategyKind::ReadOnly,
            CacheDataDescription::immutable(),
        )
        .unwrap();

    let missing = CacheSettings::default().with_directory(DirectorySettings {
        namespace: "java:cache/missing".to_string(),
        properties: HashMap::new(),
    });
    let err = CacheManager::from_settings(missing, Some(directory)).unwrap_err();
    assert!(matches!(
        err,
        CacheError::Region(RegionError::DirectoryLookup { .. })
    ));
}

#[test]
fn minimal_puts_setting_overrides_factory_default() {
    let clock = Arc::new(ManualTimestampSource::new(0));
    let manager = in_memory_manager(CacheSettings::default().with_minimal_puts(true), clock);
    assert!(manager.is_minimal_puts_enabled());
}

#[test]
fn stopped_manager_refuses_new_regions() {
    let clock = Arc::new(ManualTimestampSource::new(0));
    let manager = in_memory_manager(query_cache_settings(), clock);
    let before_stop = manager.query_cache(None).unwrap();
    manager.stop();
    assert_caching_disabled(&manager.entity_strategy(
        "Widget",
        ConcurrencyStrategyKind::ReadOnly,
        CacheDataDescription::immutable(),
    ));
    assert!(matches!(
        manager.query_cache(None).err(),
        Some(CacheError::CachingDisabled { .. })
    ));
    assert!(matches!(
        manager.query_cache(Some("late")).err(),
        Some(CacheError::CachingDisabled { .. })
    ));

    // Caches handed out before the stop no longer accept writes.
    let session = MapSession::new(1);
    let key = query_key("select w from Widget w", &QueryParameters::new(), &session);
    assert!(before_stop
        .put(&key, &result_types(&[BasicType::Long]), &[json!(1)], false, &session)
        .is_err());
    manager.stop();
}
