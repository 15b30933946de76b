mod common;

use common::{in_memory_registry, CountingBootstrap, FlakyBootstrap, Person};
use lodestore_core::{
    EntityType, SaveSettings, SqliteBootstrap, StoreError, StoreRegistry,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn entity_lookup_before_any_store_opens_is_unregistered() {
    let registry = in_memory_registry(Duration::from_secs(60));

    let err = registry.entity::<Person>().err().unwrap();
    assert_eq!(err.code(), 400);
    assert!(matches!(err, StoreError::Unregistered(ref name) if *name == EntityType::of("Person")));

    registry.store("main").unwrap();
    let people = registry.entity::<Person>().unwrap();
    assert_eq!(people.store().name(), "main");
}

#[test]
fn concurrent_first_access_constructs_one_store() {
    let bootstrap = CountingBootstrap::new(Duration::from_millis(50));
    let opens = Arc::clone(&bootstrap.opens);
    let registry = Arc::new(StoreRegistry::with_settings(
        bootstrap,
        SaveSettings::new(Duration::from_secs(60)),
    ));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.store("main").unwrap()
            })
        })
        .collect();
    let stores: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert!(stores.iter().all(|store| store.same_store(&stores[0])));
}

#[test]
fn failed_construction_is_retried_on_next_request() {
    let bootstrap = FlakyBootstrap::new(1);
    let attempts = Arc::clone(&bootstrap.attempts);
    let registry = StoreRegistry::new(bootstrap);

    let err = registry.store("main").unwrap_err();
    assert_eq!(err.code(), 404);
    assert!(registry.store_names().is_empty());
    assert!(matches!(
        registry.entity::<Person>().err(),
        Some(StoreError::Unregistered(_))
    ));

    registry.store("main").unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    registry.store("main").unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn file_bootstrap_reports_missing_and_malformed_schemas() {
    let schemas = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::write(schemas.path().join("broken.schema.json"), "[]").unwrap();
    let registry = StoreRegistry::new(SqliteBootstrap::new(schemas.path(), data.path()));

    let missing = registry.store("absent").unwrap_err();
    assert!(matches!(missing, StoreError::MissingSchema(ref name) if name == "absent"));
    assert_eq!(missing.code(), 402);

    let broken = registry.store("broken").unwrap_err();
    assert!(matches!(broken, StoreError::ModelInitFailed { .. }));
    assert_eq!(broken.code(), 403);
}

#[test]
fn stores_opened_from_config_use_their_debounce_override() {
    let schemas = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    common::write_main_schema(schemas.path(), "main");
    common::write_main_schema(schemas.path(), "journal");

    let config = lodestore_core::LodestoreConfig::from_json(
        &serde_json::json!({
            "schema_dir": schemas.path(),
            "data_dir": data.path(),
            "debounce_ms": 150,
            "stores": { "journal": { "debounce_ms": 900 } }
        })
        .to_string(),
    )
    .unwrap();
    let registry = StoreRegistry::from_config(&config);

    assert_eq!(
        registry.store("main").unwrap().debounce_window(),
        Duration::from_millis(150)
    );
    assert_eq!(
        registry.store("journal").unwrap().debounce_window(),
        Duration::from_millis(900)
    );
    assert_eq!(registry.store_names(), vec!["journal".to_string(), "main".to_string()]);
    assert!(data.path().join("journal.sqlite").is_file());
}
