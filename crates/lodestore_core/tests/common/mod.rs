#![allow(dead_code)]

use lodestore_core::{
    Entity, EntitySchema, InMemoryBootstrap, SaveSettings, StoreBootstrap, StoreError,
    StoreRegistry, StoreResult, StoreSchema,
};
use lodestore_core::store::OpenedStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub age: i64,
}

impl Entity for Person {
    const TYPE_NAME: &'static str = "Person";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub label: String,
    pub value: i64,
}

impl Entity for Counter {
    const TYPE_NAME: &'static str = "Counter";
}

pub fn main_schema() -> StoreSchema {
    StoreSchema::new([
        EntitySchema::new("Person", "people"),
        EntitySchema::new("Counter", "counters"),
    ])
}

pub fn in_memory_registry(window: Duration) -> StoreRegistry {
    StoreRegistry::with_settings(
        InMemoryBootstrap::new().with_schema("main", main_schema()),
        SaveSettings::new(window),
    )
}

/// Writes `<name>.schema.json` for the main schema under `dir`.
pub fn write_main_schema(dir: &Path, name: &str) {
    let body = serde_json::to_string(&main_schema()).unwrap();
    std::fs::write(dir.join(format!("{name}.schema.json")), body).unwrap();
}

/// Durable row count read through an independent connection.
pub fn durable_rows(db_path: &Path, collection: &str) -> i64 {
    let conn = rusqlite::Connection::open(db_path).unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM objects WHERE collection = ?1;",
        [collection],
        |row| row.get(0),
    )
    .unwrap()
}

/// Makes every write to the objects table abort until [`accept_writes`].
pub fn reject_writes(db_path: &Path) {
    let conn = rusqlite::Connection::open(db_path).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS reject_writes BEFORE INSERT ON objects
         BEGIN SELECT RAISE(ABORT, 'writes disabled'); END;",
    )
    .unwrap();
}

pub fn accept_writes(db_path: &Path) {
    let conn = rusqlite::Connection::open(db_path).unwrap();
    conn.execute_batch("DROP TRIGGER IF EXISTS reject_writes;")
        .unwrap();
}

/// Counts `open_or_create` calls and widens the construction window.
pub struct CountingBootstrap {
    inner: InMemoryBootstrap,
    pub opens: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingBootstrap {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryBootstrap::new().with_schema("main", main_schema()),
            opens: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }
}

impl StoreBootstrap for CountingBootstrap {
    fn open_or_create(&self, name: &str) -> StoreResult<OpenedStore> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.inner.open_or_create(name)
    }
}

/// Fails the first `failures` attempts with `StoreCreateFailed`.
pub struct FlakyBootstrap {
    inner: InMemoryBootstrap,
    failures: usize,
    pub attempts: Arc<AtomicUsize>,
}

impl FlakyBootstrap {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryBootstrap::new().with_schema("main", main_schema()),
            failures,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl StoreBootstrap for FlakyBootstrap {
    fn open_or_create(&self, name: &str) -> StoreResult<OpenedStore> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(StoreError::StoreCreateFailed {
                store: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk unavailable").into(),
            });
        }
        self.inner.open_or_create(name)
    }
}
