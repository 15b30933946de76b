//! Store handle: one persistent store behind one lock.
//!
//! # Responsibility
//! - Serialize every read, mutation and save of a store through its lock.
//! - Drive the debounce timer around mutations and run immediate saves.
//! - Notify save listeners after committed writes.
//!
//! # Invariants
//! - Mutations cancel the pending deferred save on entry and re-arm it on
//!   exit, on success and on failure alike, unless a fire that has not yet
//!   reached the store is waiting on the lock and will save their changes.
//! - Immediate saves run inside the caller's critical section.
//! - Deferred save failures are logged and counted, never raised.
//! - Listeners are called with the store lock released.

use crate::error::{Operation, StoreError, StoreResult};
use crate::lifecycle::LifecycleEvent;
use crate::model::entity::EntityType;
use crate::store::bootstrap::OpenedStore;
use crate::store::context::StoreContext;
use crate::store::saver::{SaveCoordinator, SaveMode, SaveState};
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Receives a callback after a store commits writes.
pub trait SaveListener: Send + Sync {
    fn store_changed(&self, store: &Store);
}

/// Save counters since the store was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    /// Save attempts, including ones with nothing to write.
    pub flushes: u64,
    /// Saves that wrote staged changes.
    pub commits: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    flushes: AtomicU64,
    commits: AtomicU64,
    failures: AtomicU64,
}

struct StoreInner {
    name: String,
    context: Mutex<StoreContext>,
    entity_map: BTreeMap<EntityType, String>,
    saver: SaveCoordinator,
    counters: Counters,
    listeners: Mutex<Vec<Weak<dyn SaveListener>>>,
}

/// Cheap, cloneable handle to an open store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Debug for Store {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("debounce", &self.inner.saver.window())
            .finish()
    }
}

impl Store {
    /// Wraps a freshly opened backing and starts its save timer.
    pub(crate) fn open(name: &str, opened: OpenedStore, debounce: Duration) -> StoreResult<Self> {
        let entity_map = opened.schema.entity_map();

        // Filled once the inner value exists; the timer only holds it weakly.
        let target: Arc<OnceCell<Weak<StoreInner>>> = Arc::new(OnceCell::new());
        let fire_target = Arc::clone(&target);
        let saver = SaveCoordinator::spawn(name, debounce, move || {
            if let Some(inner) = fire_target.get().and_then(Weak::upgrade) {
                Store { inner }.save_deferred();
            }
        })
        .map_err(|err| StoreError::StoreCreateFailed {
            store: name.to_string(),
            source: err.into(),
        })?;

        let inner = Arc::new(StoreInner {
            name: name.to_string(),
            context: Mutex::new(StoreContext::new(opened.connection)),
            entity_map,
            saver,
            counters: Counters::default(),
            listeners: Mutex::new(Vec::new()),
        });
        let _ = target.set(Arc::downgrade(&inner));
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Entity types this store's schema declares, in name order.
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.inner.entity_map.keys().cloned().collect()
    }

    /// Collection holding objects of `entity_type`.
    pub fn collection_for(&self, entity_type: &EntityType) -> StoreResult<&str> {
        self.inner
            .entity_map
            .get(entity_type)
            .map(String::as_str)
            .ok_or_else(|| StoreError::UnknownEntity(entity_type.to_string()))
    }

    pub fn debounce_window(&self) -> Duration {
        self.inner.saver.window()
    }

    pub fn save_state(&self) -> SaveState {
        self.inner.saver.state()
    }

    pub fn stats(&self) -> SaveStats {
        let counters = &self.inner.counters;
        SaveStats {
            flushes: counters.flushes.load(Ordering::SeqCst),
            commits: counters.commits.load(Ordering::SeqCst),
            failures: counters.failures.load(Ordering::SeqCst),
        }
    }

    /// True when two handles refer to the same open store.
    pub fn same_store(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether staged changes are waiting for a save.
    pub fn has_changes(&self) -> StoreResult<bool> {
        self.read(Operation::Save, |ctx| Ok(ctx.has_changes()))
    }

    /// Visible object count per declared entity type.
    pub fn collection_counts(&self) -> StoreResult<Vec<(EntityType, usize)>> {
        self.read(Operation::Select, |ctx| {
            self.inner
                .entity_map
                .iter()
                .map(|(entity_type, collection)| {
                    let count = ctx
                        .count(collection)
                        .map_err(|err| StoreError::classify(err, Some(Operation::Select)))?;
                    Ok((entity_type.clone(), count))
                })
                .collect()
        })
    }

    /// Saves staged changes now, superseding any pending deferred save.
    ///
    /// Returns whether anything was written.
    pub fn save_now(&self) -> StoreResult<bool> {
        let committed = {
            let mut ctx = self.lock_context(Operation::Save)?;
            self.inner
                .saver
                .save_now(|| self.save_locked(&mut ctx, SaveMode::Immediate))?
        };
        if committed {
            self.notify_listeners();
        }
        Ok(committed)
    }

    /// Forces an immediate save in response to a process lifecycle change.
    pub fn handle_lifecycle(&self, event: LifecycleEvent) -> StoreResult<bool> {
        info!(
            "event=lifecycle_flush module=store status=start store={} trigger={}",
            self.inner.name,
            event.as_str()
        );
        let result = self.save_now();
        match &result {
            Ok(committed) => info!(
                "event=lifecycle_flush module=store status=ok store={} trigger={} committed={}",
                self.inner.name,
                event.as_str(),
                committed
            ),
            Err(err) => error!(
                "event=lifecycle_flush module=store status=error store={} trigger={} error_code={} error={}",
                self.inner.name,
                event.as_str(),
                err.code(),
                err
            ),
        }
        result
    }

    /// Registers a listener; it is dropped once the listener is gone.
    pub fn add_listener(&self, listener: Weak<dyn SaveListener>) {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|existing| existing.strong_count() > 0);
        listeners.push(listener);
    }

    /// Runs `f` under the store lock without touching save timing.
    pub(crate) fn read<R>(
        &self,
        op: Operation,
        f: impl FnOnce(&StoreContext) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let ctx = self.lock_context(op)?;
        f(&ctx)
    }

    /// Runs a mutation under the store lock, bracketed by timer cancel and
    /// re-arm.
    pub(crate) fn mutate<R>(
        &self,
        op: Operation,
        f: impl FnOnce(&mut StoreContext) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut ctx = self.lock_context(op)?;
        self.inner.saver.cancel();
        let result = f(&mut ctx);
        if !self.inner.saver.fire_pending() {
            self.inner.saver.schedule();
        }
        drop(ctx);
        result
    }

    /// Saves staged changes immediately, then runs a batch operation in the
    /// same critical section. `f` returns the number of affected rows.
    pub(crate) fn bulk(
        &self,
        op: Operation,
        f: impl FnOnce(&mut StoreContext) -> StoreResult<usize>,
    ) -> StoreResult<usize> {
        let (committed, result) = {
            let mut ctx = self.lock_context(op)?;
            let committed = self
                .inner
                .saver
                .save_now(|| self.save_locked(&mut ctx, SaveMode::Immediate))?;
            (committed, f(&mut ctx))
        };

        match &result {
            Ok(affected) => info!(
                "event={} module=store status=ok store={} affected={}",
                op.name(),
                self.inner.name,
                affected
            ),
            Err(err) => error!(
                "event={} module=store status=error store={} error_code={} error={}",
                op.name(),
                self.inner.name,
                err.code(),
                err
            ),
        }

        let affected = result.as_ref().copied().unwrap_or(0);
        if committed || affected > 0 {
            self.notify_listeners();
        }
        result
    }

    fn lock_context(&self, op: Operation) -> StoreResult<MutexGuard<'_, StoreContext>> {
        self.inner
            .context
            .lock()
            .map_err(|err| StoreError::classify(err, Some(op)))
    }

    fn save_locked(&self, ctx: &mut StoreContext, mode: SaveMode) -> StoreResult<bool> {
        let counters = &self.inner.counters;
        let started_at = Instant::now();
        let pending = ctx.pending_count();
        counters.flushes.fetch_add(1, Ordering::SeqCst);

        match ctx.save() {
            Ok(true) => {
                counters.commits.fetch_add(1, Ordering::SeqCst);
                info!(
                    "event=store_save module=store status=ok store={} mode={} changes={} duration_ms={}",
                    self.inner.name,
                    mode.as_str(),
                    pending,
                    started_at.elapsed().as_millis()
                );
                Ok(true)
            }
            Ok(false) => {
                debug!(
                    "event=store_save module=store status=skip store={} mode={} reason=no_changes",
                    self.inner.name,
                    mode.as_str()
                );
                Ok(false)
            }
            Err(fault) => {
                counters.failures.fetch_add(1, Ordering::SeqCst);
                error!(
                    "event=store_save module=store status=error store={} mode={} changes={} error_code={} error={}",
                    self.inner.name,
                    mode.as_str(),
                    pending,
                    fault.code(),
                    fault
                );
                Err(StoreError::classify(fault, Some(Operation::Save)))
            }
        }
    }

    // Timer path. Errors stop here.
    fn save_deferred(&self) {
        let committed = match self.lock_context(Operation::Save) {
            Ok(mut ctx) => {
                self.inner.saver.claim_fire();
                self.save_locked(&mut ctx, SaveMode::Deferred)
            }
            Err(err) => {
                error!(
                    "event=store_save module=store status=error store={} mode=deferred error_code={} error={}",
                    self.inner.name,
                    err.code(),
                    err
                );
                return;
            }
        };
        if let Ok(true) = committed {
            self.notify_listeners();
        }
    }

    fn notify_listeners(&self) {
        let live: Vec<Arc<dyn SaveListener>> = {
            let mut listeners = self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        if live.is_empty() {
            return;
        }

        debug!(
            "event=listener_notify module=store status=start store={} listeners={}",
            self.inner.name,
            live.len()
        );
        for listener in live {
            listener.store_changed(self);
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let pending = self
            .context
            .get_mut()
            .map(|ctx| ctx.pending_count())
            .unwrap_or(0);
        if pending > 0 {
            warn!(
                "event=store_close module=store status=unsaved store={} changes={}",
                self.name, pending
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SaveListener, Store};
    use crate::error::{Operation, StoreError};
    use crate::lifecycle::LifecycleEvent;
    use crate::model::entity::EntityType;
    use crate::model::schema::{EntitySchema, StoreSchema};
    use crate::store::bootstrap::{InMemoryBootstrap, StoreBootstrap};
    use crate::store::saver::SaveState;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn open_store(window: Duration) -> Store {
        let opened = InMemoryBootstrap::new()
            .with_schema(
                "main",
                StoreSchema::new([EntitySchema::new("Person", "people")]),
            )
            .open_or_create("main")
            .expect("bootstrap should succeed");
        Store::open("main", opened, window).expect("store should open")
    }

    fn stage_person(store: &Store, age: i64) {
        store
            .mutate(Operation::Insert, |ctx| {
                Ok(ctx.stage_insert("people", json!({ "age": age })))
            })
            .expect("insert should stage");
    }

    #[derive(Default)]
    struct CountingListener {
        calls: AtomicUsize,
    }

    impl SaveListener for CountingListener {
        fn store_changed(&self, _store: &Store) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn mutation_arms_a_deferred_save_that_commits() {
        let store = open_store(Duration::from_millis(50));
        stage_person(&store, 30);
        assert!(matches!(store.save_state(), SaveState::Scheduled(_)));
        assert!(store.has_changes().expect("lock should be healthy"));

        thread::sleep(Duration::from_millis(300));
        assert!(!store.has_changes().expect("lock should be healthy"));
        let stats = store.stats();
        assert_eq!((stats.flushes, stats.commits, stats.failures), (1, 1, 0));
    }

    #[test]
    fn failed_mutation_still_rearms_the_timer() {
        let store = open_store(Duration::from_secs(60));
        let result: Result<(), StoreError> = store.mutate(Operation::Update, |_| {
            Err(StoreError::UnknownEntity("Ghost".to_string()))
        });
        assert!(result.is_err());
        assert!(matches!(store.save_state(), SaveState::Scheduled(_)));
    }

    #[test]
    fn mutation_during_a_waiting_fire_does_not_add_an_empty_save() {
        let store = open_store(Duration::from_millis(30));
        store
            .mutate(Operation::Insert, |ctx| {
                ctx.stage_insert("people", json!({ "age": 5 }));
                store.inner.saver.schedule();
                // the fire comes due and blocks on the lock we hold
                thread::sleep(Duration::from_millis(150));
                assert!(store.inner.saver.fire_pending());
                Ok(())
            })
            .expect("insert should stage");

        thread::sleep(Duration::from_millis(300));
        let stats = store.stats();
        assert_eq!((stats.flushes, stats.commits), (1, 1));
        assert_eq!(store.save_state(), SaveState::Idle);
        assert!(!store.has_changes().expect("lock should be healthy"));
    }

    #[test]
    fn save_now_cancels_pending_timer_and_reports_commit() {
        let store = open_store(Duration::from_secs(60));
        stage_person(&store, 41);

        assert!(store.save_now().expect("save should succeed"));
        assert_eq!(store.save_state(), SaveState::Idle);
        assert!(!store.save_now().expect("empty save should succeed"));
        assert_eq!(store.stats().flushes, 2);
        assert_eq!(store.stats().commits, 1);
    }

    #[test]
    fn lifecycle_event_flushes_synchronously() {
        let store = open_store(Duration::from_secs(60));
        stage_person(&store, 7);

        let committed = store
            .handle_lifecycle(LifecycleEvent::EnteredBackground)
            .expect("flush should succeed");
        assert!(committed);
        assert!(!store.has_changes().expect("lock should be healthy"));
    }

    #[test]
    fn listeners_hear_commits_and_are_dropped_with_their_owner() {
        let store = open_store(Duration::from_secs(60));
        let listener = Arc::new(CountingListener::default());
        let shared: Arc<dyn SaveListener> = listener.clone();
        store.add_listener(Arc::downgrade(&shared));
        drop(shared);

        stage_person(&store, 1);
        store.save_now().expect("save should succeed");
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

        drop(listener);
        stage_person(&store, 2);
        store.save_now().expect("save should succeed");
    }

    #[test]
    fn resolves_collections_and_counts() {
        let store = open_store(Duration::from_secs(60));
        stage_person(&store, 1);
        stage_person(&store, 2);

        let person = EntityType::of("Person");
        assert_eq!(store.collection_for(&person).expect("known type"), "people");
        assert!(matches!(
            store.collection_for(&EntityType::of("Pet")),
            Err(StoreError::UnknownEntity(name)) if name == "Pet"
        ));
        assert_eq!(
            store.collection_counts().expect("counts should load"),
            vec![(person, 2)]
        );
    }
}
