//! Store registry.
//!
//! # Responsibility
//! - Construct each named store at most once and hand out shared handles.
//! - Map entity types to the store that declares them.
//! - Fan lifecycle signals out to every open store.
//!
//! # Invariants
//! - Construction runs under the registry's init lock, so concurrent first
//!   requests for one name produce a single store.
//! - Failed constructions are not cached; the next request retries.
//! - The first store to declare an entity type owns it.

use crate::config::{LodestoreConfig, SaveSettings};
use crate::error::{StoreError, StoreResult};
use crate::lifecycle::LifecycleEvent;
use crate::model::entity::{Entity, EntityType};
use crate::service::entity_service::EntityService;
use crate::store::bootstrap::StoreBootstrap;
use crate::store::handle::Store;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

/// Process-wide table of open stores.
pub struct StoreRegistry {
    bootstrap: Arc<dyn StoreBootstrap>,
    settings: SaveSettings,
    stores: Mutex<HashMap<String, Store>>,
    owners: RwLock<HashMap<EntityType, String>>,
}

impl StoreRegistry {
    pub fn new(bootstrap: impl StoreBootstrap + 'static) -> Self {
        Self::with_settings(bootstrap, SaveSettings::default())
    }

    pub fn with_settings(bootstrap: impl StoreBootstrap + 'static, settings: SaveSettings) -> Self {
        Self {
            bootstrap: Arc::new(bootstrap),
            settings,
            stores: Mutex::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Registry over the file-backed stores a config describes.
    pub fn from_config(config: &LodestoreConfig) -> Self {
        Self::with_settings(config.bootstrap(), config.save_settings())
    }

    /// Returns the store named `name`, constructing it on first use.
    ///
    /// # Errors
    /// - `MissingSchema`, `ModelInitFailed` or `StoreCreateFailed` when
    ///   bootstrap fails.
    pub fn store(&self, name: &str) -> StoreResult<Store> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|err| StoreError::classify(err, None))?;
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }

        let started_at = Instant::now();
        info!("event=store_open module=registry status=start store={name}");
        let store = match self.construct(name) {
            Ok(store) => store,
            Err(err) => {
                error!(
                    "event=store_open module=registry status=error store={} error_code={} error={}",
                    name,
                    err.code(),
                    err
                );
                return Err(err);
            }
        };

        stores.insert(name.to_string(), store.clone());
        info!(
            "event=store_open module=registry status=ok store={} entities={} debounce_ms={} duration_ms={}",
            name,
            store.entity_types().len(),
            store.debounce_window().as_millis(),
            started_at.elapsed().as_millis()
        );
        Ok(store)
    }

    /// Store owning `T`.
    ///
    /// # Errors
    /// - `Unregistered` until some store declaring `T` has been opened.
    pub fn store_for<T: Entity>(&self) -> StoreResult<Store> {
        self.store_for_type(&T::entity_type())
    }

    pub fn store_for_type(&self, entity_type: &EntityType) -> StoreResult<Store> {
        let owner = self
            .owner_of(entity_type)
            .ok_or_else(|| StoreError::Unregistered(entity_type.clone()))?;
        self.store(&owner)
    }

    /// Name of the store that owns `entity_type`, if any is open.
    pub fn owner_of(&self, entity_type: &EntityType) -> Option<String> {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned()
    }

    /// Typed operations façade for `T`.
    pub fn entity<T: Entity>(&self) -> StoreResult<EntityService<T>> {
        Ok(EntityService::new(self.store_for::<T>()?))
    }

    /// Names of the stores opened so far, sorted.
    pub fn store_names(&self) -> Vec<String> {
        let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Forwards `event` to every open store.
    ///
    /// Every store is flushed even when an earlier one fails; the first
    /// failure is returned. On success returns how many stores committed.
    pub fn notify(&self, event: LifecycleEvent) -> StoreResult<usize> {
        let stores: Vec<Store> = {
            let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
            stores.values().cloned().collect()
        };

        let mut committed = 0;
        let mut first_error = None;
        for store in stores {
            match store.handle_lifecycle(event) {
                Ok(true) => committed += 1,
                Ok(false) => {}
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(committed),
        }
    }

    /// Flushes every open store as if the process were terminating.
    pub fn shutdown(&self) -> StoreResult<usize> {
        self.notify(LifecycleEvent::WillTerminate)
    }

    fn construct(&self, name: &str) -> StoreResult<Store> {
        let opened = self.bootstrap.open_or_create(name)?;
        let store = Store::open(name, opened, self.settings.debounce_for(name))?;
        self.register_entities(&store);
        Ok(store)
    }

    fn register_entities(&self, store: &Store) {
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        for entity_type in store.entity_types() {
            let owner = owners
                .entry(entity_type.clone())
                .or_insert_with(|| store.name().to_string());
            if owner != store.name() {
                warn!(
                    "event=entity_register module=registry status=conflict entity={} owner={} ignored={}",
                    entity_type,
                    owner,
                    store.name()
                );
            }
        }
    }
}
