//! Concurrency-safe access layer over named persistent object stores.
//!
//! Callers open stores by name through a [`StoreRegistry`], then work with
//! typed entities through [`EntityService`]. Every store serializes access
//! behind one lock and coalesces writes into debounced saves.

pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod query;
pub mod service;
pub mod store;

pub use config::{ConfigError, LodestoreConfig, SaveSettings};
pub use error::{Fault, Operation, StoreError, StoreResult};
pub use lifecycle::LifecycleEvent;
pub use logging::{default_log_level, init_from_config, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityType, ObjectId};
pub use model::schema::{EntitySchema, SchemaError, StoreSchema};
pub use query::{FetchRequest, FieldUpdates, QueryError, SortDescriptor, SortOrder};
pub use service::{EntityService, LiveResults, ResultSection, ResultsObserver};
pub use store::{
    InMemoryBootstrap, SaveListener, SaveStats, SqliteBootstrap, Store, StoreBootstrap,
    StoreRegistry,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
