//! Store access layer.
//!
//! # Responsibility
//! - Bootstrap named stores and keep one handle per name.
//! - Serialize access per store and coordinate its saves.
//!
//! # Invariants
//! - At most one `Store` exists per name within a registry.
//! - Entity types resolve to exactly one owning store.

pub mod bootstrap;
pub mod context;
mod handle;
pub mod registry;
pub mod saver;

pub use bootstrap::{InMemoryBootstrap, OpenedStore, SqliteBootstrap, StoreBootstrap};
pub use handle::{SaveListener, SaveStats, Store};
pub use registry::StoreRegistry;
pub use saver::{SaveMode, SaveState};
