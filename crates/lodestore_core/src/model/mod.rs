//! Entity identity and store schema descriptions.
//!
//! # Responsibility
//! - Define how caller types identify themselves to the registry.
//! - Describe which collections a store schema exposes.
//!
//! # Invariants
//! - Every managed object is identified by a stable `ObjectId`.
//! - An entity type maps to exactly one collection inside one store.

pub mod entity;
pub mod schema;
