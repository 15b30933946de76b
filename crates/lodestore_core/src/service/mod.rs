//! Caller-facing services.
//!
//! # Responsibility
//! - Expose typed entity operations over registry-managed stores.
//! - Keep callers decoupled from store locking and save timing.

pub mod entity_service;
pub mod live_results;

pub use entity_service::EntityService;
pub use live_results::{LiveResults, ResultSection, ResultsObserver};
