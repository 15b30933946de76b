//! Query construction for fetches and batch operations.
//!
//! # Responsibility
//! - Carry caller fetch parameters through the store untouched.
//! - Compile them into an executable plan at execution time.
//!
//! # Invariants
//! - A blank filter matches every object.
//! - Pipeline order is filter, sort, group, range.

use thiserror::Error;

pub mod fetch;
pub mod predicate;
pub mod updates;

pub use fetch::{FetchPlan, FetchRange, FetchRequest, SortDescriptor, SortOrder};
pub use predicate::Predicate;
pub use updates::FieldUpdates;

/// Failures compiling a fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid filter `{filter}` at offset {offset}: {message}")]
    Syntax {
        filter: String,
        offset: usize,
        message: String,
    },
    #[error("invalid MATCHES pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
    #[error("{role} key cannot be blank")]
    BlankKey { role: &'static str },
}
