//! Error taxonomy and failure classification.
//!
//! # Responsibility
//! - Expose a small typed taxonomy to callers (`StoreError`).
//! - Wrap raw backing failures (`Fault`) with the phase that produced them.
//!
//! # Invariants
//! - `OperationFailed` always keeps the original fault as its source.
//! - Already-classified errors are never wrapped a second time.

use crate::db::DbError;
use crate::model::entity::EntityType;
use crate::query::QueryError;
use std::fmt::{Display, Formatter};
use std::sync::PoisonError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Phase label attached to operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    BatchUpdate,
    BatchDelete,
    Save,
}

impl Operation {
    /// Human-readable prefix used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Select => "select error",
            Self::Insert => "insert error",
            Self::Update => "update error",
            Self::Delete => "delete error",
            Self::BatchUpdate => "batchUpdate error",
            Self::BatchDelete => "batchDelete error",
            Self::Save => "save error",
        }
    }

    /// Stable name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::BatchUpdate => "batch_update",
            Self::BatchDelete => "batch_delete",
            Self::Save => "save",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw failure raised by the backing store or its helpers.
#[derive(Debug, Error)]
pub enum Fault {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("invalid stored object: {0}")]
    InvalidData(String),
    #[error("lock poisoned: {0}")]
    Poisoned(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Fault {
    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(DbError::Sqlite(_)) => "sqlite",
            Self::Db(DbError::UnsupportedSchemaVersion { .. }) => "unsupported_schema_version",
            Self::Serialization(_) => "serialization",
            Self::Query(_) => "query",
            Self::InvalidData(_) => "invalid_data",
            Self::Poisoned(_) => "lock_poisoned",
            Self::Io(_) => "io",
        }
    }
}

impl From<rusqlite::Error> for Fault {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl<T> From<PoisonError<T>> for Fault {
    fn from(value: PoisonError<T>) -> Self {
        Self::Poisoned(value.to_string())
    }
}

/// Public error taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity type `{0}` is not registered with any store; open its store by name first")]
    Unregistered(EntityType),
    #[error("unknown entity: `{0}`")]
    UnknownEntity(String),
    #[error("missing schema for store `{0}`")]
    MissingSchema(String),
    #[error("cannot initialize model for store `{store}`: {reason}")]
    ModelInitFailed { store: String, reason: String },
    #[error("cannot create store `{store}`: {source}")]
    StoreCreateFailed {
        store: String,
        #[source]
        source: Fault,
    },
    #[error("{}", describe_failure(.context, .source))]
    OperationFailed {
        context: Option<Operation>,
        #[source]
        source: Fault,
    },
}

impl StoreError {
    /// Wraps a raw fault, optionally prefixing the phase that failed.
    pub fn classify(fault: impl Into<Fault>, context: Option<Operation>) -> Self {
        Self::OperationFailed {
            context,
            source: fault.into(),
        }
    }

    /// Stable numeric code per taxonomy kind.
    pub fn code(&self) -> u16 {
        match self {
            Self::Unregistered(_) => 400,
            Self::UnknownEntity(_) => 401,
            Self::MissingSchema(_) => 402,
            Self::ModelInitFailed { .. } => 403,
            Self::StoreCreateFailed { .. } => 404,
            Self::OperationFailed { .. } => 500,
        }
    }

    /// Phase label for operation failures.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Self::OperationFailed { context, .. } => *context,
            _ => None,
        }
    }

    /// Underlying fault, when one exists.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::StoreCreateFailed { source, .. } | Self::OperationFailed { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

fn describe_failure(context: &Option<Operation>, source: &Fault) -> String {
    match context {
        Some(operation) => format!("{}: {source}", operation.label()),
        None => source.to_string(),
    }
}

/// Attaches an operation label to raw faults.
pub trait FaultExt<T> {
    fn in_op(self, operation: Operation) -> StoreResult<T>;
}

impl<T, E> FaultExt<T> for Result<T, E>
where
    E: Into<Fault>,
{
    fn in_op(self, operation: Operation) -> StoreResult<T> {
        self.map_err(|err| StoreError::classify(err, Some(operation)))
    }
}

#[cfg(test)]
mod tests {
    use super::{Fault, FaultExt, Operation, StoreError};
    use crate::model::entity::EntityType;
    use crate::query::QueryError;
    use std::error::Error;

    #[test]
    fn operation_failures_are_prefixed_and_keep_their_cause() {
        let err = Err::<(), _>(Fault::InvalidData("body is not an object".to_string()))
            .in_op(Operation::Insert)
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "insert error: invalid stored object: body is not an object"
        );
        assert_eq!(err.operation(), Some(Operation::Insert));
        assert_eq!(err.code(), 500);
        let source = err.source().expect("cause should be retained");
        assert_eq!(source.to_string(), "invalid stored object: body is not an object");
    }

    #[test]
    fn classification_without_context_keeps_plain_message() {
        let err = StoreError::classify(
            QueryError::BlankKey { role: "sort" },
            None,
        );
        assert_eq!(err.to_string(), "sort key cannot be blank");
        assert!(matches!(err.fault(), Some(Fault::Query(_))));
    }

    #[test]
    fn batch_labels_name_their_own_phase() {
        assert_eq!(Operation::BatchUpdate.label(), "batchUpdate error");
        assert_eq!(Operation::BatchDelete.label(), "batchDelete error");
        assert_eq!(Operation::Save.to_string(), "save error");
    }

    #[test]
    fn taxonomy_codes_are_stable() {
        assert_eq!(StoreError::Unregistered(EntityType::of("Person")).code(), 400);
        assert_eq!(StoreError::UnknownEntity("Person".to_string()).code(), 401);
        assert_eq!(StoreError::MissingSchema("main".to_string()).code(), 402);
        assert_eq!(
            StoreError::ModelInitFailed {
                store: "main".to_string(),
                reason: "empty".to_string(),
            }
            .code(),
            403
        );
    }

    #[test]
    fn poisoned_locks_become_faults() {
        let lock = std::sync::Mutex::new(0);
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.lock().unwrap();
            panic!("poison the lock");
        });
        let fault: Fault = lock.lock().unwrap_err().into();
        assert_eq!(fault.code(), "lock_poisoned");
    }
}
