//! Store bootstrap: schema loading and backing creation.
//!
//! # Responsibility
//! - Turn a store name into an open connection plus validated schema.
//! - Map bootstrap failures onto `MissingSchema`, `ModelInitFailed` and
//!   `StoreCreateFailed`.
//!
//! # Invariants
//! - The registry calls `open_or_create` at most once per successful store.
//! - Schemas are validated before any connection is opened.

use crate::db::{open_db, open_db_in_memory};
use crate::error::{Fault, StoreError, StoreResult};
use crate::model::schema::StoreSchema;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SCHEMA_FILE_SUFFIX: &str = ".schema.json";
const DATA_FILE_SUFFIX: &str = ".sqlite";

/// What a bootstrap hands back for one store.
pub struct OpenedStore {
    pub connection: Connection,
    pub schema: StoreSchema,
}

/// Opens or creates the persistent backing of a named store.
pub trait StoreBootstrap: Send + Sync {
    fn open_or_create(&self, name: &str) -> StoreResult<OpenedStore>;
}

/// Reads `<schema_dir>/<name>.schema.json` and opens
/// `<data_dir>/<name>.sqlite`, or an in-memory database when no data
/// directory is configured.
#[derive(Debug, Clone)]
pub struct SqliteBootstrap {
    schema_dir: PathBuf,
    data_dir: Option<PathBuf>,
}

impl SqliteBootstrap {
    pub fn new(schema_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
            data_dir: Some(data_dir.into()),
        }
    }

    pub fn in_memory(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
            data_dir: None,
        }
    }

    pub fn schema_path(&self, name: &str) -> PathBuf {
        self.schema_dir.join(format!("{name}{SCHEMA_FILE_SUFFIX}"))
    }

    pub fn data_path(&self, name: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{name}{DATA_FILE_SUFFIX}")))
    }

    /// Store names with a schema file in the schema directory, sorted.
    pub fn discover(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.schema_dir)? {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(SCHEMA_FILE_SUFFIX) {
                if validate_store_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn load_schema(&self, name: &str) -> StoreResult<StoreSchema> {
        let path = self.schema_path(name);
        if !path.is_file() {
            return Err(StoreError::MissingSchema(name.to_string()));
        }

        let text = std::fs::read_to_string(&path).map_err(|err| StoreError::ModelInitFailed {
            store: name.to_string(),
            reason: format!("cannot read `{}`: {err}", path.display()),
        })?;
        parse_schema(name, &text)
    }

    fn open_backing(&self, name: &str) -> StoreResult<Connection> {
        let create_failed = |source: Fault| StoreError::StoreCreateFailed {
            store: name.to_string(),
            source,
        };

        match (&self.data_dir, self.data_path(name)) {
            (Some(dir), Some(path)) => {
                std::fs::create_dir_all(dir).map_err(|err| create_failed(err.into()))?;
                open_db(&path).map_err(|err| create_failed(err.into()))
            }
            _ => open_db_in_memory().map_err(|err| create_failed(err.into())),
        }
    }
}

impl StoreBootstrap for SqliteBootstrap {
    fn open_or_create(&self, name: &str) -> StoreResult<OpenedStore> {
        validate_store_name(name)?;
        let schema = self.load_schema(name)?;
        let connection = self.open_backing(name)?;
        Ok(OpenedStore { connection, schema })
    }
}

/// Schemas supplied in code, each store backed by its own in-memory
/// database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBootstrap {
    schemas: BTreeMap<String, StoreSchema>,
}

impl InMemoryBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: StoreSchema) -> Self {
        self.schemas.insert(name.into(), schema);
        self
    }
}

impl StoreBootstrap for InMemoryBootstrap {
    fn open_or_create(&self, name: &str) -> StoreResult<OpenedStore> {
        let schema = self
            .schemas
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::MissingSchema(name.to_string()))?;
        schema
            .validate()
            .map_err(|err| StoreError::ModelInitFailed {
                store: name.to_string(),
                reason: err.to_string(),
            })?;

        let connection = open_db_in_memory().map_err(|err| StoreError::StoreCreateFailed {
            store: name.to_string(),
            source: err.into(),
        })?;
        Ok(OpenedStore { connection, schema })
    }
}

fn parse_schema(name: &str, text: &str) -> StoreResult<StoreSchema> {
    let model_failed = |reason: String| StoreError::ModelInitFailed {
        store: name.to_string(),
        reason,
    };
    let schema = StoreSchema::from_json(text).map_err(|err| model_failed(err.to_string()))?;
    schema
        .validate()
        .map_err(|err| model_failed(err.to_string()))?;
    Ok(schema)
}

// Store names become file names; keep them to one path component.
fn validate_store_name(name: &str) -> StoreResult<()> {
    let component_ok = !name.trim().is_empty()
        && Path::new(name).components().count() == 1
        && !name.contains(['/', '\\'])
        && name != "."
        && name != "..";
    if component_ok {
        return Ok(());
    }
    Err(StoreError::MissingSchema(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{InMemoryBootstrap, SqliteBootstrap, StoreBootstrap};
    use crate::error::StoreError;
    use crate::model::schema::{EntitySchema, StoreSchema};

    fn write_schema(dir: &std::path::Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{name}.schema.json")), body)
            .expect("schema fixture should be written");
    }

    #[test]
    fn opens_file_store_and_creates_data_dir() {
        let schemas = tempfile::tempdir().expect("tempdir");
        let data = tempfile::tempdir().expect("tempdir");
        let data_dir = data.path().join("nested");
        write_schema(
            schemas.path(),
            "main",
            r#"{ "entities": [ { "type_name": "Person", "collection": "people" } ] }"#,
        );

        write_schema(schemas.path(), "journal", r#"{ "entities": [ { "type_name": "Entry" } ] }"#);
        std::fs::write(schemas.path().join("notes.txt"), "ignored").expect("stray file");

        let bootstrap = SqliteBootstrap::new(schemas.path(), &data_dir);
        assert_eq!(
            bootstrap.discover().expect("schema dir should list"),
            vec!["journal".to_string(), "main".to_string()]
        );
        let opened = bootstrap.open_or_create("main").expect("store should open");
        assert_eq!(opened.schema.entities.len(), 1);
        assert!(data_dir.join("main.sqlite").is_file());
    }

    #[test]
    fn maps_bootstrap_failures_onto_taxonomy() {
        let schemas = tempfile::tempdir().expect("tempdir");
        let bootstrap = SqliteBootstrap::in_memory(schemas.path());

        let missing = bootstrap.open_or_create("absent").err().expect("must fail");
        assert!(matches!(missing, StoreError::MissingSchema(name) if name == "absent"));

        write_schema(schemas.path(), "broken", "{ not json");
        let broken = bootstrap.open_or_create("broken").err().expect("must fail");
        assert!(matches!(broken, StoreError::ModelInitFailed { .. }));

        write_schema(schemas.path(), "empty", r#"{ "entities": [] }"#);
        let empty = bootstrap.open_or_create("empty").err().expect("must fail");
        assert!(matches!(empty, StoreError::ModelInitFailed { .. }));

        let escape = bootstrap.open_or_create("../main").err().expect("must fail");
        assert!(matches!(escape, StoreError::MissingSchema(_)));
    }

    #[test]
    fn unwritable_data_dir_fails_store_creation() {
        let schemas = tempfile::tempdir().expect("tempdir");
        write_schema(
            schemas.path(),
            "main",
            r#"{ "entities": [ { "type_name": "Person" } ] }"#,
        );
        let blocker = schemas.path().join("occupied");
        std::fs::write(&blocker, "file, not a directory").expect("blocker file");

        let bootstrap = SqliteBootstrap::new(schemas.path(), &blocker);
        let err = bootstrap.open_or_create("main").err().expect("must fail");
        assert!(matches!(err, StoreError::StoreCreateFailed { .. }));
    }

    #[test]
    fn in_memory_bootstrap_validates_supplied_schemas() {
        let bootstrap = InMemoryBootstrap::new()
            .with_schema("main", StoreSchema::new([EntitySchema::new("Person", "people")]))
            .with_schema("bad", StoreSchema::default());

        assert!(bootstrap.open_or_create("main").is_ok());
        assert!(matches!(
            bootstrap.open_or_create("bad").err(),
            Some(StoreError::ModelInitFailed { .. })
        ));
        assert!(matches!(
            bootstrap.open_or_create("other").err(),
            Some(StoreError::MissingSchema(_))
        ));
    }
}
