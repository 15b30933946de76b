//! Typed entity contract.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one managed object inside a store.
pub type ObjectId = Uuid;

/// Typed identifier associating a caller type with its owning store.
///
/// Registered from store schemas at load time and looked up by value, never
/// derived from runtime type names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(Cow<'static, str>);

impl EntityType {
    pub const fn of(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record type managed by a store.
///
/// Entities are persisted as JSON objects, so filters, sorts and batch
/// updates address their serialized field names.
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct Person {
///     name: String,
///     age: i64,
/// }
///
/// impl Entity for Person {
///     const TYPE_NAME: &'static str = "Person";
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + 'static {
    /// Type name as declared in the owning store's schema.
    const TYPE_NAME: &'static str;

    fn entity_type() -> EntityType {
        EntityType::of(Self::TYPE_NAME)
    }
}
