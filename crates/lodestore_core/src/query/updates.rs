//! Field/value accumulator for batch updates.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Top-level field assignments applied by a batch update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdates {
    fields: BTreeMap<String, Value>,
}

impl FieldUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` to `key`, replacing any earlier assignment.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub(crate) fn apply_to(&self, object: &mut Map<String, Value>) {
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FieldUpdates;
    use serde_json::json;

    #[test]
    fn later_assignments_replace_earlier_ones() {
        let mut updates = FieldUpdates::new();
        updates.set("age", 1).set("name", "Ada").set("age", 2);

        assert_eq!(updates.len(), 2);
        assert_eq!(updates.get("age"), Some(&json!(2)));

        let mut object = json!({ "age": 0, "city": "Oslo" });
        updates.apply_to(object.as_object_mut().expect("fixture is an object"));
        assert_eq!(object, json!({ "age": 2, "city": "Oslo", "name": "Ada" }));
    }
}
