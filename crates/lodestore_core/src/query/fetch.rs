//! Fetch requests and their compiled plans.

use crate::query::predicate::{compare_scalars, lookup_path, Predicate};
use crate::query::QueryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One sort key; earlier descriptors take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub key: String,
    pub order: SortOrder,
}

impl SortDescriptor {
    pub fn new(key: impl Into<String>, order: SortOrder) -> Self {
        Self {
            key: key.into(),
            order,
        }
    }

    pub fn asc(key: impl Into<String>) -> Self {
        Self::new(key, SortOrder::Asc)
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self::new(key, SortOrder::Desc)
    }
}

/// Offset/limit window. A zero `limit` disables the window entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRange {
    pub offset: usize,
    pub limit: usize,
}

/// Caller-facing fetch parameters.
///
/// The filter stays a raw string until the request executes, so parse
/// failures are reported by the operation that ran it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub range: Option<FetchRange>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub sorts: Vec<SortDescriptor>,
}

impl FetchRequest {
    /// Matches every object in insertion order.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filtered(filter: impl Into<String>) -> Self {
        Self::default().with_filter(filter)
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_range(mut self, offset: usize, limit: usize) -> Self {
        self.range = Some(FetchRange { offset, limit });
        self
    }

    pub fn with_group_by<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn sorted_by(mut self, key: impl Into<String>, order: SortOrder) -> Self {
        self.sorts.push(SortDescriptor::new(key, order));
        self
    }

    /// Compiles the request into an executable plan.
    pub fn compile(&self) -> Result<FetchPlan, QueryError> {
        if self.sorts.iter().any(|sort| sort.key.trim().is_empty()) {
            return Err(QueryError::BlankKey { role: "sort" });
        }
        if self.group_by.iter().any(|key| key.trim().is_empty()) {
            return Err(QueryError::BlankKey { role: "group_by" });
        }

        Ok(FetchPlan {
            predicate: compile_filter(self.filter.as_deref())?,
            range: self.range.filter(|range| range.limit > 0),
            group_by: self.group_by.clone(),
            sorts: self.sorts.clone(),
        })
    }
}

/// Executable form of a [`FetchRequest`].
#[derive(Debug, Clone, Default)]
pub struct FetchPlan {
    predicate: Option<Predicate>,
    range: Option<FetchRange>,
    group_by: Vec<String>,
    sorts: Vec<SortDescriptor>,
}

impl FetchPlan {
    /// Plan with only a filter, as used by update/delete and batch paths.
    pub fn filter_only(filter: Option<&str>) -> Result<Self, QueryError> {
        Ok(Self {
            predicate: compile_filter(filter)?,
            ..Self::default()
        })
    }

    pub fn matches(&self, object: &Value) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate.evaluate(object))
    }

    /// Runs filter, sort, group and range over `rows`, keeping input order
    /// among equal sort keys.
    pub fn apply<K>(&self, rows: Vec<(K, Value)>) -> Vec<(K, Value)> {
        let mut rows: Vec<(K, Value)> = rows
            .into_iter()
            .filter(|(_, object)| self.matches(object))
            .collect();

        if !self.sorts.is_empty() {
            rows.sort_by(|(_, left), (_, right)| self.compare(left, right));
        }

        if !self.group_by.is_empty() {
            let mut seen = HashSet::new();
            rows.retain(|(_, object)| {
                let group: Vec<String> = self
                    .group_by
                    .iter()
                    .map(|key| lookup_path(object, key).to_string())
                    .collect();
                seen.insert(group)
            });
        }

        match self.range {
            Some(range) => rows
                .into_iter()
                .skip(range.offset)
                .take(range.limit)
                .collect(),
            None => rows,
        }
    }

    fn compare(&self, left: &Value, right: &Value) -> Ordering {
        for sort in &self.sorts {
            let ordering = total_order(lookup_path(left, &sort.key), lookup_path(right, &sort.key));
            let ordering = match sort.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn compile_filter(filter: Option<&str>) -> Result<Option<Predicate>, QueryError> {
    match filter.map(str::trim) {
        Some(text) if !text.is_empty() => Predicate::parse(text).map(Some),
        _ => Ok(None),
    }
}

// null < bool < number < string < array < object
fn total_order(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    rank(left)
        .cmp(&rank(right))
        .then_with(|| compare_scalars(left, right).unwrap_or(Ordering::Equal))
        .then_with(|| left.to_string().cmp(&right.to_string()))
}
