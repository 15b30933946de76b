//! Live result sets.
//!
//! # Responsibility
//! - Hold the latest sectioned results of one fetch request.
//! - Refetch after the owning store commits, and tell the observer.
//!
//! # Invariants
//! - Sections follow result order; consecutive objects sharing a section
//!   value form one section.
//! - The observer is called without any store or result lock held.

use crate::error::{Operation, StoreResult};
use crate::model::entity::Entity;
use crate::query::predicate::lookup_path;
use crate::query::FetchPlan;
use crate::service::entity_service::{decode, EntityService};
use crate::store::{SaveListener, Store};
use log::warn;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One run of results sharing a section value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSection<T> {
    /// `None` when results are unsectioned or the key path is null.
    pub name: Option<String>,
    pub objects: Vec<T>,
}

/// Receives refreshed sections after each fetch.
pub trait ResultsObserver<T>: Send + Sync {
    fn results_changed(&self, sections: &[ResultSection<T>]);
}

/// Result set bound to a store; see [`EntityService::live`].
pub struct LiveResults<T: Entity> {
    service: EntityService<T>,
    plan: FetchPlan,
    section_key: Option<String>,
    observer: Arc<dyn ResultsObserver<T>>,
    sections: Mutex<Vec<ResultSection<T>>>,
}

impl<T: Entity> LiveResults<T> {
    pub(crate) fn new(
        service: EntityService<T>,
        plan: FetchPlan,
        section_key: Option<String>,
        observer: Arc<dyn ResultsObserver<T>>,
    ) -> Self {
        Self {
            service,
            plan,
            section_key,
            observer,
            sections: Mutex::new(Vec::new()),
        }
    }

    pub fn section_key(&self) -> Option<&str> {
        self.section_key.as_deref()
    }

    /// Runs the fetch, replaces the held sections and notifies the
    /// observer. Returns the total object count.
    pub fn perform_fetch(&self) -> StoreResult<usize> {
        let bodies = self.service.fetch_bodies(&self.plan, Operation::Select)?;
        let total = bodies.len();
        let sections = self.sectioned(bodies)?;

        self.observer.results_changed(&sections);
        *self.lock_sections() = sections;
        Ok(total)
    }

    /// Number of objects across all sections.
    pub fn object_count(&self) -> usize {
        self.lock_sections()
            .iter()
            .map(|section| section.objects.len())
            .sum()
    }

    pub fn section_count(&self) -> usize {
        self.lock_sections().len()
    }

    /// Snapshot of the held sections.
    pub fn sections(&self) -> Vec<ResultSection<T>>
    where
        T: Clone,
    {
        self.lock_sections().clone()
    }

    fn sectioned(&self, bodies: Vec<Value>) -> StoreResult<Vec<ResultSection<T>>> {
        let mut sections: Vec<ResultSection<T>> = Vec::new();
        for body in bodies {
            let name = self
                .section_key
                .as_deref()
                .and_then(|key| section_name(lookup_path(&body, key)));
            let object: T = decode(body, Operation::Select)?;

            match sections.last_mut() {
                Some(section) if section.name == name => section.objects.push(object),
                _ => sections.push(ResultSection {
                    name,
                    objects: vec![object],
                }),
            }
        }
        Ok(sections)
    }

    // Sections are replaced wholesale, so a poisoned guard still holds a
    // complete value.
    fn lock_sections(&self) -> MutexGuard<'_, Vec<ResultSection<T>>> {
        self.sections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Entity> SaveListener for LiveResults<T> {
    fn store_changed(&self, store: &Store) {
        if let Err(err) = self.perform_fetch() {
            warn!(
                "event=live_refresh module=service status=error store={} entity={} error_code={} error={}",
                store.name(),
                T::TYPE_NAME,
                err.code(),
                err
            );
        }
    }
}

fn section_name(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
