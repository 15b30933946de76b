//! Typed entity operations.
//!
//! # Responsibility
//! - Give callers select/insert/update/delete and batch entry points for
//!   one entity type, routed through its owning store.
//! - Translate between entities and their persisted JSON bodies.
//!
//! # Invariants
//! - Every operation runs inside the store lock.
//! - Insert, update and delete leave a deferred save armed.
//! - Batch operations save staged changes first, in the same critical
//!   section, then act on durable rows.
//! - Failures carry the label of the operation that raised them.

use crate::error::{Fault, FaultExt, Operation, StoreError, StoreResult};
use crate::model::entity::{Entity, ObjectId};
use crate::query::{FetchPlan, FetchRequest, FieldUpdates};
use crate::service::live_results::{LiveResults, ResultsObserver};
use crate::store::{SaveListener, Store};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Operations façade for entity type `T`.
pub struct EntityService<T> {
    store: Store,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityService<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> EntityService<T> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetches entities matching `request`.
    pub fn select(&self, request: &FetchRequest) -> StoreResult<Vec<T>> {
        let plan = request.compile().in_op(Operation::Select)?;
        self.fetch_bodies(&plan, Operation::Select)?
            .into_iter()
            .map(|body| decode(body, Operation::Select))
            .collect()
    }

    /// Runs `mutate` on every entity matching `filter` and stages the
    /// results. Returns how many entities were updated.
    ///
    /// Nothing is staged unless every matching entity decodes and
    /// re-encodes cleanly.
    pub fn update<F>(&self, filter: Option<&str>, mut mutate: F) -> StoreResult<usize>
    where
        F: FnMut(&mut T),
    {
        let collection = self.collection()?;
        let plan = FetchPlan::filter_only(filter).in_op(Operation::Update)?;
        self.store.mutate(Operation::Update, |ctx| {
            let mut staged = Vec::new();
            for (id, body) in ctx.fetch(&collection, &plan).in_op(Operation::Update)? {
                let mut entity: T = decode(body, Operation::Update)?;
                mutate(&mut entity);
                staged.push((id, encode(&entity, Operation::Update)?));
            }

            let updated = staged.len();
            for (id, body) in staged {
                ctx.stage_update(id, &collection, body);
            }
            Ok(updated)
        })
    }

    /// Creates `count` entities, letting `init` fill each one in.
    ///
    /// Returns the new ids in creation order.
    pub fn insert<F>(&self, count: usize, mut init: F) -> StoreResult<Vec<ObjectId>>
    where
        T: Default,
        F: FnMut(usize, &mut T),
    {
        let collection = self.collection()?;
        self.store.mutate(Operation::Insert, |ctx| {
            let mut bodies = Vec::with_capacity(count);
            for index in 0..count {
                let mut entity = T::default();
                init(index, &mut entity);
                bodies.push(encode(&entity, Operation::Insert)?);
            }
            Ok(bodies
                .into_iter()
                .map(|body| ctx.stage_insert(&collection, body))
                .collect())
        })
    }

    /// Creates one entity.
    pub fn insert_one<F>(&self, init: F) -> StoreResult<ObjectId>
    where
        T: Default,
        F: FnOnce(&mut T),
    {
        let collection = self.collection()?;
        self.store.mutate(Operation::Insert, |ctx| {
            let mut entity = T::default();
            init(&mut entity);
            let body = encode(&entity, Operation::Insert)?;
            Ok(ctx.stage_insert(&collection, body))
        })
    }

    /// Stages deletion of every entity matching `filter`.
    pub fn delete(&self, filter: Option<&str>) -> StoreResult<usize> {
        let collection = self.collection()?;
        let plan = FetchPlan::filter_only(filter).in_op(Operation::Delete)?;
        self.store.mutate(Operation::Delete, |ctx| {
            let ids: Vec<ObjectId> = ctx
                .fetch(&collection, &plan)
                .in_op(Operation::Delete)?
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            for id in &ids {
                ctx.stage_delete(*id, &collection);
            }
            Ok(ids.len())
        })
    }

    /// Deletes matching rows directly in the backing store.
    ///
    /// Staged changes are saved first, so objects inserted moments ago are
    /// deleted too.
    pub fn batch_delete(&self, filter: Option<&str>) -> StoreResult<usize> {
        let collection = self.collection()?;
        let plan = FetchPlan::filter_only(filter).in_op(Operation::BatchDelete)?;
        self.store.bulk(Operation::BatchDelete, |ctx| {
            ctx.batch_delete(&collection, &plan)
                .in_op(Operation::BatchDelete)
        })
    }

    /// Sets the fields collected by `fields` on matching rows directly in
    /// the backing store.
    ///
    /// Staged changes are saved first. An empty update writes nothing and
    /// returns zero.
    pub fn batch_update<F>(&self, filter: Option<&str>, fields: F) -> StoreResult<usize>
    where
        F: FnOnce(&mut FieldUpdates),
    {
        let collection = self.collection()?;
        let plan = FetchPlan::filter_only(filter).in_op(Operation::BatchUpdate)?;
        let mut updates = FieldUpdates::new();
        fields(&mut updates);

        self.store.bulk(Operation::BatchUpdate, |ctx| {
            if updates.is_empty() {
                return Ok(0);
            }
            ctx.batch_update(&collection, &plan, &updates)
                .in_op(Operation::BatchUpdate)
        })
    }

    /// Builds a live result set over `request`, refreshed after every
    /// committed save of this store.
    ///
    /// `section_key` names the key path whose value splits results into
    /// sections. The first fetch runs only on [`LiveResults::perform_fetch`].
    pub fn live(
        &self,
        request: FetchRequest,
        section_key: Option<&str>,
        observer: Arc<dyn ResultsObserver<T>>,
    ) -> StoreResult<Arc<LiveResults<T>>> {
        let plan = request.compile().in_op(Operation::Select)?;
        let live = Arc::new(LiveResults::new(
            self.clone(),
            plan,
            section_key.map(str::to_string),
            observer,
        ));
        let listener: Arc<dyn SaveListener> = live.clone();
        let listener: Weak<dyn SaveListener> = Arc::downgrade(&listener);
        self.store.add_listener(listener);
        Ok(live)
    }

    /// Persisted bodies matching `plan`, in result order.
    pub(crate) fn fetch_bodies(&self, plan: &FetchPlan, op: Operation) -> StoreResult<Vec<Value>> {
        let collection = self.collection()?;
        self.store.read(op, |ctx| {
            Ok(ctx
                .fetch(&collection, plan)
                .in_op(op)?
                .into_iter()
                .map(|(_, body)| body)
                .collect())
        })
    }

    fn collection(&self) -> StoreResult<String> {
        self.store
            .collection_for(&T::entity_type())
            .map(str::to_string)
    }
}

pub(crate) fn decode<T: Entity>(body: Value, op: Operation) -> StoreResult<T> {
    serde_json::from_value(body).map_err(|err| StoreError::classify(err, Some(op)))
}

fn encode<T: Entity>(entity: &T, op: Operation) -> StoreResult<Value> {
    let body = serde_json::to_value(entity).in_op(op)?;
    if !body.is_object() {
        return Err(StoreError::classify(
            Fault::InvalidData(format!(
                "`{}` does not serialize to a JSON object",
                T::TYPE_NAME
            )),
            Some(op),
        ));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::EntityService;
    use crate::error::{Operation, StoreError};
    use crate::model::entity::Entity;
    use crate::model::schema::{EntitySchema, StoreSchema};
    use crate::query::{FetchRequest, SortOrder};
    use crate::store::{InMemoryBootstrap, StoreRegistry};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: i64,
    }

    impl Entity for Person {
        const TYPE_NAME: &'static str = "Person";
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Orphan {
        tag: String,
    }

    impl Entity for Orphan {
        const TYPE_NAME: &'static str = "Orphan";
    }

    fn people() -> (StoreRegistry, EntityService<Person>) {
        let registry = StoreRegistry::with_settings(
            InMemoryBootstrap::new().with_schema(
                "main",
                StoreSchema::new([EntitySchema::new("Person", "people")]),
            ),
            crate::config::SaveSettings::new(Duration::from_secs(60)),
        );
        registry.store("main").expect("store should open");
        let service = registry.entity::<Person>().expect("Person should resolve");
        (registry, service)
    }

    fn seed(service: &EntityService<Person>, ages: &[i64]) {
        service
            .insert(ages.len(), |index, person| {
                person.name = format!("p{index}");
                person.age = ages[index];
            })
            .expect("insert should succeed");
    }

    #[test]
    fn select_filters_sorts_and_limits() {
        let (_registry, service) = people();
        seed(&service, &[10, 35, 40, 18, 50]);

        let request = FetchRequest::filtered("age > 30").sorted_by("age", SortOrder::Desc);
        let ages: Vec<i64> = service
            .select(&request)
            .expect("select should succeed")
            .into_iter()
            .map(|person| person.age)
            .collect();
        assert_eq!(ages, vec![50, 40, 35]);

        let window = FetchRequest::all()
            .sorted_by("age", SortOrder::Asc)
            .with_range(1, 2);
        let ages: Vec<i64> = service
            .select(&window)
            .expect("select should succeed")
            .into_iter()
            .map(|person| person.age)
            .collect();
        assert_eq!(ages, vec![18, 35]);
    }

    #[test]
    fn update_and_delete_report_affected_counts() {
        let (_registry, service) = people();
        seed(&service, &[10, 20, 30]);

        let updated = service
            .update(Some("age >= 20"), |person| person.age += 1)
            .expect("update should succeed");
        assert_eq!(updated, 2);

        let deleted = service.delete(Some("age == 21")).expect("delete should succeed");
        assert_eq!(deleted, 1);

        let ages: Vec<i64> = service
            .select(&FetchRequest::all().sorted_by("age", SortOrder::Asc))
            .expect("select should succeed")
            .into_iter()
            .map(|person| person.age)
            .collect();
        assert_eq!(ages, vec![10, 31]);
    }

    #[test]
    fn insert_one_returns_the_new_id() {
        let (_registry, service) = people();
        let id = service
            .insert_one(|person| person.name = "Ada".to_string())
            .expect("insert should succeed");
        assert!(!id.is_nil());
        assert!(service.store().has_changes().expect("lock should be healthy"));
    }

    #[test]
    fn invalid_filters_fail_with_their_operation_label() {
        let (_registry, service) = people();
        let err = service
            .update(Some("age >"), |_| {})
            .expect_err("bad filter must fail");
        assert_eq!(err.operation(), Some(Operation::Update));
        assert!(err.to_string().starts_with("update error: "));

        let err = service
            .select(&FetchRequest::filtered("name MATCHES '('"))
            .expect_err("bad pattern must fail");
        assert_eq!(err.operation(), Some(Operation::Select));
    }

    #[test]
    fn batch_operations_save_staged_work_first() {
        let (_registry, service) = people();
        seed(&service, &[10, 40, 60]);

        let touched = service
            .batch_update(Some("age > 30"), |fields| {
                fields.set("name", "senior");
            })
            .expect("batch update should succeed");
        assert_eq!(touched, 2);
        assert!(!service.store().has_changes().expect("lock should be healthy"));

        let seniors = service
            .select(&FetchRequest::filtered("name == 'senior'"))
            .expect("select should succeed");
        assert_eq!(seniors.len(), 2);

        assert_eq!(service.batch_update(None, |_| {}).expect("empty update"), 0);
        assert_eq!(service.batch_delete(Some("age < 50")).expect("batch delete"), 2);
        assert_eq!(service.select(&FetchRequest::all()).expect("select").len(), 1);
    }

    #[test]
    fn entity_outside_the_schema_is_unknown() {
        let (registry, _service) = people();
        let store = registry.store("main").expect("cached store");
        let orphans = EntityService::<Orphan>::new(store);
        assert!(matches!(
            orphans.select(&FetchRequest::all()),
            Err(StoreError::UnknownEntity(name)) if name == "Orphan"
        ));
    }
}
