//! In-memory change tracking over one store's SQLite backing.
//!
//! # Responsibility
//! - Stage inserts, updates and deletes until the next save.
//! - Serve reads as durable rows overlaid with staged changes.
//! - Run batch operations directly against durable rows.
//!
//! # Invariants
//! - Insert then update stays an insert; insert then delete cancels out;
//!   update then delete becomes a delete.
//! - A failed save keeps every staged change for the next attempt.
//! - Batch operations never consult staged changes.

use crate::error::Fault;
use crate::model::entity::ObjectId;
use crate::query::{FetchPlan, FieldUpdates};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
struct Change {
    kind: ChangeKind,
    collection: String,
    body: Value,
}

/// Connection plus staged changes. Always accessed under the store lock.
pub struct StoreContext {
    conn: Connection,
    changes: HashMap<ObjectId, Change>,
    // first-touch order, so inserts read back and persist in creation order
    order: Vec<ObjectId>,
}

impl StoreContext {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            changes: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.changes.len()
    }

    /// Reads `collection` with staged changes applied, then runs `plan`.
    pub fn fetch(
        &self,
        collection: &str,
        plan: &FetchPlan,
    ) -> Result<Vec<(ObjectId, Value)>, Fault> {
        let mut rows = Vec::new();
        for (id, body) in self.load_durable(collection)? {
            match self.changes.get(&id) {
                Some(change) if change.kind == ChangeKind::Delete => {}
                Some(change) => rows.push((id, change.body.clone())),
                None => rows.push((id, body)),
            }
        }

        for id in &self.order {
            if let Some(change) = self.changes.get(id) {
                if change.kind == ChangeKind::Insert && change.collection == collection {
                    rows.push((*id, change.body.clone()));
                }
            }
        }

        Ok(plan.apply(rows))
    }

    /// Stages a new object and returns its id.
    pub fn stage_insert(&mut self, collection: &str, body: Value) -> ObjectId {
        let id = Uuid::new_v4();
        self.touch(id);
        self.changes.insert(
            id,
            Change {
                kind: ChangeKind::Insert,
                collection: collection.to_string(),
                body,
            },
        );
        id
    }

    pub fn stage_update(&mut self, id: ObjectId, collection: &str, body: Value) {
        self.touch(id);
        let kind = match self.changes.get(&id).map(|change| change.kind) {
            Some(ChangeKind::Insert) => ChangeKind::Insert,
            _ => ChangeKind::Update,
        };
        self.changes.insert(
            id,
            Change {
                kind,
                collection: collection.to_string(),
                body,
            },
        );
    }

    pub fn stage_delete(&mut self, id: ObjectId, collection: &str) {
        if let Some(change) = self.changes.get(&id) {
            if change.kind == ChangeKind::Insert {
                self.changes.remove(&id);
                self.order.retain(|staged| *staged != id);
                return;
            }
        }
        self.touch(id);
        self.changes.insert(
            id,
            Change {
                kind: ChangeKind::Delete,
                collection: collection.to_string(),
                body: Value::Null,
            },
        );
    }

    /// Writes every staged change in one transaction.
    ///
    /// Returns `false` without touching the database when nothing is staged.
    pub fn save(&mut self) -> Result<bool, Fault> {
        if self.changes.is_empty() {
            return Ok(false);
        }

        let tx = self.conn.transaction()?;
        for id in &self.order {
            let Some(change) = self.changes.get(id) else {
                continue;
            };
            match change.kind {
                ChangeKind::Insert | ChangeKind::Update => {
                    tx.execute(
                        "INSERT INTO objects (id, collection, body) VALUES (?1, ?2, ?3)
                         ON CONFLICT(id) DO UPDATE SET
                            body = excluded.body,
                            updated_at = (strftime('%s', 'now') * 1000);",
                        params![
                            id.to_string(),
                            change.collection,
                            serde_json::to_string(&change.body)?
                        ],
                    )?;
                }
                ChangeKind::Delete => {
                    tx.execute("DELETE FROM objects WHERE id = ?1;", [id.to_string()])?;
                }
            }
        }
        tx.commit()?;

        self.changes.clear();
        self.order.clear();
        Ok(true)
    }

    /// Deletes durable rows matching `plan` without loading them as objects.
    pub fn batch_delete(&mut self, collection: &str, plan: &FetchPlan) -> Result<usize, Fault> {
        let matching: Vec<ObjectId> = self
            .load_durable(collection)?
            .into_iter()
            .filter(|(_, body)| plan.matches(body))
            .map(|(id, _)| id)
            .collect();

        let tx = self.conn.transaction()?;
        let mut affected = 0;
        for id in &matching {
            affected += tx.execute("DELETE FROM objects WHERE id = ?1;", [id.to_string()])?;
        }
        tx.commit()?;
        Ok(affected)
    }

    /// Applies `updates` to durable rows matching `plan`.
    pub fn batch_update(
        &mut self,
        collection: &str,
        plan: &FetchPlan,
        updates: &FieldUpdates,
    ) -> Result<usize, Fault> {
        let mut matching = Vec::new();
        for (id, mut body) in self.load_durable(collection)? {
            if !plan.matches(&body) {
                continue;
            }
            let object = body.as_object_mut().ok_or_else(|| {
                Fault::InvalidData(format!("object {id} in `{collection}` is not a JSON object"))
            })?;
            updates.apply_to(object);
            matching.push((id, body));
        }

        let tx = self.conn.transaction()?;
        let mut affected = 0;
        for (id, body) in &matching {
            affected += tx.execute(
                "UPDATE objects
                 SET body = ?1, updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?2;",
                params![serde_json::to_string(body)?, id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(affected)
    }

    /// Number of visible objects in `collection`, staged changes included.
    pub fn count(&self, collection: &str) -> Result<usize, Fault> {
        Ok(self.fetch(collection, &FetchPlan::default())?.len())
    }

    fn touch(&mut self, id: ObjectId) {
        if !self.changes.contains_key(&id) {
            self.order.push(id);
        }
    }

    fn load_durable(&self, collection: &str) -> Result<Vec<(ObjectId, Value)>, Fault> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, body FROM objects WHERE collection = ?1 ORDER BY rowid;")?;
        let mut rows = stmt.query([collection])?;
        let mut objects = Vec::new();

        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            let id = Uuid::parse_str(&id_text).map_err(|_| {
                Fault::InvalidData(format!("invalid object id `{id_text}` in `{collection}`"))
            })?;
            let body_text: String = row.get(1)?;
            objects.push((id, serde_json::from_str(&body_text)?));
        }

        Ok(objects)
    }
}
