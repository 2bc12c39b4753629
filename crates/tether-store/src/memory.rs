//! In-memory document store.
//!
//! Behaves like a remote store for Tether's purposes: per-document atomic
//! updates, server-side timestamps, and no cross-document transactions. It
//! also doubles as the out-of-band CRUD layer in tests (insert/remove) and
//! can be told to fail or stall the next read or update of a document.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use tether_core::{Document, EntityRef, Fields};

use crate::store::{DocumentStore, FieldUpdate, StoreError};

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Read,
    Update,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(StoreError),
    /// Sleep before touching the data.
    Stall(Duration),
    /// Read the data, then sleep before answering.
    Lag(Duration),
}

/// A fault armed for the next `remaining` matching operations.
struct Armed {
    fault: Fault,
    remaining: usize,
}

struct Inner {
    collections: RwLock<Collections>,
    faults: Mutex<HashMap<(EntityRef, Op), Armed>>,
    writes: AtomicU64,
    updated_at_field: String,
}

/// Thread-safe in-memory store. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store stamping `updatedAt` on every update.
    pub fn new() -> Self {
        Self::with_collections(Collections::new(), "updatedAt")
    }

    /// Empty store stamping `field` on every update.
    pub fn with_updated_at_field(field: &str) -> Self {
        Self::with_collections(Collections::new(), field)
    }

    fn with_collections(collections: Collections, updated_at_field: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(collections),
                faults: Mutex::new(HashMap::new()),
                writes: AtomicU64::new(0),
                updated_at_field: updated_at_field.to_string(),
            }),
        }
    }

    /// Build a store from a `{collection: {id: {fields}}}` snapshot.
    pub fn from_snapshot(snapshot: Value, updated_at_field: &str) -> Result<Self, StoreError> {
        let Value::Object(raw) = snapshot else {
            return Err(StoreError::InvalidSnapshot(
                "top level must be an object of collections".to_string(),
            ));
        };

        let mut collections = Collections::new();
        for (collection, docs) in raw {
            let Value::Object(docs) = docs else {
                return Err(StoreError::InvalidSnapshot(format!(
                    "collection {collection} must be an object of documents"
                )));
            };
            let mut parsed = BTreeMap::new();
            for (id, fields) in docs {
                let Value::Object(fields) = fields else {
                    return Err(StoreError::InvalidSnapshot(format!(
                        "document {collection}/{id} must be an object"
                    )));
                };
                parsed.insert(id, fields);
            }
            collections.insert(collection, parsed);
        }

        tracing::debug!(collections = collections.len(), "Snapshot loaded");
        Ok(Self::with_collections(collections, updated_at_field))
    }

    /// Export the whole store in snapshot form.
    pub async fn snapshot(&self) -> Value {
        let collections = self.inner.collections.read().await;
        let mut out = Map::new();
        for (collection, docs) in collections.iter() {
            let docs: Map<String, Value> = docs
                .iter()
                .map(|(id, fields)| (id.clone(), Value::Object(fields.clone())))
                .collect();
            out.insert(collection.clone(), Value::Object(docs));
        }
        Value::Object(out)
    }

    /// Create or replace a document, as the external CRUD layer would.
    pub async fn insert(&self, entity: &EntityRef, fields: Fields) {
        let mut collections = self.inner.collections.write().await;
        collections
            .entry(entity.collection.clone())
            .or_default()
            .insert(entity.id.clone(), fields);
    }

    /// Delete a document out of band. Returns the removed fields.
    pub async fn remove(&self, entity: &EntityRef) -> Option<Fields> {
        let mut collections = self.inner.collections.write().await;
        collections
            .get_mut(&entity.collection)
            .and_then(|docs| docs.remove(&entity.id))
    }

    /// Number of successful `update_fields` calls so far.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Make the next update of `entity` fail with `error`.
    pub async fn fail_next_update(&self, entity: &EntityRef, error: StoreError) {
        self.arm(entity, Op::Update, Fault::Fail(error), 1).await;
    }

    /// Make the next update of `entity` sleep before applying.
    pub async fn stall_next_update(&self, entity: &EntityRef, delay: Duration) {
        self.arm(entity, Op::Update, Fault::Stall(delay), 1).await;
    }

    /// Make the next read of `entity` fail with `error`.
    pub async fn fail_next_read(&self, entity: &EntityRef, error: StoreError) {
        self.arm(entity, Op::Read, Fault::Fail(error), 1).await;
    }

    /// Make the next `times` reads of `entity` answer only after `delay`,
    /// with the document as it was when the read arrived.
    pub async fn delay_reads(&self, entity: &EntityRef, delay: Duration, times: usize) {
        self.arm(entity, Op::Read, Fault::Lag(delay), times).await;
    }

    async fn arm(&self, entity: &EntityRef, op: Op, fault: Fault, times: usize) {
        if times == 0 {
            return;
        }
        self.inner.faults.lock().await.insert(
            (entity.clone(), op),
            Armed {
                fault,
                remaining: times,
            },
        );
    }

    /// Consume and act on an armed fault, if any. Returns how long to wait
    /// before answering.
    async fn trip(&self, entity: &EntityRef, op: Op) -> Result<Option<Duration>, StoreError> {
        let fault = {
            let key = (entity.clone(), op);
            let mut faults = self.inner.faults.lock().await;
            match faults.get(&key).map(|armed| armed.remaining) {
                Some(n) if n > 1 => faults.get_mut(&key).map(|armed| {
                    armed.remaining -= 1;
                    armed.fault.clone()
                }),
                Some(_) => faults.remove(&key).map(|armed| armed.fault),
                None => None,
            }
        };
        match fault {
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
            Some(Fault::Lag(delay)) => Ok(Some(delay)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_document(&self, entity: &EntityRef) -> Result<Option<Document>, StoreError> {
        let lag = self.trip(entity, Op::Read).await?;
        let doc = {
            let collections = self.inner.collections.read().await;
            collections
                .get(&entity.collection)
                .and_then(|docs| docs.get(&entity.id))
                .map(|fields| Document::new(entity.id.clone(), fields.clone()))
        };
        if let Some(delay) = lag {
            tokio::time::sleep(delay).await;
        }
        Ok(doc)
    }

    async fn update_fields(
        &self,
        entity: &EntityRef,
        updates: &[FieldUpdate],
    ) -> Result<(), StoreError> {
        self.trip(entity, Op::Update).await?;

        let mut collections = self.inner.collections.write().await;
        let fields = collections
            .get_mut(&entity.collection)
            .and_then(|docs| docs.get_mut(&entity.id))
            .ok_or_else(|| StoreError::NotFound(entity.clone()))?;

        for update in updates {
            apply_update(fields, update);
        }
        fields.insert(
            self.inner.updated_at_field.clone(),
            Value::String(Utc::now().to_rfc3339()),
        );
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(entity = %entity, updates = updates.len(), "Document updated");
        Ok(())
    }

    async fn list_ids(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let collections = self.inner.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_referencing(
        &self,
        collection: &str,
        field: &str,
        id: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.inner.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, fields)| references(fields.get(field), id))
            .map(|(doc_id, fields)| Document::new(doc_id.clone(), fields.clone()))
            .collect())
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn references(value: Option<&Value>, id: &str) -> bool {
    match value {
        Some(Value::String(s)) => s == id,
        Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(id)),
        _ => false,
    }
}

fn apply_update(fields: &mut Fields, update: &FieldUpdate) {
    match update {
        FieldUpdate::Assign { field, value } => {
            fields.insert(field.clone(), value.clone());
        }
        FieldUpdate::AddToSet { field, value } => {
            let id = Value::String(value.clone());
            let next = match fields.remove(field) {
                Some(Value::Array(mut items)) => {
                    if !items.contains(&id) {
                        items.push(id);
                    }
                    Value::Array(items)
                }
                // Legacy scalar ids are kept when the field becomes a set.
                Some(Value::String(existing)) if !existing.is_empty() && existing != *value => {
                    Value::Array(vec![Value::String(existing), id])
                }
                _ => Value::Array(vec![id]),
            };
            fields.insert(field.clone(), next);
        }
        FieldUpdate::RemoveFromSet { field, value } => match fields.get_mut(field) {
            Some(Value::Array(items)) => items.retain(|v| v.as_str() != Some(value.as_str())),
            Some(slot) if slot.as_str() == Some(value.as_str()) => *slot = Value::Array(Vec::new()),
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_add_to_set_deduplicates() {
        let mut f = fields(json!({ "ids": ["a"] }));
        apply_update(&mut f, &FieldUpdate::add_to_set("ids", "b"));
        apply_update(&mut f, &FieldUpdate::add_to_set("ids", "a"));
        assert_eq!(f["ids"], json!(["a", "b"]));
    }

    #[test]
    fn test_add_to_set_creates_missing_field() {
        let mut f = fields(json!({}));
        apply_update(&mut f, &FieldUpdate::add_to_set("ids", "a"));
        assert_eq!(f["ids"], json!(["a"]));
    }

    #[test]
    fn test_add_to_set_keeps_legacy_scalar() {
        let mut f = fields(json!({ "ids": "old" }));
        apply_update(&mut f, &FieldUpdate::add_to_set("ids", "new"));
        assert_eq!(f["ids"], json!(["old", "new"]));

        let mut same = fields(json!({ "ids": "old" }));
        apply_update(&mut same, &FieldUpdate::add_to_set("ids", "old"));
        assert_eq!(same["ids"], json!(["old"]));
    }

    #[test]
    fn test_remove_from_set() {
        let mut f = fields(json!({ "ids": ["a", "b"], "legacy": "b", "other": "c" }));
        apply_update(&mut f, &FieldUpdate::remove_from_set("ids", "a"));
        apply_update(&mut f, &FieldUpdate::remove_from_set("legacy", "b"));
        apply_update(&mut f, &FieldUpdate::remove_from_set("other", "b"));
        apply_update(&mut f, &FieldUpdate::remove_from_set("missing", "b"));
        assert_eq!(f["ids"], json!(["b"]));
        assert_eq!(f["legacy"], json!([]));
        assert_eq!(f["other"], json!("c"));
        assert!(!f.contains_key("missing"));
    }

    #[test]
    fn test_assign_and_clear() {
        let mut f = fields(json!({ "lieuId": "l1" }));
        apply_update(&mut f, &FieldUpdate::assign("lieuId", "l2"));
        assert_eq!(f["lieuId"], json!("l2"));
        apply_update(&mut f, &FieldUpdate::clear("lieuId"));
        assert_eq!(f["lieuId"], Value::Null);
    }

    #[test]
    fn test_references() {
        assert!(references(Some(&json!("x")), "x"));
        assert!(references(Some(&json!(["y", "x"])), "x"));
        assert!(!references(Some(&json!(["y"])), "x"));
        assert!(!references(None, "x"));
    }

    #[test]
    fn test_from_snapshot_rejects_bad_shapes() {
        assert!(InMemoryStore::from_snapshot(json!([]), "updatedAt").is_err());
        assert!(InMemoryStore::from_snapshot(json!({ "c": [] }), "updatedAt").is_err());
        assert!(InMemoryStore::from_snapshot(json!({ "c": { "d": 1 } }), "updatedAt").is_err());
    }
}
