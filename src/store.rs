//! In-memory backing store for the interpreter.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{MappingError, Result};
use crate::model::{Entity, Value};
use crate::query::QueryOutput;
use crate::types::{MappedType, MappedTypeId, TypeGraph};

/// Source of the elements served by a resource endpoint.
///
/// `visit` runs while the source guards its collection against concurrent
/// mutation; it must not call back into the same source.
pub trait DataSource {
    /// Hands every instance stored for `endpoint` to `visit`.
    fn query(
        &self,
        endpoint: &MappedType,
        visit: &mut dyn FnMut(&[Value]) -> Result<QueryOutput>,
    ) -> Result<QueryOutput>;
}

/// Thread-safe repository of resource instances keyed by URI base type.
///
/// All reads and writes go through one coarse, non-reentrant lock.
pub struct Repository {
    graph: Arc<TypeGraph>,
    collections: Mutex<FxHashMap<MappedTypeId, Vec<Value>>>,
}

impl Repository {
    /// Empty repository.
    pub fn new(graph: Arc<TypeGraph>) -> Self {
        Self {
            graph,
            collections: Mutex::new(FxHashMap::default()),
        }
    }

    /// Type graph the repository validates against.
    pub fn graph(&self) -> &Arc<TypeGraph> {
        &self.graph
    }

    fn collection_of(&self, type_id: MappedTypeId) -> Result<(MappedTypeId, Arc<MappedType>)> {
        let ty = self.graph.get(type_id)?;
        let base = ty
            .resource()
            .map(|r| r.uri_base_type)
            .ok_or_else(|| {
                MappingError::not_supported(format!("'{}' is not a resource type", ty.name))
            })?;
        Ok((base, ty))
    }

    /// Stores `entity`, replacing an instance with the same primary id.
    pub fn insert(&self, entity: Entity) -> Result<()> {
        let (base, ty) = self.collection_of(entity.type_id())?;
        let id = ty.primary_id().map(|p| p.get_from(&entity));
        let mut collections = self.collections.lock();
        let items = collections.entry(base).or_default();
        let existing = id.as_ref().and_then(|id| {
            items
                .iter()
                .position(|item| matches_id(&self.graph, item, id))
        });
        match existing {
            Some(idx) => items[idx] = Value::Object(entity),
            None => items.push(Value::Object(entity)),
        }
        debug!(type_name = %ty.name, rows = items.len(), "store.insert");
        Ok(())
    }

    /// Instance of `type_id`'s collection whose primary id equals `id`.
    pub fn get(&self, type_id: MappedTypeId, id: &Value) -> Result<Option<Entity>> {
        let (base, _) = self.collection_of(type_id)?;
        let collections = self.collections.lock();
        Ok(collections.get(&base).and_then(|items| {
            items
                .iter()
                .find(|item| matches_id(&self.graph, item, id))
                .and_then(Value::as_entity)
                .cloned()
        }))
    }

    /// Removes the instance with primary id `id`; returns whether one was found.
    pub fn remove(&self, type_id: MappedTypeId, id: &Value) -> Result<bool> {
        let (base, _) = self.collection_of(type_id)?;
        let mut collections = self.collections.lock();
        let Some(items) = collections.get_mut(&base) else {
            return Ok(false);
        };
        let before = items.len();
        items.retain(|item| !matches_id(&self.graph, item, id));
        Ok(items.len() != before)
    }

    /// Snapshot of the collection serving `type_id`.
    pub fn list(&self, type_id: MappedTypeId) -> Result<Vec<Value>> {
        let (base, _) = self.collection_of(type_id)?;
        Ok(self
            .collections
            .lock()
            .get(&base)
            .cloned()
            .unwrap_or_default())
    }

    /// Number of stored instances across all collections.
    pub fn len(&self) -> usize {
        self.collections.lock().values().map(Vec::len).sum()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matches_id(graph: &TypeGraph, item: &Value, id: &Value) -> bool {
    let Some(entity) = item.as_entity() else {
        return false;
    };
    graph
        .get(entity.type_id())
        .ok()
        .and_then(|ty| ty.primary_id().map(|p| p.get_from(entity)))
        .is_some_and(|current| current.loosely_equals(id))
}

impl DataSource for Repository {
    fn query(
        &self,
        endpoint: &MappedType,
        visit: &mut dyn FnMut(&[Value]) -> Result<QueryOutput>,
    ) -> Result<QueryOutput> {
        let base = endpoint
            .resource()
            .map_or(endpoint.id, |r| r.uri_base_type);
        let collections = self.collections.lock();
        let items = collections.get(&base).map(Vec::as_slice).unwrap_or(&[]);
        debug!(type_name = %endpoint.name, rows = items.len(), "store.query");
        visit(items)
    }
}
