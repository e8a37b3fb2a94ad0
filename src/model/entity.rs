use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::Value;
use crate::types::MappedTypeId;

/// Field storage of one structured instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Concrete mapped type of the instance.
    pub type_id: MappedTypeId,
    /// Field values keyed by canonical property name.
    pub fields: BTreeMap<String, Value>,
}

/// Shared handle to a structured instance.
///
/// Cloning the handle aliases the same record, so an object graph may contain
/// cycles (a critter pointing at its farm which lists the critter).
#[derive(Clone)]
pub struct Entity(Arc<RwLock<Record>>);

impl Entity {
    /// Creates an empty instance of `type_id`.
    pub fn new(type_id: MappedTypeId) -> Self {
        Self::with_fields(type_id, BTreeMap::new())
    }

    /// Creates an instance with initial field values.
    pub fn with_fields(type_id: MappedTypeId, fields: BTreeMap<String, Value>) -> Self {
        Entity(Arc::new(RwLock::new(Record { type_id, fields })))
    }

    /// Concrete type of the instance.
    pub fn type_id(&self) -> MappedTypeId {
        self.0.read().type_id
    }

    /// Raw field value, `Null` when unset.
    pub fn get(&self, field: &str) -> Value {
        self.0.read().fields.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Raw field assignment.
    pub fn set(&self, field: impl Into<String>, value: Value) {
        self.0.write().fields.insert(field.into(), value);
    }

    /// Read guard over the record.
    pub fn read(&self) -> RwLockReadGuard<'_, Record> {
        self.0.read()
    }

    /// Write guard over the record.
    pub fn write(&self) -> RwLockWriteGuard<'_, Record> {
        self.0.write()
    }

    /// New handle over a copy of the record. Writes to either handle are not
    /// seen through the other.
    pub fn detached(&self) -> Entity {
        let record = self.0.read().clone();
        Entity(Arc::new(RwLock::new(record)))
    }

    /// Replaces this record with a copy of `source`'s.
    pub fn overwrite_from(&self, source: &Entity) {
        if self.ptr_eq(source) {
            return;
        }
        let record = source.0.read().clone();
        *self.0.write() = record;
    }

    /// Returns `true` when both handles alias the same record.
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read guard that does not block behind queued writers; used when walking
    /// graphs that may revisit an entity already held by the caller.
    pub(crate) fn read_recursive(&self) -> RwLockReadGuard<'_, Record> {
        self.0.read_recursive()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(record) => f
                .debug_struct("Entity")
                .field("type_id", &record.type_id)
                .field("fields", &record.fields.keys().collect::<Vec<_>>())
                .finish(),
            None => f.write_str("Entity(<locked>)"),
        }
    }
}

/// One `$groupby` bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct Grouping {
    /// Value of the grouping key shared by all items.
    pub key: Box<Value>,
    /// Members in source order.
    pub items: Vec<Value>,
}

impl Grouping {
    /// Builds a group.
    pub fn new(key: Value, items: Vec<Value>) -> Self {
        Self {
            key: Box::new(key),
            items,
        }
    }
}
