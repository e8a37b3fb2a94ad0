//! Dynamic object model shared by the evaluator, the repository and the wire codecs.
//!
//! Domain objects are represented as [`Entity`] handles over a [`Record`] of field
//! values keyed by canonical property name; all reads and writes go through the
//! property descriptor table of the owning [`crate::types::MappedType`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

mod entity;
mod reference;

pub use entity::{Entity, Grouping, Record};
pub use reference::{LazyRef, RefState, ResourceLoader};

/// Dynamically typed value.
#[derive(Clone, Debug)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer kind.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Timestamp with offset.
    DateTime(OffsetDateTime),
    /// Enum member name.
    Enum(String),
    /// Ordered collection.
    List(Vec<Value>),
    /// String-keyed dictionary, or an anonymous projection row.
    Map(BTreeMap<String, Value>),
    /// Structured or resource instance.
    Object(Entity),
    /// Result of a `$groupby` step.
    Group(Grouping),
    /// Reference to a remote resource that has not necessarily been fetched.
    Reference(LazyRef),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric payload widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String or enum payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Entity payload.
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Object(e) => Some(e),
            _ => None,
        }
    }

    /// Short shape name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Enum(_) => "enum",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Group(_) => "group",
            Value::Reference(_) => "reference",
        }
    }

    /// Orders two scalar values.
    ///
    /// `Null` sorts before everything; integers and floats compare numerically.
    /// Returns `None` for incomparable shapes.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.partial_cmp(b),
            (Value::String(a), Value::Enum(b)) | (Value::Enum(a), Value::String(b)) => {
                Some(a.as_str().cmp(b.as_str()))
            }
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Equality used by filters: numeric kinds compare by value and enums match
    /// their member name given as a string.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_), Value::Float(_))
            | (Value::Float(_), Value::Int(_))
            | (Value::String(_), Value::Enum(_))
            | (Value::Enum(_), Value::String(_)) => self.compare(other) == Some(Ordering::Equal),
            _ => self == other,
        }
    }

    /// Canonical text form of a scalar, used for URI segments and dictionary keys.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) | Value::Enum(s) => Some(s.clone()),
            Value::DateTime(dt) => dt.format(&Rfc3339).ok(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut visited = Vec::new();
        values_equal(self, other, &mut visited)
    }
}

/// Field-wise structural equality; object pairs already on the comparison stack
/// are assumed equal so cyclic graphs terminate.
pub(crate) fn values_equal(a: &Value, b: &Value, visited: &mut Vec<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::String(x), Value::String(y)) | (Value::Enum(x), Value::Enum(y)) => x == y,
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len()
                && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y, visited))
        }
        (Value::Map(xs), Value::Map(ys)) => maps_equal(xs, ys, visited),
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            let pair = (x.addr(), y.addr());
            if visited.contains(&pair) {
                return true;
            }
            visited.push(pair);
            let (rx, ry) = (x.read_recursive(), y.read_recursive());
            let equal = rx.type_id == ry.type_id && fields_equal(&rx.fields, &ry.fields, visited);
            drop((rx, ry));
            visited.pop();
            equal
        }
        (Value::Group(x), Value::Group(y)) => {
            values_equal(&x.key, &y.key, visited)
                && values_equal(
                    &Value::List(x.items.clone()),
                    &Value::List(y.items.clone()),
                    visited,
                )
        }
        (Value::Reference(x), Value::Reference(y)) => x == y,
        _ => false,
    }
}

fn maps_equal(
    xs: &BTreeMap<String, Value>,
    ys: &BTreeMap<String, Value>,
    visited: &mut Vec<(usize, usize)>,
) -> bool {
    xs.len() == ys.len()
        && xs
            .iter()
            .zip(ys)
            .all(|((kx, vx), (ky, vy))| kx == ky && values_equal(vx, vy, visited))
}

/// Object fields compare with absent entries read as `Null`, matching what a
/// property getter returns for an unset field.
fn fields_equal(
    xs: &BTreeMap<String, Value>,
    ys: &BTreeMap<String, Value>,
    visited: &mut Vec<(usize, usize)>,
) -> bool {
    covers(xs, ys, visited) && covers(ys, xs, visited)
}

fn covers(
    from: &BTreeMap<String, Value>,
    to: &BTreeMap<String, Value>,
    visited: &mut Vec<(usize, usize)>,
) -> bool {
    from.iter()
        .all(|(k, v)| values_equal(v, to.get(k).unwrap_or(&Value::Null), visited))
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Entity> for Value {
    fn from(value: Entity) -> Self {
        Value::Object(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MappedTypeId;

    #[test]
    fn numeric_comparison_crosses_kinds() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert!(Value::Int(3).loosely_equals(&Value::Float(3.0)));
        assert_ne!(Value::Int(3), Value::Float(3.0));
        assert_eq!(Value::Null.compare(&Value::Int(0)), Some(Ordering::Less));
        assert_eq!(Value::Bool(true).compare(&Value::Int(1)), None);
    }

    #[test]
    fn cyclic_objects_compare_without_recursing_forever() {
        let ty = MappedTypeId(9);
        let a = Entity::new(ty);
        let b = Entity::new(ty);
        a.set("Self", Value::Object(a.clone()));
        b.set("Self", Value::Object(b.clone()));
        assert_eq!(Value::Object(a.clone()), Value::Object(b.clone()));
        b.set("Name", "x".into());
        assert_ne!(Value::Object(a), Value::Object(b));
    }
}
