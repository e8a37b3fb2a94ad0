//! Type mapping layer.
//!
//! Native types (the declared shapes of domain types) are registered in a
//! [`TypeRegistry`] and resolved by a [`TypeGraph`] into memoized [`MappedType`]
//! descriptors. Every other component consults the graph to decide how a value is
//! queried, serialized or materialized.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Resolver and memoized cache of mapped types.
pub mod graph;
/// Mapped type descriptors and the property descriptor table.
pub mod mapped;
/// Native type expressions.
pub mod native;
/// Source type registration.
pub mod registry;
/// TOML schema files describing a registry.
pub mod schema;

pub use graph::TypeGraph;
pub use mapped::{
    ConstructorParameter, ConstructorSpec, EnumType, Getter, MappedType, PropertySpec,
    ResourceParent, ResourceType, SerializationMode, Setter, StructuredType, TypeKind,
};
pub use native::NativeType;
pub use registry::{ParentDef, PropertyDef, SourceKind, SourceType, TypeRegistry};

/// Identifier of a mapped type within one [`TypeGraph`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct MappedTypeId(pub u32);

impl fmt::Display for MappedTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// HTTP-style operation checked against allowed-method sets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Partial update.
    Patch,
    /// Removal.
    Delete,
}

impl HttpMethod {
    fn bit(self) -> u8 {
        match self {
            HttpMethod::Get => 1,
            HttpMethod::Post => 1 << 1,
            HttpMethod::Patch => 1 << 2,
            HttpMethod::Delete => 1 << 3,
        }
    }

    /// Upper-case verb.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of [`HttpMethod`] flags.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct HttpMethods(u8);

impl HttpMethods {
    /// Empty set.
    pub const NONE: HttpMethods = HttpMethods(0);
    /// Read only.
    pub const GET: HttpMethods = HttpMethods(1);
    /// Create only.
    pub const POST: HttpMethods = HttpMethods(1 << 1);
    /// Partial update only.
    pub const PATCH: HttpMethods = HttpMethods(1 << 2);
    /// Removal only.
    pub const DELETE: HttpMethods = HttpMethods(1 << 3);
    /// Get, Post and Patch.
    pub const READ_WRITE: HttpMethods = HttpMethods(0b0111);
    /// Every method.
    pub const ALL: HttpMethods = HttpMethods(0b1111);

    /// Returns `true` when `method` is a member of the set.
    pub fn contains(self, method: HttpMethod) -> bool {
        self.0 & method.bit() != 0
    }

    /// Returns a copy of the set with `method` added.
    pub fn with(self, method: HttpMethod) -> Self {
        HttpMethods(self.0 | method.bit())
    }

    /// Returns a copy of the set with `method` removed.
    pub fn without(self, method: HttpMethod) -> Self {
        HttpMethods(self.0 & !method.bit())
    }

    /// Iterates members in Get, Post, Patch, Delete order.
    pub fn iter(self) -> impl Iterator<Item = HttpMethod> {
        [
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Patch,
            HttpMethod::Delete,
        ]
        .into_iter()
        .filter(move |m| self.contains(*m))
    }
}

impl BitOr for HttpMethods {
    type Output = HttpMethods;

    fn bitor(self, rhs: Self) -> Self::Output {
        HttpMethods(self.0 | rhs.0)
    }
}

impl BitOrAssign for HttpMethods {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<HttpMethod> for HttpMethods {
    fn from(method: HttpMethod) -> Self {
        HttpMethods(method.bit())
    }
}

impl FromIterator<HttpMethod> for HttpMethods {
    fn from_iter<I: IntoIterator<Item = HttpMethod>>(iter: I) -> Self {
        iter.into_iter()
            .fold(HttpMethods::NONE, |acc, m| acc.with(m))
    }
}

impl fmt::Debug for HttpMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Primitive value shapes understood by the converters.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ValueKind {
    /// `true` / `false`.
    Boolean,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// RFC 3339 timestamp.
    DateTime,
    /// Statically untyped slot; concrete values carry their own shape or a `_type` tag.
    Any,
}

impl ValueKind {
    /// All primitive kinds, registered eagerly by every graph.
    pub const ALL: [ValueKind; 7] = [
        ValueKind::Boolean,
        ValueKind::Int32,
        ValueKind::Int64,
        ValueKind::Double,
        ValueKind::String,
        ValueKind::DateTime,
        ValueKind::Any,
    ];

    /// Wire name used in `_type` tags.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Boolean => "Boolean",
            ValueKind::Int32 => "Int32",
            ValueKind::Int64 => "Int64",
            ValueKind::Double => "Double",
            ValueKind::String => "String",
            ValueKind::DateTime => "DateTime",
            ValueKind::Any => "Object",
        }
    }

    /// Parses a wire name or a common alias (case-insensitive).
    pub fn from_name(name: &str) -> Option<ValueKind> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => ValueKind::Boolean,
            "int32" | "int" | "i32" => ValueKind::Int32,
            "int64" | "long" | "i64" => ValueKind::Int64,
            "double" | "float" | "f64" | "decimal" => ValueKind::Double,
            "string" | "str" => ValueKind::String,
            "datetime" | "timestamp" => ValueKind::DateTime,
            "object" | "any" => ValueKind::Any,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether `null` is an acceptable value without a `Nullable<>` wrapper.
    pub fn default_nullable(self) -> bool {
        matches!(self, ValueKind::String | ValueKind::Any)
    }

    /// Whether values of this kind are numeric.
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Int32 | ValueKind::Int64 | ValueKind::Double)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_sets_behave_like_flags() {
        let set = HttpMethods::GET | HttpMethods::PATCH;
        assert!(set.contains(HttpMethod::Get));
        assert!(set.contains(HttpMethod::Patch));
        assert!(!set.contains(HttpMethod::Delete));
        assert_eq!(set.without(HttpMethod::Get), HttpMethods::PATCH);
        let collected: HttpMethods = [HttpMethod::Get, HttpMethod::Post].into_iter().collect();
        assert_eq!(collected, HttpMethods::GET | HttpMethods::POST);
        assert_eq!(format!("{:?}", HttpMethods::ALL), "{Get, Post, Patch, Delete}");
    }

    #[test]
    fn value_kind_aliases() {
        assert_eq!(ValueKind::from_name("INT"), Some(ValueKind::Int32));
        assert_eq!(ValueKind::from_name("Object"), Some(ValueKind::Any));
        assert_eq!(ValueKind::from_name("critter"), None);
    }
}
