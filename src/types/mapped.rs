use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::model::{Entity, Record, Value};
use crate::types::{HttpMethod, HttpMethods, MappedTypeId, ValueKind};

/// Custom property reader.
pub type Getter = Arc<dyn Fn(&Record) -> Value + Send + Sync>;
/// Custom property writer.
pub type Setter = Arc<dyn Fn(&mut Record, Value) + Send + Sync>;

/// How values of a mapped type are laid out on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SerializationMode {
    /// Scalar token.
    Value,
    /// JSON array.
    Array,
    /// JSON object with free-form keys.
    Dictionary,
    /// JSON object with one key per property.
    Structured,
}

/// Resolved description of how a native type is exposed.
#[derive(Debug)]
pub struct MappedType {
    /// Identifier within the owning graph.
    pub id: MappedTypeId,
    /// Wire name, also used by `_type` tags and `$oftype`.
    pub name: String,
    /// Whether `null` is an acceptable value.
    pub nullable: bool,
    /// Resolved generic arguments in declaration order. May contain `id` itself.
    pub generic_arguments: Vec<MappedTypeId>,
    /// Variant-specific data.
    pub kind: TypeKind,
}

/// Closed set of mapped type variants.
#[derive(Debug)]
pub enum TypeKind {
    /// Primitive converter.
    Value(ValueKind),
    /// Enumeration serialized by member name.
    Enum(EnumType),
    /// Ordered collection.
    Collection {
        /// Element type.
        element: MappedTypeId,
    },
    /// String-keyed dictionary.
    Dictionary {
        /// Key type.
        key: MappedTypeId,
        /// Value type.
        value: MappedTypeId,
    },
    /// Value object without an own URI.
    Structured(StructuredType),
    /// Structured type exposed at a URI.
    Resource(ResourceType),
}

/// Enumeration members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    /// Member names in declaration order.
    pub values: Vec<String>,
}

impl EnumType {
    /// Finds the canonical member name for `name` (case-insensitive).
    pub fn member(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

/// Properties, base and operations of a structured type.
#[derive(Debug)]
pub struct StructuredType {
    /// Properties including inherited ones; base properties come first.
    pub properties: Vec<PropertySpec>,
    /// Single base type.
    pub base: Option<MappedTypeId>,
    /// Abstract types cannot be instantiated by the deserializer.
    pub is_abstract: bool,
    /// Operations permitted on instances.
    pub allowed_methods: HttpMethods,
    /// Constructor bindings.
    pub constructor: ConstructorSpec,
    /// Index into `properties` of the primary identifier.
    pub primary_id: Option<usize>,
}

impl StructuredType {
    /// Looks up a property by name, ignoring case.
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.matches(name))
    }

    /// Primary identifier property.
    pub fn primary_id_property(&self) -> Option<&PropertySpec> {
        self.primary_id.and_then(|idx| self.properties.get(idx))
    }
}

/// Structured type with a URI.
#[derive(Debug)]
pub struct ResourceType {
    /// Shared structured data.
    pub structured: StructuredType,
    /// Collection path segment of top-level resources, e.g. `critters`.
    pub relative_path: String,
    /// Parent association that nests the URI under another resource.
    pub parent: Option<ResourceParent>,
    /// Type whose endpoint serves this type and all its subtypes.
    pub uri_base_type: MappedTypeId,
    pub(crate) uri_template: OnceLock<String>,
}

impl ResourceType {
    pub(crate) fn new(
        structured: StructuredType,
        relative_path: String,
        parent: Option<ResourceParent>,
        uri_base_type: MappedTypeId,
    ) -> Self {
        Self {
            structured,
            relative_path,
            parent,
            uri_base_type,
            uri_template: OnceLock::new(),
        }
    }
}

/// Parent/child association of a nested resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceParent {
    /// Resource type of the parent.
    pub parent_type: MappedTypeId,
    /// Property on the child pointing at the parent.
    pub child_to_parent: String,
    /// Collection property on the parent listing the children.
    pub parent_to_child: String,
}

/// Ordered constructor parameter bindings.
#[derive(Debug, Clone, Default)]
pub struct ConstructorSpec {
    /// Parameters in call order.
    pub parameters: Vec<ConstructorParameter>,
}

/// One constructor parameter and the property it initializes.
#[derive(Debug, Clone)]
pub struct ConstructorParameter {
    /// Canonical property name.
    pub property: String,
    /// Value used when the payload omits the property.
    pub default: Option<Value>,
}

/// Entry of the per-type property descriptor table.
#[derive(Clone)]
pub struct PropertySpec {
    /// Canonical (declared) name.
    pub name: String,
    /// Type that declares the property.
    pub declaring_type: MappedTypeId,
    /// Property type.
    pub property_type: MappedTypeId,
    /// Operations allowed on the property itself.
    pub access: HttpMethods,
    /// Operations allowed on items when the property is a collection.
    pub item_access: HttpMethods,
    /// Whether this property identifies the instance.
    pub is_primary_id: bool,
    /// Whether a payload creating the owner must provide a value.
    pub required: bool,
    /// Value applied when a required property is absent.
    pub default: Option<Value>,
    /// Inline the value even when not listed in `$expand`.
    pub always_expanded: bool,
    pub(crate) getter: Option<Getter>,
    pub(crate) setter: Option<Setter>,
}

impl PropertySpec {
    /// Returns `true` when `name` refers to this property (case-insensitive).
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Lower camel case name used in JSON documents.
    pub fn json_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Dashed lower case name used in URI path segments (`CrazyValue` → `crazy-value`).
    pub fn uri_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 4);
        for (i, c) in self.name.chars().enumerate() {
            if c.is_uppercase() {
                if i > 0 {
                    out.push('-');
                }
                out.extend(c.to_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Whether filters and serializers may read the property.
    pub fn is_readable(&self) -> bool {
        self.access.contains(HttpMethod::Get)
    }

    /// Reads the property from a record.
    pub fn get(&self, record: &Record) -> Value {
        match &self.getter {
            Some(getter) => getter(record),
            None => record.fields.get(&self.name).cloned().unwrap_or(Value::Null),
        }
    }

    /// Reads the property from an entity.
    pub fn get_from(&self, entity: &Entity) -> Value {
        self.get(&entity.read_recursive())
    }

    /// Writes the property into a record.
    pub fn set(&self, record: &mut Record, value: Value) {
        match &self.setter {
            Some(setter) => setter(record, value),
            None => {
                record.fields.insert(self.name.clone(), value);
            }
        }
    }

    /// Writes the property into an entity.
    pub fn set_on(&self, entity: &Entity, value: Value) {
        self.set(&mut entity.write(), value);
    }
}

impl fmt::Debug for PropertySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySpec")
            .field("name", &self.name)
            .field("property_type", &self.property_type)
            .field("access", &self.access)
            .field("is_primary_id", &self.is_primary_id)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

impl MappedType {
    /// Wire layout of values of this type.
    pub fn serialization_mode(&self) -> SerializationMode {
        match &self.kind {
            TypeKind::Value(_) | TypeKind::Enum(_) => SerializationMode::Value,
            TypeKind::Collection { .. } => SerializationMode::Array,
            TypeKind::Dictionary { .. } => SerializationMode::Dictionary,
            TypeKind::Structured(_) | TypeKind::Resource(_) => SerializationMode::Structured,
        }
    }

    /// Structured data of structured and resource types.
    pub fn structured(&self) -> Option<&StructuredType> {
        match &self.kind {
            TypeKind::Structured(s) => Some(s),
            TypeKind::Resource(r) => Some(&r.structured),
            _ => None,
        }
    }

    /// Resource data.
    pub fn resource(&self) -> Option<&ResourceType> {
        match &self.kind {
            TypeKind::Resource(r) => Some(r),
            _ => None,
        }
    }

    /// Primitive kind of value types.
    pub fn value_kind(&self) -> Option<ValueKind> {
        match &self.kind {
            TypeKind::Value(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Element type of collections.
    pub fn element_type(&self) -> Option<MappedTypeId> {
        match &self.kind {
            TypeKind::Collection { element } => Some(*element),
            _ => None,
        }
    }

    /// Whether this is the untyped `Object` slot.
    pub fn is_any(&self) -> bool {
        matches!(self.kind, TypeKind::Value(ValueKind::Any))
    }

    /// Properties of structured types; empty for every other kind.
    pub fn properties(&self) -> &[PropertySpec] {
        self.structured()
            .map(|s| s.properties.as_slice())
            .unwrap_or(&[])
    }

    /// Case-insensitive property lookup.
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.structured().and_then(|s| s.property(name))
    }

    /// Primary identifier property of structured types.
    pub fn primary_id(&self) -> Option<&PropertySpec> {
        self.structured().and_then(StructuredType::primary_id_property)
    }

    /// Base type of structured types.
    pub fn base(&self) -> Option<MappedTypeId> {
        self.structured().and_then(|s| s.base)
    }
}
