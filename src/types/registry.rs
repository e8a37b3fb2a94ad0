use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{MappingError, Result};
use crate::model::{Record, Value};
use crate::types::{Getter, HttpMethods, NativeType, Setter};

/// Whether a source type owns a URI.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SourceKind {
    /// Embedded value object.
    ValueObject,
    /// Resource exposed at a URI.
    Resource,
}

/// Parent association declared on a nested resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentDef {
    /// Name of the parent resource type.
    pub parent_type: String,
    /// Property on the child pointing at the parent.
    pub child_to_parent: String,
    /// Collection property on the parent listing the children.
    pub parent_to_child: String,
}

/// Declaration of one domain type.
#[derive(Clone, Debug)]
pub struct SourceType {
    /// Unique type name.
    pub name: String,
    /// Value object or resource.
    pub kind: SourceKind,
    /// Single base type.
    pub base: Option<String>,
    /// Abstract types cannot be created from payloads.
    pub is_abstract: bool,
    /// Operations permitted on instances.
    pub allowed_methods: HttpMethods,
    /// Collection path of top-level resources; derived from the name when absent.
    pub path: Option<String>,
    /// Parent association nesting the URI.
    pub parent: Option<ParentDef>,
    /// Explicit URI base type overriding the topmost resource ancestor.
    pub uri_base: Option<String>,
    /// Type parameters of a generic definition.
    pub type_parameters: Vec<String>,
    /// Generic arguments of a closed type; may name the type itself.
    pub generic_arguments: Vec<NativeType>,
    /// Own properties in declaration order.
    pub properties: Vec<PropertyDef>,
    /// Explicit constructor parameter order (property names).
    pub constructor: Option<Vec<String>>,
}

impl SourceType {
    fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base: None,
            is_abstract: false,
            allowed_methods: HttpMethods::ALL,
            path: None,
            parent: None,
            uri_base: None,
            type_parameters: Vec::new(),
            generic_arguments: Vec::new(),
            properties: Vec::new(),
            constructor: None,
        }
    }

    /// Declares a resource type.
    pub fn resource(name: impl Into<String>) -> Self {
        Self::new(name, SourceKind::Resource)
    }

    /// Declares a value object type.
    pub fn value_object(name: impl Into<String>) -> Self {
        Self::new(name, SourceKind::ValueObject)
    }

    /// Sets the collection path.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into().trim_matches('/').to_owned());
        self
    }

    /// Sets the base type.
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Marks the type abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Restricts the operations permitted on instances.
    pub fn allow(mut self, methods: HttpMethods) -> Self {
        self.allowed_methods = methods;
        self
    }

    /// Nests the resource URI under `parent_type`.
    pub fn child_of(
        mut self,
        parent_type: impl Into<String>,
        child_to_parent: impl Into<String>,
        parent_to_child: impl Into<String>,
    ) -> Self {
        self.parent = Some(ParentDef {
            parent_type: parent_type.into(),
            child_to_parent: child_to_parent.into(),
            parent_to_child: parent_to_child.into(),
        });
        self
    }

    /// Overrides the URI base type.
    pub fn uri_base(mut self, name: impl Into<String>) -> Self {
        self.uri_base = Some(name.into());
        self
    }

    /// Declares the type parameters of a generic definition.
    pub fn type_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_parameters = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declares the generic arguments of a closed type.
    pub fn generic_arguments(mut self, arguments: Vec<NativeType>) -> Self {
        self.generic_arguments = arguments;
        self
    }

    /// Adds a property.
    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    /// Sets an explicit constructor parameter order.
    pub fn constructor<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constructor = Some(properties.into_iter().map(Into::into).collect());
        self
    }

    /// Collection path, defaulting to the lower-cased plural of the name.
    pub fn collection_path(&self) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => format!("{}s", self.name.to_ascii_lowercase()),
        }
    }
}

/// Declaration of one property.
#[derive(Clone)]
pub struct PropertyDef {
    /// Canonical property name.
    pub name: String,
    /// Declared type; may reference type parameters of a generic definition.
    pub ty: NativeType,
    /// Operations allowed on the property.
    pub access: HttpMethods,
    /// Operations allowed on collection items.
    pub item_access: HttpMethods,
    /// Identifies the instance.
    pub primary_id: bool,
    /// Must be supplied when the owner is created.
    pub required: bool,
    /// Value used when a required property is absent.
    pub default: Option<Value>,
    /// Inline even when not listed in `$expand`.
    pub always_expanded: bool,
    /// Custom reader.
    pub getter: Option<Getter>,
    /// Custom writer.
    pub setter: Option<Setter>,
}

impl PropertyDef {
    /// Declares a readable and writable property.
    pub fn new(name: impl Into<String>, ty: NativeType) -> Self {
        Self {
            name: name.into(),
            ty,
            access: HttpMethods::READ_WRITE,
            item_access: HttpMethods::ALL,
            primary_id: false,
            required: false,
            default: None,
            always_expanded: false,
            getter: None,
            setter: None,
        }
    }

    /// Parses `ty` with [`NativeType`]'s `FromStr` grammar.
    pub fn parse(name: impl Into<String>, ty: &str) -> Result<Self> {
        Ok(Self::new(name, ty.parse()?))
    }

    /// Declares the primary identifier (read-only after creation).
    pub fn id(name: impl Into<String>, ty: NativeType) -> Self {
        let mut def = Self::new(name, ty).access(HttpMethods::GET | HttpMethods::POST);
        def.primary_id = true;
        def
    }

    /// Makes the property readable only.
    pub fn read_only(self) -> Self {
        self.access(HttpMethods::GET)
    }

    /// Sets the property access mask.
    pub fn access(mut self, access: HttpMethods) -> Self {
        self.access = access;
        self
    }

    /// Sets the collection item access mask.
    pub fn item_access(mut self, access: HttpMethods) -> Self {
        self.item_access = access;
        self
    }

    /// Requires the property on creation.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the default used when a required property is absent.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Always inlines the value when serializing.
    pub fn expanded(mut self) -> Self {
        self.always_expanded = true;
        self
    }

    /// Installs a custom reader.
    pub fn getter(mut self, getter: impl Fn(&Record) -> Value + Send + Sync + 'static) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Installs a custom writer.
    pub fn setter(
        mut self,
        setter: impl Fn(&mut Record, Value) + Send + Sync + 'static,
    ) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }
}

impl std::fmt::Debug for PropertyDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyDef")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("access", &self.access)
            .field("primary_id", &self.primary_id)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Set of declared source types, enums and proxy aliases.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, SourceType>,
    enums: BTreeMap<String, Vec<String>>,
    proxies: BTreeMap<String, String>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`TypeRegistry::register`]. Later declarations replace earlier
    /// ones with the same name.
    pub fn with_type(mut self, source: SourceType) -> Self {
        self.types.insert(source.name.clone(), source);
        self
    }

    /// Builder form of [`TypeRegistry::register_enum`].
    pub fn with_enum<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enums
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Builder form of [`TypeRegistry::register_proxy`].
    pub fn with_proxy(mut self, proxy: impl Into<String>, target: impl Into<String>) -> Self {
        self.proxies.insert(proxy.into(), target.into());
        self
    }

    /// Declares a source type; names must be unique across types, enums and proxies.
    pub fn register(&mut self, source: SourceType) -> Result<()> {
        self.ensure_free(&source.name)?;
        self.types.insert(source.name.clone(), source);
        Ok(())
    }

    /// Declares an enumeration.
    pub fn register_enum(&mut self, name: impl Into<String>, values: Vec<String>) -> Result<()> {
        let name = name.into();
        self.ensure_free(&name)?;
        self.enums.insert(name, values);
        Ok(())
    }

    /// Declares `proxy` as an alias of the registered type `target`. This is the only
    /// way a non-registered subtype maps to a source type.
    pub fn register_proxy(&mut self, proxy: impl Into<String>, target: impl Into<String>) -> Result<()> {
        let proxy = proxy.into();
        self.ensure_free(&proxy)?;
        self.proxies.insert(proxy, target.into());
        Ok(())
    }

    fn ensure_free(&self, name: &str) -> Result<()> {
        if self.types.contains_key(name)
            || self.enums.contains_key(name)
            || self.proxies.contains_key(name)
        {
            return Err(MappingError::Config(format!("type '{name}' declared twice")));
        }
        Ok(())
    }

    /// Declared source type.
    pub fn source_type(&self, name: &str) -> Option<&SourceType> {
        self.types.get(name)
    }

    /// All declared source types, by name.
    pub fn source_types(&self) -> impl Iterator<Item = &SourceType> {
        self.types.values()
    }

    /// Members of a declared enum.
    pub fn enum_values(&self, name: &str) -> Option<&[String]> {
        self.enums.get(name).map(Vec::as_slice)
    }

    /// Declared enum names.
    pub fn enum_names(&self) -> impl Iterator<Item = &str> {
        self.enums.keys().map(String::as_str)
    }

    /// Target of a proxy alias.
    pub fn proxy_target(&self, name: &str) -> Option<&str> {
        self.proxies.get(name).map(String::as_str)
    }

    /// Declared proxy names.
    pub fn proxy_names(&self) -> impl Iterator<Item = &str> {
        self.proxies.keys().map(String::as_str)
    }

    /// Inheritance chain of `name`, root first. Fails on cycles or unknown bases.
    pub fn inheritance_chain(&self, name: &str) -> Result<Vec<&SourceType>> {
        let mut chain = Vec::new();
        let mut current = Some(name);
        while let Some(type_name) = current {
            let source = self
                .types
                .get(type_name)
                .ok_or_else(|| MappingError::unknown_type(type_name))?;
            if chain.iter().any(|s: &&SourceType| s.name == source.name) {
                return Err(MappingError::not_supported(format!(
                    "inheritance cycle through '{type_name}'"
                )));
            }
            chain.push(source);
            current = source.base.as_deref();
        }
        chain.reverse();
        Ok(chain)
    }
}
