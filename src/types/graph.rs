use std::sync::Arc;

use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::error::{MappingError, Result};
use crate::model::{Entity, Value};
use crate::types::{
    ConstructorParameter, ConstructorSpec, EnumType, MappedType, MappedTypeId, NativeType,
    PropertySpec, ResourceParent, ResourceType, SourceKind, SourceType, StructuredType,
    TypeKind, TypeRegistry, ValueKind,
};

/// Characters escaped inside a URI path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const MAX_PARENT_DEPTH: usize = 32;

/// Process-scoped resolver and cache of [`MappedType`] descriptors.
///
/// Each native type maps to exactly one descriptor per graph. Lookups take a read
/// lock; a miss upgrades to the write lock and resolves the type together with
/// everything it references while holding it, so concurrent first resolutions
/// serialize instead of deadlocking on self-references. A failed resolution
/// rolls back every slot it reserved.
pub struct TypeGraph {
    registry: TypeRegistry,
    table: RwLock<TypeTable>,
}

#[derive(Default)]
struct TypeTable {
    slots: Vec<Option<Arc<MappedType>>>,
    by_native: FxHashMap<NativeType, MappedTypeId>,
    by_name: FxHashMap<String, MappedTypeId>,
}

impl TypeTable {
    fn complete(&self, id: MappedTypeId) -> Option<&Arc<MappedType>> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }
}

impl std::fmt::Debug for TypeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeGraph").finish_non_exhaustive()
    }
}

impl TypeGraph {
    /// Builds a graph and eagerly resolves every primitive, enum, non-generic source
    /// type and proxy alias in `registry`.
    pub fn new(registry: TypeRegistry) -> Result<Self> {
        let graph = Self {
            registry,
            table: RwLock::new(TypeTable::default()),
        };
        for kind in ValueKind::ALL {
            graph.resolve(&NativeType::Value(kind))?;
        }
        let mut names: Vec<String> = graph.registry.enum_names().map(str::to_owned).collect();
        names.extend(
            graph
                .registry
                .source_types()
                .filter(|s| s.type_parameters.is_empty())
                .map(|s| s.name.clone()),
        );
        names.extend(graph.registry.proxy_names().map(str::to_owned));
        for name in names {
            graph.resolve(&NativeType::Named(name))?;
        }
        info!(types = graph.table.read().slots.len(), "types.graph.ready");
        Ok(graph)
    }

    /// Declarations this graph was built from.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Resolves `native` to its memoized descriptor id.
    pub fn resolve(&self, native: &NativeType) -> Result<MappedTypeId> {
        let native = native.canonical();
        if let Some(id) = self.table.read().by_native.get(&native) {
            return Ok(*id);
        }

        let mut table = self.table.write();
        if let Some(id) = table.by_native.get(&native) {
            return Ok(*id);
        }
        let mut resolver = Resolver {
            registry: &self.registry,
            start: table.slots.len(),
            table: &mut table,
            natives: Vec::new(),
            names: Vec::new(),
        };
        match resolver.resolve(&native) {
            Ok(id) => Ok(id),
            Err(err) => {
                warn!(native = %native, error = %err, "types.resolve.rollback");
                resolver.rollback();
                Err(err)
            }
        }
    }

    /// Resolves `native` and returns the descriptor.
    pub fn resolve_type(&self, native: &NativeType) -> Result<Arc<MappedType>> {
        let id = self.resolve(native)?;
        self.get(id)
    }

    /// Id of a primitive type.
    pub fn value_type(&self, kind: ValueKind) -> Result<MappedTypeId> {
        self.resolve(&NativeType::Value(kind))
    }

    /// Descriptor by id.
    pub fn get(&self, id: MappedTypeId) -> Result<Arc<MappedType>> {
        self.table
            .read()
            .complete(id)
            .cloned()
            .ok_or_else(|| MappingError::unknown_type(id))
    }

    /// Descriptor by wire name (case-insensitive), falling back to parsing `name`
    /// as a native type expression such as `List<Hat>`.
    pub fn by_name(&self, name: &str) -> Result<Arc<MappedType>> {
        let hit = self
            .table
            .read()
            .by_name
            .get(&name.to_ascii_lowercase())
            .copied();
        match hit {
            Some(id) => self.get(id),
            None => {
                let native: NativeType = name
                    .parse()
                    .map_err(|_| MappingError::unknown_type(name))?;
                self.resolve_type(&native)
            }
        }
    }

    /// Snapshot of every resolved descriptor, ordered by id.
    pub fn types(&self) -> Vec<Arc<MappedType>> {
        self.table.read().slots.iter().flatten().cloned().collect()
    }

    /// Snapshot of every resolved resource type, ordered by id.
    pub fn resources(&self) -> Vec<Arc<MappedType>> {
        self.types()
            .into_iter()
            .filter(|t| t.resource().is_some())
            .collect()
    }

    /// Returns `true` when values of `candidate` may be stored where `target` is
    /// expected: same type, a subtype, or any type into an `Object` slot.
    pub fn is_assignable(&self, target: MappedTypeId, candidate: MappedTypeId) -> bool {
        let table = self.table.read();
        if table.complete(target).is_some_and(|t| t.is_any()) {
            return true;
        }
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == target {
                return true;
            }
            current = table.complete(id).and_then(|t| t.base());
        }
        false
    }

    /// Transitive subtypes of `id`, ordered by id.
    pub fn sub_types(&self, id: MappedTypeId) -> Vec<MappedTypeId> {
        let candidates: Vec<MappedTypeId> = self
            .table
            .read()
            .slots
            .iter()
            .flatten()
            .filter(|t| t.structured().is_some() && t.id != id)
            .map(|t| t.id)
            .collect();
        candidates
            .into_iter()
            .filter(|c| self.is_assignable(id, *c))
            .collect()
    }

    /// URI template of a resource type, e.g. `farms/{Farm.Id}/critters/{Id}`.
    /// Computed on first use.
    pub fn uri_template(&self, id: MappedTypeId) -> Result<String> {
        let ty = self.get(id)?;
        let resource = require_resource(&ty)?;
        if let Some(template) = resource.uri_template.get() {
            return Ok(template.clone());
        }
        let template = self.build_template(&ty, "", 0)?;
        debug!(type_name = %ty.name, template = %template, "types.uri_template.built");
        Ok(resource.uri_template.get_or_init(|| template).clone())
    }

    fn build_template(&self, ty: &MappedType, prefix: &str, depth: usize) -> Result<String> {
        let resource = require_resource(ty)?;
        let id_prop = require_primary_id(ty)?;
        let placeholder = format!("{{{prefix}{}}}", id_prop.name);
        let Some(parent) = &resource.parent else {
            return Ok(format!("{}/{placeholder}", resource.relative_path));
        };
        if depth >= MAX_PARENT_DEPTH {
            return Err(MappingError::not_supported(format!(
                "parent chain of '{}' is cyclic",
                ty.name
            )));
        }
        let parent_ty = self.get(parent.parent_type)?;
        let collection = parent_collection(&parent_ty, parent)?;
        let parent_template = self.build_template(
            &parent_ty,
            &format!("{prefix}{}.", parent.child_to_parent),
            depth + 1,
        )?;
        Ok(format!("{parent_template}/{}/{placeholder}", collection.uri_name()))
    }

    /// Relative URI of a resource instance, e.g. `farms/1/critters/5`. Non-numeric
    /// identifiers are percent-encoded.
    pub fn uri_of(&self, entity: &Entity) -> Result<String> {
        self.append_uri(entity, 0)
    }

    fn append_uri(&self, entity: &Entity, depth: usize) -> Result<String> {
        let ty = self.get(entity.type_id())?;
        let resource = require_resource(&ty)?;
        let id_segment = encode_segment(&ty, &require_primary_id(&ty)?.get_from(entity))?;
        let Some(parent) = &resource.parent else {
            return Ok(format!("{}/{id_segment}", resource.relative_path));
        };
        if depth >= MAX_PARENT_DEPTH {
            return Err(MappingError::not_supported(format!(
                "parent chain of '{}' is cyclic",
                ty.name
            )));
        }
        let link = ty.property(&parent.child_to_parent).ok_or_else(|| {
            MappingError::not_supported(format!(
                "'{}' has no parent property '{}'",
                ty.name, parent.child_to_parent
            ))
        })?;
        let owner = match link.get_from(entity) {
            Value::Object(owner) => owner,
            other => {
                return Err(MappingError::format(format!(
                    "'{}.{}' must hold the parent resource, found {}",
                    ty.name,
                    link.name,
                    other.kind_name()
                )))
            }
        };
        let parent_ty = self.get(parent.parent_type)?;
        let collection = parent_collection(&parent_ty, parent)?;
        let prefix = self.append_uri(&owner, depth + 1)?;
        Ok(format!("{prefix}/{}/{id_segment}", collection.uri_name()))
    }
}

fn require_resource(ty: &MappedType) -> Result<&ResourceType> {
    ty.resource().ok_or_else(|| {
        MappingError::not_supported(format!("'{}' is not a resource type", ty.name))
    })
}

fn require_primary_id(ty: &MappedType) -> Result<&PropertySpec> {
    ty.primary_id().ok_or_else(|| {
        MappingError::not_supported(format!("resource '{}' has no primary id", ty.name))
    })
}

fn parent_collection<'t>(parent_ty: &'t MappedType, parent: &ResourceParent) -> Result<&'t PropertySpec> {
    parent_ty.property(&parent.parent_to_child).ok_or_else(|| {
        MappingError::not_supported(format!(
            "'{}' has no child collection '{}'",
            parent_ty.name, parent.parent_to_child
        ))
    })
}

fn encode_segment(ty: &MappedType, id: &Value) -> Result<String> {
    match id {
        Value::Int(i) => Ok(i.to_string()),
        other => other
            .to_text()
            .map(|text| utf8_percent_encode(&text, PATH_SEGMENT).to_string())
            .ok_or_else(|| {
                MappingError::format(format!(
                    "identifier of '{}' cannot be used in a URI ({})",
                    ty.name,
                    other.kind_name()
                ))
            }),
    }
}

/// One write-locked resolution session.
struct Resolver<'a> {
    registry: &'a TypeRegistry,
    table: &'a mut TypeTable,
    start: usize,
    natives: Vec<NativeType>,
    names: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn reserve(&mut self, native: &NativeType, name: &str) -> MappedTypeId {
        let id = MappedTypeId(self.table.slots.len() as u32);
        self.table.slots.push(None);
        self.table.by_native.insert(native.clone(), id);
        self.natives.push(native.clone());
        let key = name.to_ascii_lowercase();
        if !self.table.by_name.contains_key(&key) {
            self.table.by_name.insert(key.clone(), id);
            self.names.push(key);
        }
        id
    }

    fn fill(&mut self, ty: MappedType) {
        debug!(type_name = %ty.name, id = ty.id.0, "types.resolve.mapped");
        let idx = ty.id.0 as usize;
        self.table.slots[idx] = Some(Arc::new(ty));
    }

    fn alias(&mut self, native: &NativeType, id: MappedTypeId) -> MappedTypeId {
        debug!(native = %native, id = id.0, "types.resolve.alias");
        self.table.by_native.insert(native.clone(), id);
        self.natives.push(native.clone());
        id
    }

    fn rollback(self) {
        for native in &self.natives {
            self.table.by_native.remove(native);
        }
        for name in &self.names {
            self.table.by_name.remove(name);
        }
        self.table.slots.truncate(self.start);
    }

    fn resolve(&mut self, native: &NativeType) -> Result<MappedTypeId> {
        if let Some(id) = self.table.by_native.get(native) {
            return Ok(*id);
        }
        let registry = self.registry;
        match native {
            NativeType::Value(kind) => {
                let id = self.reserve(native, kind.name());
                self.fill(MappedType {
                    id,
                    name: kind.name().to_owned(),
                    nullable: kind.default_nullable(),
                    generic_arguments: Vec::new(),
                    kind: TypeKind::Value(*kind),
                });
                Ok(id)
            }
            NativeType::Nullable(inner) => self.resolve_nullable(native, inner),
            NativeType::List(element) => {
                let name = native.to_string();
                let id = self.reserve(native, &name);
                let element = self.resolve(element)?;
                self.fill(MappedType {
                    id,
                    name,
                    nullable: true,
                    generic_arguments: vec![element],
                    kind: TypeKind::Collection { element },
                });
                Ok(id)
            }
            NativeType::Map(key, value) => {
                if **key != NativeType::Value(ValueKind::String) {
                    return Err(MappingError::not_supported(format!(
                        "dictionary keys must be strings, found '{key}'"
                    )));
                }
                let name = native.to_string();
                let id = self.reserve(native, &name);
                let key = self.resolve(key)?;
                let value = self.resolve(value)?;
                self.fill(MappedType {
                    id,
                    name,
                    nullable: true,
                    generic_arguments: vec![key, value],
                    kind: TypeKind::Dictionary { key, value },
                });
                Ok(id)
            }
            NativeType::Named(name) => {
                if let Some(values) = registry.enum_values(name) {
                    let id = self.reserve(native, name);
                    self.fill(MappedType {
                        id,
                        name: name.clone(),
                        nullable: false,
                        generic_arguments: Vec::new(),
                        kind: TypeKind::Enum(EnumType {
                            values: values.to_vec(),
                        }),
                    });
                    Ok(id)
                } else if let Some(source) = registry.source_type(name) {
                    if !source.type_parameters.is_empty() {
                        return Err(MappingError::not_supported(format!(
                            "generic definition '{name}' needs {} type argument(s)",
                            source.type_parameters.len()
                        )));
                    }
                    self.resolve_source(native, source, &[])
                } else if let Some(target) = registry.proxy_target(name) {
                    if registry.source_type(target).is_none() {
                        return Err(MappingError::unknown_type(target));
                    }
                    let id = self.resolve(&NativeType::named(target))?;
                    Ok(self.alias(native, id))
                } else {
                    Err(MappingError::unknown_type(name))
                }
            }
            NativeType::Generic {
                definition,
                arguments,
            } => {
                let source = registry
                    .source_type(definition)
                    .filter(|s| !s.type_parameters.is_empty())
                    .ok_or_else(|| MappingError::unknown_type(native))?;
                if source.type_parameters.len() != arguments.len() {
                    return Err(MappingError::not_supported(format!(
                        "'{definition}' takes {} type argument(s), got {}",
                        source.type_parameters.len(),
                        arguments.len()
                    )));
                }
                self.resolve_source(native, source, arguments)
            }
            NativeType::Parameter(_) => Err(MappingError::unknown_type(format!(
                "unbound type parameter {native}"
            ))),
        }
    }

    fn resolve_nullable(&mut self, native: &NativeType, inner: &NativeType) -> Result<MappedTypeId> {
        let inner_id = self.resolve(inner)?;
        let value_like = self.table.complete(inner_id).and_then(|t| match &t.kind {
            TypeKind::Value(kind) if !t.nullable => Some(TypeKind::Value(*kind)),
            TypeKind::Enum(e) => Some(TypeKind::Enum(e.clone())),
            _ => None,
        });
        // Reference-like types already accept null and share the inner descriptor.
        let Some(kind) = value_like else {
            return Ok(self.alias(native, inner_id));
        };
        let name = native.to_string();
        let id = self.reserve(native, &name);
        self.fill(MappedType {
            id,
            name,
            nullable: true,
            generic_arguments: vec![inner_id],
            kind,
        });
        Ok(id)
    }

    fn resolve_source(
        &mut self,
        native: &NativeType,
        source: &'a SourceType,
        args: &[NativeType],
    ) -> Result<MappedTypeId> {
        let registry = self.registry;
        let chain = registry.inheritance_chain(&source.name)?;
        let name = if args.is_empty() {
            source.name.clone()
        } else {
            native.to_string()
        };
        let id = self.reserve(native, &name);

        let base = match &source.base {
            Some(base) => Some(self.resolve(&NativeType::named(base.clone()))?),
            None => None,
        };

        let mut generic_arguments = Vec::new();
        if args.is_empty() {
            for arg in &source.generic_arguments {
                generic_arguments.push(self.resolve(&arg.canonical())?);
            }
        } else {
            for arg in args {
                generic_arguments.push(self.resolve(arg)?);
            }
        }

        let mut properties: Vec<PropertySpec> = Vec::new();
        for def in &chain {
            let declaring_type = if def.name == source.name {
                id
            } else {
                self.resolve(&NativeType::named(def.name.clone()))?
            };
            for prop in &def.properties {
                let property_type = self.resolve(&prop.ty.substitute(args).canonical())?;
                let spec = PropertySpec {
                    name: prop.name.clone(),
                    declaring_type,
                    property_type,
                    access: prop.access,
                    item_access: prop.item_access,
                    is_primary_id: prop.primary_id,
                    required: prop.required,
                    default: prop.default.clone(),
                    always_expanded: prop.always_expanded,
                    getter: prop.getter.clone(),
                    setter: prop.setter.clone(),
                };
                match properties.iter().position(|p| p.matches(&prop.name)) {
                    Some(idx) => properties[idx] = spec,
                    None => properties.push(spec),
                }
            }
        }

        let ctor_names: Vec<String> = match chain.iter().rev().find_map(|d| d.constructor.as_ref()) {
            Some(explicit) => explicit.clone(),
            None => properties
                .iter()
                .filter(|p| p.required)
                .map(|p| p.name.clone())
                .collect(),
        };
        let mut parameters = Vec::with_capacity(ctor_names.len());
        for ctor_name in ctor_names {
            let prop = properties
                .iter()
                .find(|p| p.matches(&ctor_name))
                .ok_or_else(|| {
                    MappingError::not_supported(format!(
                        "constructor parameter '{ctor_name}' of '{name}' has no matching property"
                    ))
                })?;
            parameters.push(ConstructorParameter {
                property: prop.name.clone(),
                default: prop.default.clone(),
            });
        }

        let structured = StructuredType {
            primary_id: properties.iter().position(|p| p.is_primary_id),
            properties,
            base,
            is_abstract: source.is_abstract,
            allowed_methods: source.allowed_methods,
            constructor: ConstructorSpec { parameters },
        };

        let kind = match source.kind {
            SourceKind::ValueObject => TypeKind::Structured(structured),
            SourceKind::Resource => {
                let base_name = match &source.uri_base {
                    Some(explicit) => explicit.clone(),
                    None => chain
                        .iter()
                        .find(|d| d.kind == SourceKind::Resource)
                        .map_or_else(|| source.name.clone(), |d| d.name.clone()),
                };
                let uri_base_type = if base_name == source.name {
                    id
                } else {
                    self.resolve(&NativeType::named(base_name.clone()))?
                };
                let path_owner = registry.source_type(&base_name).unwrap_or(source);
                let relative_path = source
                    .path
                    .clone()
                    .unwrap_or_else(|| path_owner.collection_path());
                let parent = match chain.iter().rev().find_map(|d| d.parent.as_ref()) {
                    Some(def) => Some(ResourceParent {
                        parent_type: self.resolve(&NativeType::named(def.parent_type.clone()))?,
                        child_to_parent: def.child_to_parent.clone(),
                        parent_to_child: def.parent_to_child.clone(),
                    }),
                    None => None,
                };
                TypeKind::Resource(ResourceType::new(
                    structured,
                    relative_path,
                    parent,
                    uri_base_type,
                ))
            }
        };

        self.fill(MappedType {
            id,
            name,
            nullable: true,
            generic_arguments,
            kind,
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HttpMethods, PropertyDef};

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with_type(
                SourceType::resource("Farm")
                    .property(PropertyDef::id("Id", NativeType::Value(ValueKind::Int32)))
                    .property(PropertyDef::new("Critters", NativeType::list(NativeType::named("Critter")))),
            )
            .with_type(
                SourceType::resource("Critter")
                    .child_of("Farm", "Farm", "Critters")
                    .generic_arguments(vec![NativeType::named("Critter")])
                    .property(PropertyDef::id("Id", NativeType::Value(ValueKind::Int32)))
                    .property(PropertyDef::new("Name", NativeType::Value(ValueKind::String)))
                    .property(PropertyDef::new("Farm", NativeType::named("Farm")))
                    .property(PropertyDef::new("Friend", NativeType::named("Critter"))),
            )
            .with_type(SourceType::resource("MusicalCritter").extends("Critter"))
            .with_type(
                SourceType::resource("Page")
                    .type_parameters(["T"])
                    .property(PropertyDef::new("Items", NativeType::list(NativeType::Parameter(0)))),
            )
            .with_enum("Color", ["Red", "Green"])
            .with_proxy("CritterProxy", "Critter")
    }

    #[test]
    fn memoizes_one_descriptor_per_native_type() {
        let graph = TypeGraph::new(registry()).unwrap();
        let a = graph.resolve(&"List<Critter>".parse().unwrap()).unwrap();
        let b = graph.resolve(&"IEnumerable<Critter>".parse().unwrap()).unwrap();
        assert_eq!(a, b);
        let list = graph.get(a).unwrap();
        let critter = graph.by_name("critter").unwrap();
        assert_eq!(list.element_type(), Some(critter.id));
    }

    #[test]
    fn self_referencing_generic_argument_points_back() {
        let graph = TypeGraph::new(registry()).unwrap();
        let critter = graph.by_name("Critter").unwrap();
        assert_eq!(critter.generic_arguments, vec![critter.id]);
        let friend = critter.property("friend").unwrap();
        assert_eq!(friend.property_type, critter.id);
    }

    #[test]
    fn subtypes_inherit_properties_and_uri_base() {
        let graph = TypeGraph::new(registry()).unwrap();
        let critter = graph.by_name("Critter").unwrap();
        let musical = graph.by_name("MusicalCritter").unwrap();
        assert_eq!(musical.properties().len(), critter.properties().len());
        assert_eq!(musical.property("Name").unwrap().declaring_type, critter.id);
        assert_eq!(musical.resource().unwrap().uri_base_type, critter.id);
        assert!(graph.is_assignable(critter.id, musical.id));
        assert!(!graph.is_assignable(musical.id, critter.id));
        assert_eq!(graph.sub_types(critter.id), vec![musical.id]);
    }

    #[test]
    fn proxies_alias_their_target() {
        let graph = TypeGraph::new(registry()).unwrap();
        let proxy = graph.resolve(&NativeType::named("CritterProxy")).unwrap();
        assert_eq!(proxy, graph.by_name("Critter").unwrap().id);
        let err = graph.resolve(&NativeType::named("StrayCat")).unwrap_err();
        assert_eq!(err.code(), "UnknownType");
    }

    #[test]
    fn generic_definitions_are_instantiated_on_demand() {
        let graph = TypeGraph::new(registry()).unwrap();
        let page = graph
            .resolve_type(&"Page<Critter>".parse().unwrap())
            .unwrap();
        assert_eq!(page.name, "Page<Critter>");
        let items = graph.get(page.property("Items").unwrap().property_type).unwrap();
        assert_eq!(items.name, "List<Critter>");
        assert!(graph.resolve(&NativeType::named("Page")).is_err());
    }

    #[test]
    fn failed_resolution_rolls_back() {
        let graph = TypeGraph::new(registry()).unwrap();
        let before = graph.types().len();
        let broken: NativeType = "Dictionary<Int32,Critter>".parse().unwrap();
        assert!(graph.resolve(&broken).is_err());
        let broken: NativeType = "List<Ghost>".parse().unwrap();
        assert!(graph.resolve(&broken).is_err());
        assert_eq!(graph.types().len(), before);
        assert!(graph.by_name("List<Ghost>").is_err());
    }

    #[test]
    fn nullable_value_types_get_their_own_descriptor() {
        let graph = TypeGraph::new(registry()).unwrap();
        let int = graph.value_type(ValueKind::Int32).unwrap();
        let nullable = graph.resolve_type(&"Int32?".parse().unwrap()).unwrap();
        assert!(nullable.nullable);
        assert_ne!(nullable.id, int);
        let string = graph.value_type(ValueKind::String).unwrap();
        assert_eq!(graph.resolve(&"Nullable<String>".parse().unwrap()).unwrap(), string);
    }

    #[test]
    fn uri_templates_and_instance_uris_follow_the_parent_chain() {
        let graph = TypeGraph::new(registry()).unwrap();
        let farm_ty = graph.by_name("Farm").unwrap();
        let critter_ty = graph.by_name("Critter").unwrap();
        assert_eq!(graph.uri_template(farm_ty.id).unwrap(), "farms/{Id}");
        assert_eq!(
            graph.uri_template(critter_ty.id).unwrap(),
            "farms/{Farm.Id}/critters/{Id}"
        );

        let farm = Entity::new(farm_ty.id);
        farm.set("Id", Value::Int(1));
        let critter = Entity::new(critter_ty.id);
        critter.set("Id", Value::Int(5));
        critter.set("Farm", Value::Object(farm));
        assert_eq!(graph.uri_of(&critter).unwrap(), "farms/1/critters/5");
    }

    #[test]
    fn string_identifiers_are_percent_encoded() {
        let registry = TypeRegistry::new().with_type(
            SourceType::resource("Tag")
                .allow(HttpMethods::GET)
                .property(PropertyDef::id("Slug", NativeType::Value(ValueKind::String))),
        );
        let graph = TypeGraph::new(registry).unwrap();
        let tag = Entity::new(graph.by_name("Tag").unwrap().id);
        tag.set("Slug", "a b/c".into());
        assert_eq!(graph.uri_of(&tag).unwrap(), "tags/a%20b%2Fc");
    }
}
