use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as Json};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::error::{MappingError, Result};
use crate::model::{Entity, Value};
use crate::query::QueryResult;
use crate::types::{
    HttpMethod, MappedType, MappedTypeId, PropertySpec, StructuredType, TypeGraph, TypeKind,
    ValueKind,
};
use crate::wire::context::DeserializationContext;
use crate::wire::node::{DeserializerNode, NodeOperation};
use crate::wire::RESULT_TYPE;

/// One JSON property of a structured payload, matched to its descriptor.
struct Field<'t, 'j> {
    property: &'t PropertySpec,
    json: &'j Json,
    forced_post: bool,
    fetched: bool,
}

/// Materializes JSON documents into the dynamic object model.
pub struct JsonDeserializer<'g> {
    graph: &'g TypeGraph,
}

impl<'g> JsonDeserializer<'g> {
    /// Deserializer over `graph`.
    pub fn new(graph: &'g TypeGraph) -> Self {
        Self { graph }
    }

    /// Deserializes `json` as a value of `expected`.
    ///
    /// With `existing`, the document is a patch applied to that value in place;
    /// without, a new value is created.
    pub fn deserialize(
        &self,
        json: &Json,
        expected: MappedTypeId,
        ctx: &dyn DeserializationContext,
        existing: Option<Value>,
    ) -> Result<Value> {
        let mut node = DeserializerNode::root(expected, existing);
        self.node(&mut node, json, ctx)?;
        node.commit();
        Ok(node.into_value())
    }

    /// Parses `text` and deserializes it.
    pub fn deserialize_str(
        &self,
        text: &str,
        expected: MappedTypeId,
        ctx: &dyn DeserializationContext,
        existing: Option<Value>,
    ) -> Result<Value> {
        let json: Json = serde_json::from_str(text)
            .map_err(|err| MappingError::format(format!("malformed JSON: {err}")))?;
        self.deserialize(&json, expected, ctx, existing)
    }

    /// Reads a query result envelope whose items are of `item_type`.
    pub fn deserialize_result(
        &self,
        json: &Json,
        item_type: MappedTypeId,
        ctx: &dyn DeserializationContext,
    ) -> Result<QueryResult> {
        let obj = json.as_object().ok_or_else(|| {
            MappingError::format(format!("expected a query result object, got {}", json_kind(json)))
        })?;
        if obj.get("_type").and_then(Json::as_str) != Some(RESULT_TYPE) {
            return Err(MappingError::format(format!(
                "query result lacks _type '{RESULT_TYPE}'"
            )));
        }
        let items = obj
            .get("items")
            .and_then(Json::as_array)
            .ok_or_else(|| MappingError::format("query result lacks an items array"))?
            .iter()
            .map(|item| self.deserialize(item, item_type, ctx, None))
            .collect::<Result<Vec<_>>>()?;
        let url = match obj.get("url") {
            None | Some(Json::Null) => None,
            Some(Json::String(url)) => Some(url.clone()),
            Some(other) => {
                return Err(MappingError::format(format!(
                    "query result url must be a string, got {}",
                    json_kind(other)
                )))
            }
        };
        Ok(QueryResult {
            items,
            skip: optional_count(obj, "skip")?,
            total_count: optional_count(obj, "totalCount")?,
            url,
        })
    }

    fn node(&self, node: &mut DeserializerNode, json: &Json, ctx: &dyn DeserializationContext) -> Result<()> {
        let expected = self.graph.get(node.expected_type)?;
        trace!(path = %node.expand_path, type_name = %expected.name, "wire.deserialize.node");
        if json.is_null() {
            if !expected.nullable {
                return Err(MappingError::format(format!(
                    "null is not a valid '{}'{}",
                    expected.name,
                    at(&node.expand_path)
                )));
            }
            node.set_value(Value::Null);
            return Ok(());
        }
        match &expected.kind {
            TypeKind::Value(ValueKind::Any) => self.any_node(node, json, ctx),
            TypeKind::Value(kind) => {
                let value = match json {
                    Json::Object(obj) => {
                        let (boxed, inner) = self.unbox(obj)?;
                        if boxed.value_kind() != Some(*kind) {
                            return Err(MappingError::format(format!(
                                "boxed '{}' where '{}' was expected{}",
                                boxed.name,
                                expected.name,
                                at(&node.expand_path)
                            )));
                        }
                        node.value_type = boxed.id;
                        self.scalar(&boxed, inner, &node.expand_path)?
                    }
                    _ => convert(*kind, json, &node.expand_path)?,
                };
                node.set_value(value);
                Ok(())
            }
            TypeKind::Enum(_) => {
                let value = self.scalar(&expected, json, &node.expand_path)?;
                node.set_value(value);
                Ok(())
            }
            TypeKind::Collection { element } => self.array_node(node, *element, json, ctx),
            TypeKind::Dictionary { value, .. } => self.dictionary_node(node, *value, json, ctx),
            TypeKind::Structured(_) | TypeKind::Resource(_) => self.structured_node(node, json, ctx),
        }
    }

    fn unbox<'j>(&self, obj: &'j JsonMap<String, Json>) -> Result<(Arc<MappedType>, &'j Json)> {
        let name = obj
            .get("_type")
            .and_then(Json::as_str)
            .ok_or_else(|| MappingError::format("boxed value lacks a _type property"))?;
        let inner = obj
            .get("value")
            .ok_or_else(|| MappingError::format("boxed value lacks a value property"))?;
        Ok((self.graph.by_name(name)?, inner))
    }

    fn scalar(&self, ty: &MappedType, json: &Json, path: &str) -> Result<Value> {
        if json.is_null() {
            return if ty.nullable {
                Ok(Value::Null)
            } else {
                Err(MappingError::format(format!("null is not a valid '{}'{}", ty.name, at(path))))
            };
        }
        match &ty.kind {
            TypeKind::Value(kind) if *kind != ValueKind::Any => convert(*kind, json, path),
            TypeKind::Enum(members) => {
                let text = json.as_str().ok_or_else(|| {
                    MappingError::format(format!(
                        "expected a '{}' member name{}, got {}",
                        ty.name,
                        at(path),
                        json_kind(json)
                    ))
                })?;
                let member = members.member(text).ok_or_else(|| {
                    MappingError::format(format!("'{text}' is not a member of '{}'{}", ty.name, at(path)))
                })?;
                Ok(Value::Enum(member.to_owned()))
            }
            _ => Err(MappingError::format(format!(
                "'{}' cannot be read as a scalar{}",
                ty.name,
                at(path)
            ))),
        }
    }

    /// Infers the shape of a value stored in an untyped slot.
    fn any_node(&self, node: &mut DeserializerNode, json: &Json, ctx: &dyn DeserializationContext) -> Result<()> {
        let value = match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| MappingError::format(format!("number {n} is out of range")))?,
            },
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let mut child = DeserializerNode::item(node.expected_type, node.expand_path.clone());
                    self.node(&mut child, item, ctx)?;
                    node.absorb(&mut child);
                    out.push(child.into_value());
                }
                Value::List(out)
            }
            Json::Object(obj) => match obj.get("_type") {
                None => return self.dictionary_node(node, node.expected_type, json, ctx),
                Some(Json::String(name)) => {
                    let ty = self.graph.by_name(name)?;
                    if ty.structured().is_some() {
                        return self.structured_node(node, json, ctx);
                    }
                    let (boxed, inner) = self.unbox(obj)?;
                    node.value_type = boxed.id;
                    self.scalar(&boxed, inner, &node.expand_path)?
                }
                Some(other) => {
                    return Err(MappingError::format(format!(
                        "_type must be a string, got {}",
                        json_kind(other)
                    )))
                }
            },
        };
        node.set_value(value);
        Ok(())
    }

    fn reference(&self, node: &mut DeserializerNode, uri: String, ctx: &dyn DeserializationContext) -> Result<()> {
        trace!(uri = %uri, path = %node.expand_path, "wire.deserialize.reference");
        node.uri = Some(uri);
        let reference = ctx.create_reference(node)?;
        node.set_value(reference);
        Ok(())
    }

    fn array_node(
        &self,
        node: &mut DeserializerNode,
        element: MappedTypeId,
        json: &Json,
        ctx: &dyn DeserializationContext,
    ) -> Result<()> {
        if let Json::Object(obj) = json {
            if let Some(uri) = ref_property(obj)? {
                return self.reference(node, uri, ctx);
            }
        }
        let items = json.as_array().ok_or_else(|| {
            MappingError::format(format!(
                "expected an array{}, got {}",
                at(&node.expand_path),
                json_kind(json)
            ))
        })?;
        let (mut collection, patching) = match (&node.value, node.operation) {
            (Some(Value::List(existing)), op) if op != NodeOperation::Post => (existing.clone(), true),
            _ => (Vec::new(), false),
        };

        for item in items {
            let mut item_node = DeserializerNode::item(element, node.expand_path.clone());
            let mut target = None;
            if let Json::Object(obj) = item {
                for (key, id_json) in obj.iter().filter(|(k, _)| is_identifier_key(k)) {
                    let idx = self.locate(element, &key[2..], id_json, &collection, ctx, &node.expand_path)?;
                    item_node.operation = if key.starts_with('-') {
                        NodeOperation::Delete
                    } else {
                        NodeOperation::Patch
                    };
                    item_node.value = Some(collection[idx].clone());
                    target = Some(idx);
                }
            }
            match (item_node.operation, target) {
                (NodeOperation::Delete, Some(idx)) => {
                    self.check_item(node, HttpMethod::Delete, ctx)?;
                    collection.remove(idx);
                }
                (NodeOperation::Patch, Some(idx)) => {
                    self.check_item(node, HttpMethod::Patch, ctx)?;
                    self.node(&mut item_node, item, ctx)?;
                    node.absorb(&mut item_node);
                    collection[idx] = item_node.into_value();
                }
                _ => {
                    if patching {
                        self.check_item(node, HttpMethod::Post, ctx)?;
                    }
                    self.node(&mut item_node, item, ctx)?;
                    node.absorb(&mut item_node);
                    collection.push(item_node.into_value());
                }
            }
        }
        node.set_value(Value::List(collection));
        Ok(())
    }

    /// Index of the item whose `property` equals the identifier in `id_json`.
    fn locate(
        &self,
        element: MappedTypeId,
        property: &str,
        id_json: &Json,
        collection: &[Value],
        ctx: &dyn DeserializationContext,
        path: &str,
    ) -> Result<usize> {
        let ty = self.graph.get(element)?;
        let prop = ty.property(property).ok_or_else(|| {
            MappingError::format(format!(
                "'{}' has no property '{property}' to identify items by{}",
                ty.name,
                at(path)
            ))
        })?;
        let mut id_node = DeserializerNode::item(prop.property_type, path);
        self.node(&mut id_node, id_json, ctx)?;
        let wanted = id_node.into_value();
        collection
            .iter()
            .position(|item| {
                item.as_entity().is_some_and(|entity| {
                    self.graph
                        .get(entity.type_id())
                        .ok()
                        .and_then(|item_ty| item_ty.property(property).map(|p| p.get_from(entity)))
                        .is_some_and(|current| current.loosely_equals(&wanted))
                })
            })
            .ok_or_else(|| {
                MappingError::format(format!(
                    "no item with {} = {}{}",
                    prop.name,
                    wanted.to_text().unwrap_or_else(|| wanted.kind_name().to_owned()),
                    at(path)
                ))
            })
    }

    fn check_item(&self, node: &DeserializerNode, method: HttpMethod, ctx: &dyn DeserializationContext) -> Result<()> {
        match &node.owner {
            Some(owner) => {
                let owner_ty = self.graph.get(owner.owner_type)?;
                ctx.check_item_access(&owner_ty, &owner.property, method)
            }
            None => Ok(()),
        }
    }

    fn dictionary_node(
        &self,
        node: &mut DeserializerNode,
        value_type: MappedTypeId,
        json: &Json,
        ctx: &dyn DeserializationContext,
    ) -> Result<()> {
        let obj = json.as_object().ok_or_else(|| {
            MappingError::format(format!(
                "expected an object{}, got {}",
                at(&node.expand_path),
                json_kind(json)
            ))
        })?;
        if let Some(uri) = ref_property(obj)? {
            return self.reference(node, uri, ctx);
        }
        let mut map = match (&node.value, node.operation) {
            (Some(Value::Map(existing)), op) if op != NodeOperation::Post => existing.clone(),
            _ => BTreeMap::new(),
        };
        for (key, value) in obj {
            if let Some(removed) = key.strip_prefix('-') {
                map.remove(unescape(removed));
                continue;
            }
            if key.starts_with(['*', '!']) {
                return Err(MappingError::format(format!(
                    "unescaped reserved character in key '{key}'{}",
                    at(&node.expand_path)
                )));
            }
            let key = unescape(key);
            let path = if node.expand_path.is_empty() {
                key.to_owned()
            } else {
                format!("{}.{key}", node.expand_path)
            };
            let mut child = DeserializerNode::item(value_type, path);
            self.node(&mut child, value, ctx)?;
            node.absorb(&mut child);
            map.insert(key.to_owned(), child.into_value());
        }
        node.set_value(Value::Map(map));
        Ok(())
    }

    fn structured_node(
        &self,
        node: &mut DeserializerNode,
        json: &Json,
        ctx: &dyn DeserializationContext,
    ) -> Result<()> {
        let obj = json.as_object().ok_or_else(|| {
            MappingError::format(format!(
                "expected an object{}, got {}",
                at(&node.expand_path),
                json_kind(json)
            ))
        })?;
        if let Some(uri) = ref_property(obj)? {
            return self.reference(node, uri, ctx);
        }

        let expected = self.graph.get(node.expected_type)?;
        match obj.get("_type") {
            None => {}
            Some(Json::String(name)) => {
                let tagged = self.graph.by_name(name)?;
                if !expected.is_any() && !self.graph.is_assignable(expected.id, tagged.id) {
                    return Err(MappingError::format(format!(
                        "'{}' is not assignable to '{}'{}",
                        tagged.name,
                        expected.name,
                        at(&node.expand_path)
                    )));
                }
                node.value_type = tagged.id;
            }
            Some(other) => {
                return Err(MappingError::format(format!(
                    "_type must be a string, got {}",
                    json_kind(other)
                )))
            }
        }
        match obj.get("_uri") {
            None => {}
            Some(Json::String(uri)) => {
                node.uri = Some(uri.clone());
                if obj.keys().all(|k| k == "_uri" || k == "_type") {
                    return self.reference(node, uri.clone(), ctx);
                }
            }
            Some(other) => {
                return Err(MappingError::format(format!(
                    "_uri must be a string, got {}",
                    json_kind(other)
                )))
            }
        }

        let existing = match (&node.value, node.operation) {
            (Some(Value::Object(entity)), op) if op != NodeOperation::Post => Some(entity.clone()),
            _ => None,
        };
        if let Some(entity) = &existing {
            node.value_type = entity.type_id();
        }
        let ty = self.graph.get(node.value_type)?;
        let structured = ty.structured().ok_or_else(|| {
            MappingError::format(format!("'{}' is not a structured type", ty.name))
        })?;
        let mut fields = collect_fields(&ty, obj, &node.expand_path)?;

        // Patches go to a detached copy; the original only changes when the
        // whole document has been accepted.
        let (entity, method) = match &existing {
            Some(original) => {
                node.operation = NodeOperation::Patch;
                (original.detached(), HttpMethod::Patch)
            }
            None => {
                node.operation = NodeOperation::Post;
                let entity = self.create(node, &ty, structured, &mut fields, ctx)?;
                (entity, HttpMethod::Post)
            }
        };
        for field in fields.iter().filter(|f| !f.fetched) {
            self.assign(node, &ty, &entity, field, method, ctx)?;
        }
        match existing {
            Some(original) => {
                node.stage(original.clone(), entity);
                node.set_value(Value::Object(original));
            }
            None => node.set_value(Value::Object(entity)),
        }
        Ok(())
    }

    /// Instantiates `ty`, feeding constructor parameters from the payload or
    /// their defaults.
    fn create(
        &self,
        node: &mut DeserializerNode,
        ty: &MappedType,
        structured: &StructuredType,
        fields: &mut [Field<'_, '_>],
        ctx: &dyn DeserializationContext,
    ) -> Result<Entity> {
        let owned_path = node.expand_path.clone();
        let path = owned_path.as_str();
        if structured.is_abstract {
            return Err(MappingError::format(format!(
                "cannot create abstract type '{}'{}",
                ty.name,
                at(path)
            )));
        }
        let entity = Entity::new(ty.id);
        for param in &structured.constructor.parameters {
            let property = ty.property(&param.property).ok_or_else(|| {
                MappingError::not_supported(format!(
                    "constructor parameter '{}' of '{}' has no property",
                    param.property, ty.name
                ))
            })?;
            match fields.iter_mut().find(|f| f.property.name == property.name) {
                Some(field) => {
                    field.fetched = true;
                    let mut child = DeserializerNode::property(ty.id, property, path, None);
                    self.node(&mut child, field.json, ctx)?;
                    node.absorb(&mut child);
                    ctx.check_access(ty, property, HttpMethod::Post)?;
                    ctx.set_property(&entity, property, child.into_value())?;
                }
                None => match &param.default {
                    Some(default) => ctx.set_property(&entity, property, default.clone())?,
                    None => {
                        return Err(MappingError::MissingProperty {
                            type_name: ty.name.clone(),
                            property: property.name.clone(),
                            path: path.to_owned(),
                        })
                    }
                },
            }
        }
        debug!(type_name = %ty.name, path = %path, "wire.deserialize.created");
        Ok(entity)
    }

    /// Deserializes one property and writes it when the value changed.
    fn assign(
        &self,
        node: &mut DeserializerNode,
        ty: &MappedType,
        entity: &Entity,
        field: &Field<'_, '_>,
        method: HttpMethod,
        ctx: &dyn DeserializationContext,
    ) -> Result<()> {
        let property = field.property;
        let current = property.get_from(entity);
        let collection_delta = !field.forced_post && matches!(current, Value::List(_));
        let mut child = DeserializerNode::property(ty.id, property, &node.expand_path, Some(current));
        if field.forced_post {
            child.operation = NodeOperation::Post;
        }
        self.node(&mut child, field.json, ctx)?;
        node.absorb(&mut child);
        if !child.is_dirty() {
            return Ok(());
        }
        if !collection_delta {
            ctx.check_access(ty, property, method)?;
        }
        trace!(type_name = %ty.name, property = %property.name, "wire.deserialize.set");
        ctx.set_property(entity, property, child.into_value())
    }
}

fn collect_fields<'t, 'j>(
    ty: &'t MappedType,
    obj: &'j JsonMap<String, Json>,
    path: &str,
) -> Result<Vec<Field<'t, 'j>>> {
    let mut fields = Vec::with_capacity(obj.len());
    for (key, json) in obj {
        if key == "_type" || key == "_uri" || is_identifier_key(key) {
            continue;
        }
        let (name, forced_post) = match key.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (unescape(key), false),
        };
        let property = ty.property(name).ok_or_else(|| {
            MappingError::format(format!("'{}' has no property '{name}'{}", ty.name, at(path)))
        })?;
        fields.push(Field {
            property,
            json,
            forced_post,
            fetched: false,
        });
    }
    // Declaration order keeps property setters deterministic.
    fields.sort_by_key(|f| {
        ty.properties()
            .iter()
            .position(|p| p.name == f.property.name)
            .unwrap_or(usize::MAX)
    });
    Ok(fields)
}

fn convert(kind: ValueKind, json: &Json, path: &str) -> Result<Value> {
    let mismatch = || {
        MappingError::format(format!(
            "expected {}{}, got {}",
            kind.name(),
            at(path),
            json_kind(json)
        ))
    };
    match kind {
        ValueKind::Boolean => json.as_bool().map(Value::Bool).ok_or_else(mismatch),
        ValueKind::Int32 => {
            let i = json.as_i64().ok_or_else(mismatch)?;
            i32::try_from(i)
                .map(|i| Value::Int(i64::from(i)))
                .map_err(|_| MappingError::format(format!("{i} is out of range for Int32{}", at(path))))
        }
        ValueKind::Int64 => json.as_i64().map(Value::Int).ok_or_else(mismatch),
        ValueKind::Double => json.as_f64().map(Value::Float).ok_or_else(mismatch),
        ValueKind::String => json
            .as_str()
            .map(|s| Value::String(s.to_owned()))
            .ok_or_else(mismatch),
        ValueKind::DateTime => {
            let text = json.as_str().ok_or_else(mismatch)?;
            OffsetDateTime::parse(text, &Rfc3339)
                .map(Value::DateTime)
                .map_err(|err| MappingError::format(format!("invalid timestamp '{text}'{}: {err}", at(path))))
        }
        ValueKind::Any => Err(mismatch()),
    }
}

fn ref_property(obj: &JsonMap<String, Json>) -> Result<Option<String>> {
    match obj.get("_ref") {
        None => Ok(None),
        Some(Json::String(uri)) => Ok(Some(uri.clone())),
        Some(other) => Err(MappingError::format(format!(
            "_ref must be a string, got {}",
            json_kind(other)
        ))),
    }
}

fn is_identifier_key(key: &str) -> bool {
    key.starts_with("*@") || key.starts_with("-@")
}

fn unescape(key: &str) -> &str {
    key.strip_prefix('^').unwrap_or(key)
}

fn at(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at '{path}'")
    }
}

fn optional_count(obj: &JsonMap<String, Json>, key: &str) -> Result<Option<u64>> {
    match obj.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| MappingError::format(format!("'{key}' must be a non-negative integer"))),
    }
}

pub(crate) fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
