use std::collections::BTreeSet;

use serde_json::{Map as JsonMap, Number, Value as Json};
use time::format_description::well_known::Rfc3339;

use crate::config::Config;
use crate::error::{MappingError, Result};
use crate::model::{Entity, RefState, Value};
use crate::query::{QueryOutput, QueryResult};
use crate::types::{MappedType, MappedTypeId, TypeGraph, TypeKind, ValueKind};
use crate::wire::RESULT_TYPE;

/// Property paths whose resource values are written inline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpandSet {
    all: bool,
    paths: BTreeSet<String>,
}

impl ExpandSet {
    /// Expands nothing below the top level.
    pub fn none() -> Self {
        Self::default()
    }

    /// Expands every reachable resource.
    pub fn all() -> Self {
        Self {
            all: true,
            paths: BTreeSet::new(),
        }
    }

    /// Expands the given dot-joined paths and every prefix of them.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for path in paths {
            let path = path.as_ref().to_ascii_lowercase();
            let mut prefix = String::with_capacity(path.len());
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(segment);
                set.insert(prefix.clone());
            }
        }
        Self {
            all: false,
            paths: set,
        }
    }

    /// Whether resources at `path` are inlined.
    pub fn contains(&self, path: &str) -> bool {
        self.all || self.paths.contains(&path.to_ascii_lowercase())
    }
}

/// Writes the dynamic object model as JSON documents the deserializer reads back.
pub struct JsonSerializer<'g> {
    graph: &'g TypeGraph,
    base_uri: String,
}

struct Walk<'a> {
    expand: &'a ExpandSet,
    stack: Vec<usize>,
    any: MappedTypeId,
}

impl<'g> JsonSerializer<'g> {
    /// Serializer prefixing resource URIs with `base_uri`.
    pub fn new(graph: &'g TypeGraph, base_uri: impl Into<String>) -> Self {
        Self {
            graph,
            base_uri: base_uri.into(),
        }
    }

    /// Serializer using the configured base URI.
    pub fn from_config(graph: &'g TypeGraph, config: &Config) -> Self {
        Self::new(graph, config.base_uri.clone())
    }

    /// Absolute URI of a resource instance.
    pub fn resource_uri(&self, entity: &Entity) -> Result<String> {
        let relative = self.graph.uri_of(entity)?;
        Ok(format!("{}/{relative}", self.base_uri.trim_end_matches('/')))
    }

    /// Serializes `value` into a slot of type `expected`.
    pub fn serialize(&self, value: &Value, expected: MappedTypeId, expand: &ExpandSet) -> Result<Json> {
        let mut walk = self.walk(expand)?;
        self.write(value, expected, "", true, &mut walk)
    }

    /// Serializes a listing as a result envelope.
    pub fn serialize_result(
        &self,
        result: &QueryResult,
        item_type: MappedTypeId,
        expand: &ExpandSet,
    ) -> Result<Json> {
        let mut walk = self.walk(expand)?;
        let items = result
            .items
            .iter()
            .map(|item| self.write(item, item_type, "", true, &mut walk))
            .collect::<Result<Vec<_>>>()?;
        let mut obj = JsonMap::new();
        obj.insert("_type".into(), Json::String(RESULT_TYPE.to_owned()));
        obj.insert("items".into(), Json::Array(items));
        if let Some(skip) = result.skip {
            obj.insert("skip".into(), Json::from(skip));
        }
        if let Some(total) = result.total_count {
            obj.insert("totalCount".into(), Json::from(total));
        }
        if let Some(url) = &result.url {
            obj.insert("url".into(), Json::String(url.clone()));
        }
        Ok(Json::Object(obj))
    }

    /// Serializes whatever an interpreter produced.
    pub fn serialize_output(
        &self,
        output: &QueryOutput,
        item_type: MappedTypeId,
        expand: &ExpandSet,
    ) -> Result<Json> {
        match output {
            QueryOutput::Items(result) => self.serialize_result(result, item_type, expand),
            QueryOutput::Value(value) => self.serialize(value, item_type, expand),
        }
    }

    fn walk<'a>(&self, expand: &'a ExpandSet) -> Result<Walk<'a>> {
        Ok(Walk {
            expand,
            stack: Vec::new(),
            any: self.graph.value_type(ValueKind::Any)?,
        })
    }

    fn write(
        &self,
        value: &Value,
        expected: MappedTypeId,
        path: &str,
        inline: bool,
        walk: &mut Walk<'_>,
    ) -> Result<Json> {
        let expected_ty = self.graph.get(expected)?;
        let json = match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::String(s) | Value::Enum(s) => Json::String(s.clone()),
            Value::DateTime(dt) => {
                let text = dt
                    .format(&Rfc3339)
                    .map_err(|err| MappingError::format(format!("cannot format timestamp: {err}")))?;
                if expected_ty.is_any() {
                    boxed(ValueKind::DateTime, Json::String(text))
                } else {
                    Json::String(text)
                }
            }
            Value::List(items) => {
                let element = expected_ty.element_type().unwrap_or(walk.any);
                let items = items
                    .iter()
                    .map(|item| self.write(item, element, path, inline, walk))
                    .collect::<Result<Vec<_>>>()?;
                Json::Array(items)
            }
            Value::Map(entries) => {
                let value_type = match expected_ty.kind {
                    TypeKind::Dictionary { value, .. } => value,
                    _ => walk.any,
                };
                let mut obj = JsonMap::new();
                for (key, entry) in entries {
                    let child = child_path(path, key);
                    obj.insert(escape_key(key), self.write(entry, value_type, &child, false, walk)?);
                }
                Json::Object(obj)
            }
            Value::Object(entity) => self.write_entity(entity, &expected_ty, path, inline, walk)?,
            Value::Group(group) => {
                let mut obj = JsonMap::new();
                obj.insert("key".into(), self.write(&group.key, walk.any, path, false, walk)?);
                let items = group
                    .items
                    .iter()
                    .map(|item| self.write(item, walk.any, path, true, walk))
                    .collect::<Result<Vec<_>>>()?;
                obj.insert("items".into(), Json::Array(items));
                Json::Object(obj)
            }
            Value::Reference(reference) => match reference.state() {
                RefState::Resolved(target) if inline || walk.expand.contains(path) => {
                    self.write(&target, expected, path, inline, walk)?
                }
                _ => reference_json(reference.uri()),
            },
        };
        Ok(json)
    }

    fn write_entity(
        &self,
        entity: &Entity,
        expected: &MappedType,
        path: &str,
        inline: bool,
        walk: &mut Walk<'_>,
    ) -> Result<Json> {
        let ty = self.graph.get(entity.type_id())?;
        let is_resource = ty.resource().is_some();
        let on_stack = walk.stack.contains(&entity.addr());
        if is_resource && (on_stack || !(inline || walk.expand.contains(path))) {
            return Ok(reference_json(&self.resource_uri(entity)?));
        }
        if on_stack {
            return Err(MappingError::not_supported(format!(
                "cyclic value object '{}' at '{path}'",
                ty.name
            )));
        }

        walk.stack.push(entity.addr());
        let mut obj = JsonMap::new();
        if ty.id != expected.id {
            obj.insert("_type".into(), Json::String(ty.name.clone()));
        }
        if is_resource {
            obj.insert("_uri".into(), Json::String(self.resource_uri(entity)?));
        }
        for property in ty.properties().iter().filter(|p| p.is_readable()) {
            let value = property.get_from(entity);
            if value.is_null() && !self.graph.get(property.property_type)?.nullable {
                continue;
            }
            let child = child_path(path, &property.name);
            let json = self.write(&value, property.property_type, &child, property.always_expanded, walk)?;
            obj.insert(property.json_name(), json);
        }
        walk.stack.pop();
        Ok(Json::Object(obj))
    }
}

fn boxed(kind: ValueKind, value: Json) -> Json {
    let mut obj = JsonMap::new();
    obj.insert("_type".into(), Json::String(kind.name().to_owned()));
    obj.insert("value".into(), value);
    Json::Object(obj)
}

fn reference_json(uri: &str) -> Json {
    let mut obj = JsonMap::new();
    obj.insert("_ref".into(), Json::String(uri.to_owned()));
    Json::Object(obj)
}

fn child_path(path: &str, segment: &str) -> String {
    let segment = segment.to_ascii_lowercase();
    if path.is_empty() {
        segment
    } else {
        format!("{path}.{segment}")
    }
}

fn escape_key(key: &str) -> String {
    if key.starts_with(['^', '-', '*', '!']) {
        format!("^{key}")
    } else {
        key.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::model::LazyRef;
    use crate::types::{NativeType, PropertyDef, SourceType, TypeRegistry};
    use crate::wire::{DefaultContext, JsonDeserializer};

    fn graph() -> TypeGraph {
        TypeGraph::new(
            TypeRegistry::new()
                .with_type(
                    SourceType::resource("Farm")
                        .property(PropertyDef::id("Id", NativeType::Value(ValueKind::Int32)))
                        .property(PropertyDef::new(
                            "Critters",
                            NativeType::list(NativeType::named("Critter")),
                        )),
                )
                .with_type(
                    SourceType::resource("Critter")
                        .property(PropertyDef::id("Id", NativeType::Value(ValueKind::Int32)))
                        .property(PropertyDef::new("Farm", NativeType::named("Farm")))
                        .property(PropertyDef::new("Friend", NativeType::named("Critter")).expanded())
                        .property(PropertyDef::new("Extra", NativeType::Value(ValueKind::Any)))
                        .property(PropertyDef::new(
                            "Tags",
                            NativeType::map(
                                NativeType::Value(ValueKind::String),
                                NativeType::Value(ValueKind::Int32),
                            ),
                        ))
                        .property(
                            PropertyDef::new("Hidden", NativeType::Value(ValueKind::String))
                                .access(crate::types::HttpMethods::POST),
                        ),
                )
                .with_type(SourceType::resource("MusicalCritter").extends("Critter")),
        )
        .unwrap()
    }

    fn critter(g: &TypeGraph, ty: &str, id: i64) -> Entity {
        let e = Entity::new(g.by_name(ty).unwrap().id);
        e.set("Id", Value::Int(id));
        e
    }

    #[test]
    fn resources_carry_uri_and_references() {
        let g = graph();
        let farm = Entity::new(g.by_name("Farm").unwrap().id);
        farm.set("Id", Value::Int(1));
        let bob = critter(&g, "MusicalCritter", 5);
        bob.set("Farm", Value::Object(farm.clone()));
        bob.set("Hidden", "x".into());
        farm.set("Critters", Value::List(vec![Value::Object(bob.clone())]));

        let ser = JsonSerializer::new(&g, "/");
        let json = ser
            .serialize(&Value::Object(bob.clone()), g.by_name("Critter").unwrap().id, &ExpandSet::none())
            .unwrap();
        assert_eq!(
            json,
            json!({
                "_type": "MusicalCritter",
                "_uri": "/critters/5",
                "id": 5,
                "farm": {"_ref": "/farms/1"},
                "friend": null,
                "extra": null,
                "tags": null
            })
        );

        let expanded = ser
            .serialize(&Value::Object(bob), g.by_name("MusicalCritter").unwrap().id, &ExpandSet::from_paths(["farm"]))
            .unwrap();
        assert_eq!(expanded["farm"]["_uri"], json!("/farms/1"));
        // The critter is already being written, so the cycle becomes a reference.
        assert_eq!(expanded["farm"]["critters"], json!([{"_ref": "/critters/5"}]));
        assert!(expanded.get("_type").is_none());
    }

    #[test]
    fn always_expanded_properties_and_boxing() {
        let g = graph();
        let a = critter(&g, "Critter", 1);
        let b = critter(&g, "Critter", 2);
        a.set("Friend", Value::Object(b));
        a.set("Extra", Value::DateTime(datetime!(2022-05-06 07:08:09 UTC)));
        let mut tags = std::collections::BTreeMap::new();
        tags.insert("-minus".to_owned(), Value::Int(1));
        tags.insert("plain".to_owned(), Value::Int(2));
        a.set("Tags", Value::Map(tags));

        let json = JsonSerializer::new(&g, "http://farm.test/api/")
            .serialize(&Value::Object(a), g.by_name("Critter").unwrap().id, &ExpandSet::none())
            .unwrap();
        assert_eq!(json["_uri"], json!("http://farm.test/api/critters/1"));
        assert_eq!(json["friend"]["id"], json!(2));
        assert_eq!(json["extra"], json!({"_type": "DateTime", "value": "2022-05-06T07:08:09Z"}));
        assert_eq!(json["tags"], json!({"^-minus": 1, "plain": 2}));
    }

    #[test]
    fn round_trips_through_the_deserializer() {
        let g = graph();
        let a = critter(&g, "MusicalCritter", 1);
        a.set("Extra", Value::DateTime(datetime!(2022-05-06 07:08:09 UTC)));
        let mut tags = std::collections::BTreeMap::new();
        tags.insert("*star".to_owned(), Value::Int(1));
        a.set("Tags", Value::Map(tags));
        let expected = g.by_name("Critter").unwrap().id;
        let original = Value::Object(a);

        let json = JsonSerializer::new(&g, "/")
            .serialize(&original, expected, &ExpandSet::all())
            .unwrap();
        let back = JsonDeserializer::new(&g)
            .deserialize(&json, expected, &DefaultContext, None)
            .unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn result_envelope_and_references() {
        let g = graph();
        let critter_ty = g.by_name("Critter").unwrap().id;
        let result = QueryResult {
            items: vec![Value::Reference(LazyRef::new("/critters/3", critter_ty))],
            skip: Some(10),
            total_count: None,
            url: Some("critters?$skip=10".into()),
        };
        let json = JsonSerializer::new(&g, "/")
            .serialize_result(&result, critter_ty, &ExpandSet::none())
            .unwrap();
        assert_eq!(
            json,
            json!({
                "_type": "__result__",
                "items": [{"_ref": "/critters/3"}],
                "skip": 10,
                "url": "critters?$skip=10"
            })
        );
    }

    #[test]
    fn expand_sets_include_prefixes() {
        let set = ExpandSet::from_paths(["Farm.Critters"]);
        assert!(set.contains("farm"));
        assert!(set.contains("farm.critters"));
        assert!(!set.contains("friend"));
        assert!(ExpandSet::all().contains("anything"));
    }
}
