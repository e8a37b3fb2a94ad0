//! TOML schema files.
//!
//! ```toml
//! [enums]
//! Color = ["Red", "Green"]
//!
//! [proxies]
//! CritterProxy = "Critter"
//!
//! [[types]]
//! name = "Critter"
//! kind = "resource"
//! path = "critters"
//! parent = { type = "Farm", child_to_parent = "Farm", parent_to_child = "Critters" }
//!
//! [[types.properties]]
//! name = "Id"
//! type = "int32"
//! id = true
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{MappingError, Result};
use crate::model::Value;
use crate::types::{
    HttpMethod, HttpMethods, NativeType, PropertyDef, SourceType, TypeRegistry,
};

/// Parsed schema file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    #[serde(default)]
    types: Vec<RawType>,
    #[serde(default)]
    enums: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    proxies: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawKind {
    Resource,
    Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawType {
    name: String,
    kind: RawKind,
    path: Option<String>,
    base: Option<String>,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    allow: Option<Vec<HttpMethod>>,
    parent: Option<RawParent>,
    uri_base: Option<String>,
    #[serde(default)]
    type_parameters: Vec<String>,
    #[serde(default)]
    generic_arguments: Vec<String>,
    constructor: Option<Vec<String>>,
    #[serde(default)]
    properties: Vec<RawProperty>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParent {
    #[serde(rename = "type")]
    parent_type: String,
    child_to_parent: String,
    parent_to_child: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProperty {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    id: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    expanded: bool,
    access: Option<Vec<HttpMethod>>,
    item_access: Option<Vec<HttpMethod>>,
    default: Option<toml::Value>,
}

impl SchemaFile {
    /// Parses a schema document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| MappingError::Config(format!("schema: {err}")))
    }

    /// Reads and parses a schema file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            MappingError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Converts the declarations into a registry.
    pub fn into_registry(self) -> Result<TypeRegistry> {
        let mut registry = TypeRegistry::new();
        for (name, values) in self.enums {
            registry.register_enum(name, values)?;
        }
        for raw in self.types {
            registry.register(convert_type(raw)?)?;
        }
        for (proxy, target) in self.proxies {
            registry.register_proxy(proxy, target)?;
        }
        Ok(registry)
    }
}

fn convert_type(raw: RawType) -> Result<SourceType> {
    let mut source = match raw.kind {
        RawKind::Resource => SourceType::resource(raw.name),
        RawKind::Value => SourceType::value_object(raw.name),
    };
    if let Some(path) = raw.path {
        source = source.at(path);
    }
    if let Some(base) = raw.base {
        source = source.extends(base);
    }
    if raw.is_abstract {
        source = source.abstract_type();
    }
    if let Some(allow) = raw.allow {
        source = source.allow(allow.into_iter().collect());
    }
    if let Some(parent) = raw.parent {
        source = source.child_of(parent.parent_type, parent.child_to_parent, parent.parent_to_child);
    }
    if let Some(uri_base) = raw.uri_base {
        source = source.uri_base(uri_base);
    }
    if !raw.type_parameters.is_empty() {
        source = source.type_parameters(raw.type_parameters);
    }
    if !raw.generic_arguments.is_empty() {
        let arguments = raw
            .generic_arguments
            .iter()
            .map(|a| a.parse::<NativeType>())
            .collect::<Result<Vec<_>>>()?;
        source = source.generic_arguments(arguments);
    }
    if let Some(ctor) = raw.constructor {
        source = source.constructor(ctor);
    }
    for prop in raw.properties {
        source = source.property(convert_property(prop)?);
    }
    Ok(source)
}

fn convert_property(raw: RawProperty) -> Result<PropertyDef> {
    let ty: NativeType = raw.ty.parse()?;
    let mut def = if raw.id {
        PropertyDef::id(raw.name, ty)
    } else {
        PropertyDef::new(raw.name, ty)
    };
    if let Some(access) = raw.access {
        def = def.access(access.into_iter().collect::<HttpMethods>());
    }
    if let Some(access) = raw.item_access {
        def = def.item_access(access.into_iter().collect::<HttpMethods>());
    }
    if raw.required {
        def = def.required();
    }
    if raw.expanded {
        def = def.expanded();
    }
    if let Some(default) = raw.default {
        let value = convert_default(&def.name, default)?;
        def = def.default_value(value);
    }
    Ok(def)
}

fn convert_default(property: &str, value: toml::Value) -> Result<Value> {
    let converted = match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => {
            let parsed = OffsetDateTime::parse(&dt.to_string(), &Rfc3339).map_err(|err| {
                MappingError::Config(format!("default of '{property}': {err}"))
            })?;
            Value::DateTime(parsed)
        }
        toml::Value::Array(items) => Value::List(
            items
                .into_iter()
                .map(|item| convert_default(property, item))
                .collect::<Result<Vec<_>>>()?,
        ),
        toml::Value::Table(_) => {
            return Err(MappingError::Config(format!(
                "default of '{property}' cannot be a table"
            )))
        }
    };
    Ok(converted)
}
