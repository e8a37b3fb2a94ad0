#![allow(missing_docs)]

use std::fs;

use restmap::{
    model::Value,
    types::{schema::SchemaFile, TypeGraph},
    wire::{DefaultContext, JsonDeserializer},
    MappingError,
};
use serde_json::json;
use tempfile::TempDir;
use time::macros::datetime;

const SCHEMA: &str = r#"
[[types]]
name = "Critter"
kind = "resource"

[[types.properties]]
name = "Id"
type = "int32"
id = true

[[types.properties]]
name = "Name"
type = "string"
required = true
default = "Nameless"

[[types.properties]]
name = "Legs"
type = "int32"
required = true
default = 4

[[types.properties]]
name = "Born"
type = "datetime"
required = true
default = 2020-01-02T03:04:05Z

[[types.properties]]
name = "Tags"
type = "List<string>"
required = true
default = ["new"]

[[types.properties]]
name = "Hat"
type = "string"
required = true
"#;

fn load(contents: &str) -> restmap::Result<TypeGraph> {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("schema.toml");
    fs::write(&path, contents).expect("write schema");
    TypeGraph::new(SchemaFile::load(&path)?.into_registry()?)
}

#[test]
fn defaults_fill_absent_constructor_parameters() {
    let graph = load(SCHEMA).unwrap();
    let critter = graph.by_name("Critter").unwrap().id;
    let de = JsonDeserializer::new(&graph);

    let value = de
        .deserialize(&json!({"id": 7, "hat": "cap"}), critter, &DefaultContext, None)
        .unwrap();
    let entity = value.as_entity().unwrap();
    assert_eq!(entity.get("Name"), Value::from("Nameless"));
    assert_eq!(entity.get("Legs"), Value::Int(4));
    assert_eq!(entity.get("Born"), Value::DateTime(datetime!(2020-01-02 03:04:05 UTC)));
    assert_eq!(entity.get("Tags"), Value::List(vec![Value::from("new")]));

    let value = de
        .deserialize(&json!({"id": 8, "legs": 6, "hat": "cap"}), critter, &DefaultContext, None)
        .unwrap();
    assert_eq!(value.as_entity().unwrap().get("Legs"), Value::Int(6));
}

#[test]
fn required_property_without_default_is_reported() {
    let graph = load(SCHEMA).unwrap();
    let critter = graph.by_name("Critter").unwrap().id;
    let err = JsonDeserializer::new(&graph)
        .deserialize(&json!({"id": 9}), critter, &DefaultContext, None)
        .unwrap_err();
    assert!(matches!(
        err,
        MappingError::MissingProperty { ref property, .. } if property == "Hat"
    ));
}

#[test]
fn table_defaults_are_rejected() {
    let schema = r#"
[[types]]
name = "Critter"
kind = "resource"

[[types.properties]]
name = "Name"
type = "string"
default = { first = "Ada" }
"#;
    let err = load(schema).unwrap_err();
    assert_eq!(err.code(), "Config");
    assert!(err.to_string().contains("Name"), "{err}");
}
