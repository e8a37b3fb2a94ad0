#![allow(dead_code, missing_docs)]

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use restmap::{
    client::{Client, LocalTransport},
    model::{Entity, Value},
    store::Repository,
    types::{HttpMethods, MappedTypeId, NativeType, PropertyDef, SourceType, TypeGraph, TypeRegistry, ValueKind},
    Config,
};

pub const COLORS: [&str; 3] = ["Red", "Green", "Blue"];

pub fn int32() -> NativeType {
    NativeType::Value(ValueKind::Int32)
}

pub fn string() -> NativeType {
    NativeType::Value(ValueKind::String)
}

pub fn registry() -> TypeRegistry {
    TypeRegistry::new()
        .with_enum("Color", COLORS)
        .with_type(
            SourceType::resource("Hat")
                .property(PropertyDef::id("Id", int32()))
                .property(PropertyDef::new("HatType", string()).required()),
        )
        .with_type(
            SourceType::value_object("Weapon")
                .property(PropertyDef::new("Id", int32()))
                .property(PropertyDef::new("Strength", int32())),
        )
        .with_type(
            SourceType::resource("Critter")
                .property(PropertyDef::id("Id", int32()))
                .property(PropertyDef::new("Name", string()))
                .property(PropertyDef::new("Color", NativeType::named("Color")))
                .property(PropertyDef::new("Legs", int32()))
                .property(PropertyDef::new("Hat", NativeType::named("Hat")))
                .property(
                    PropertyDef::new("Weapons", NativeType::list(NativeType::named("Weapon")))
                        .item_access(HttpMethods::ALL),
                )
                .property(PropertyDef::new(
                    "Born",
                    NativeType::nullable(NativeType::Value(ValueKind::DateTime)),
                ))
                .property(PropertyDef::new("Secret", string()).access(HttpMethods::POST)),
        )
        .with_type(
            SourceType::resource("MusicalCritter")
                .extends("Critter")
                .property(PropertyDef::new("Instrument", string())),
        )
        .with_proxy("ICritter", "Critter")
        .with_proxy("IHat", "Hat")
}

pub fn graph() -> Arc<TypeGraph> {
    Arc::new(TypeGraph::new(registry()).expect("critter graph"))
}

pub fn type_id(graph: &TypeGraph, name: &str) -> MappedTypeId {
    graph.by_name(name).expect("registered type").id
}

pub fn hat(graph: &TypeGraph, id: i64, hat_type: &str) -> Entity {
    let hat = Entity::new(type_id(graph, "Hat"));
    hat.set("Id", Value::Int(id));
    hat.set("HatType", hat_type.into());
    hat
}

pub fn weapon(graph: &TypeGraph, id: i64, strength: i64) -> Value {
    let weapon = Entity::new(type_id(graph, "Weapon"));
    weapon.set("Id", Value::Int(id));
    weapon.set("Strength", Value::Int(strength));
    Value::Object(weapon)
}

/// Critters `1..=count`; every fourth one is musical. Colors and leg counts
/// come from a seeded generator so runs are reproducible.
pub fn critters(graph: &TypeGraph, count: i64, seed: u64) -> Vec<Entity> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (1..=count)
        .map(|id| {
            let ty = if id % 4 == 0 { "MusicalCritter" } else { "Critter" };
            let critter = Entity::new(type_id(graph, ty));
            critter.set("Id", Value::Int(id));
            critter.set("Name", Value::String(format!("critter {id:02}")));
            critter.set("Color", Value::Enum(COLORS[rng.gen_range(0..COLORS.len())].to_owned()));
            critter.set("Legs", Value::Int(rng.gen_range(0..=8)));
            critter.set("Weapons", Value::List(vec![weapon(graph, id * 10, id)]));
            if ty == "MusicalCritter" {
                critter.set("Instrument", "banjo".into());
            }
            critter
        })
        .collect()
}

pub fn repository(graph: &Arc<TypeGraph>, count: i64, seed: u64) -> Arc<Repository> {
    let repo = Arc::new(Repository::new(Arc::clone(graph)));
    for critter in critters(graph, count, seed) {
        repo.insert(critter).expect("insert critter");
    }
    repo
}

pub fn loopback(graph: &Arc<TypeGraph>, repo: &Arc<Repository>, config: Config) -> Client {
    let transport = LocalTransport::new(Arc::clone(graph), repo.clone(), config.clone());
    Client::new(Arc::clone(graph), Arc::new(transport), config)
}

pub fn ids(items: &[Value]) -> Vec<i64> {
    items
        .iter()
        .map(|item| {
            item.as_entity()
                .expect("entity item")
                .get("Id")
                .as_i64()
                .expect("integer id")
        })
        .collect()
}
